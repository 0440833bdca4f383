//! Known-good encodings of each link message.
//!
//! The CREATE, CREATED, CREATE_FAST, and CREATED_FAST bodies come from
//! a test network; everything else was written by hand.

use tor_cell::chancell::{msg, ChanCmd};
use tor_linkbuf::{Error as BytesError, Reader};

use std::net::IpAddr;

use hex_literal::hex;

const CELL_SIZE: usize = 509;

/// Decode a hex string that may contain whitespace, zero-padding it to a
/// fixed-length payload if `fixed` is set.
fn payload(s: &str, fixed: bool) -> Vec<u8> {
    let digits: String = s.split_whitespace().collect();
    let mut body = hex::decode(digits).unwrap();
    if fixed {
        assert!(body.len() <= CELL_SIZE);
        body.resize(CELL_SIZE, 0);
    }
    body
}

fn parse(cmd: ChanCmd, s: &str, fixed: bool) -> tor_linkbuf::Result<msg::ChanMsg> {
    let body = payload(s, fixed);
    let mut r = Reader::from_slice(&body[..]);
    msg::ChanMsg::take(&mut r, cmd)
}

fn decode_err(cmd: ChanCmd, s: &str, fixed: bool) -> BytesError {
    parse(cmd, s, fixed).unwrap_err()
}

fn test_decode(cmd: ChanCmd, s: &str, fixed: bool) -> (Vec<u8>, msg::ChanMsg) {
    (payload(s, fixed), parse(cmd, s, fixed).unwrap())
}

fn encode(m: msg::ChanMsg, fixed: bool) -> Vec<u8> {
    let mut out = Vec::new();
    m.write_body_onto(&mut out);
    if fixed {
        assert!(out.len() <= CELL_SIZE);
        out.resize(CELL_SIZE, 0);
    }
    out
}

/// Check that `s` decodes to `m` under `cmd`, and that both `m` and the
/// decoded message encode back to `s`.
fn test_body(cmd: ChanCmd, s: &str, m: &msg::ChanMsg, fixed: bool) {
    assert_eq!(cmd, m.cmd());

    let (body, decoded) = test_decode(cmd, s, fixed);
    // No PartialEq on messages; Debug output will do.
    assert_eq!(format!("{:?}", decoded), format!("{:?}", m));

    assert_eq!(encode(decoded, fixed), body);
    assert_eq!(encode(m.clone(), fixed), body);
}

/// Variable-length cell body.
fn vbody(cmd: ChanCmd, s: &str, m: &msg::ChanMsg) {
    test_body(cmd, s, m, false)
}

/// Fixed-length cell body.
fn fbody(cmd: ChanCmd, s: &str, m: &msg::ChanMsg) {
    test_body(cmd, s, m, true)
}

#[test]
fn test_create() {
    let cmd = ChanCmd::CREATE;
    assert_eq!(Into::<u8>::into(cmd), 1_u8);
    let body = "07780DBE97D62D392E0DF2286C78386C49464154A8EDE46EECA1753AA49391200F33F22DF0128CCEC3339434D436551930C95338693EEFAD3964D53184C58AF6C0D838EE3893FAE650DAC89BB12EBB6A882E572C9EA079ACD3E51063296E52ABC875D7A31F8965A6BA9CE54F16AD5C746FEE7D9EF2D41CF4399D818567599D2A0FA8E27F31838F80D80E2D03C040FB954B2AD8872530FFB2AA50531B2BB40C7CB4BF1E8946A50C7622A2916C679AD11577EB4EC414BF8F287085";
    let handshake = hex::decode(body).unwrap();
    assert_eq!(handshake.len(), msg::TAP_C_HANDSHAKE_LEN);
    fbody(cmd, body, &msg::Create::new(handshake.clone()).into());

    // Short handshakes are padded; long ones are cut.
    let create = msg::Create::new(&handshake[..10]);
    assert_eq!(create.body().len(), msg::TAP_C_HANDSHAKE_LEN);
    assert_eq!(&create.body()[..10], &handshake[..10]);
    let mut long = handshake.clone();
    long.extend_from_slice(&[7; 20]);
    assert_eq!(msg::Create::new(long).into_body(), handshake);
}

#[test]
fn test_create_fast() {
    let cmd = ChanCmd::CREATE_FAST;
    assert_eq!(Into::<u8>::into(cmd), 5_u8);
    let body = "0DC2A5EB921EF4B71F41184A99F4FAD99620A648";
    let handshake = hex::decode(body).unwrap();

    fbody(cmd, body, &msg::CreateFast::new(handshake.clone()).into());
    let create_fast = msg::CreateFast::new(handshake.clone());
    assert_eq!(create_fast.body(), &handshake[..]);
}

#[test]
fn test_created() {
    let cmd = ChanCmd::CREATED;
    assert_eq!(Into::<u8>::into(cmd), 2_u8);
    let body = "0AC85AFA82E14BD661A4BEB3F6420508F21336455326442D9D34B41F4F4E1283751B681C83AB6C06089C6CB5AC857509B4CF185DD044C6B66A53B6FA7E48F8728DC7CC114E38E9258058A0D7C3603335E6812AB3687076DC82F2D4E9872D6787587CBAACF2BC962DFB3A0FCD313D86EC0572DEC12C5D113C78A7B34EF3C209260E48AB5C6E1DAB0D68617B76CC408A93DC0E26C0";
    let handshake = hex::decode(body).unwrap();
    assert_eq!(handshake.len(), msg::TAP_S_HANDSHAKE_LEN);

    fbody(cmd, body, &msg::Created::new(handshake).into());
}

#[test]
fn test_created_fast() {
    let cmd = ChanCmd::CREATED_FAST;
    assert_eq!(Into::<u8>::into(cmd), 6_u8);
    let body = "03B74250B01D09FDA72B70D63AE7994926F13055BED23485F6B3C8C3CEAFE1DF48A9FF8BAC4993FC";
    let handshake = hex::decode(body).unwrap();

    fbody(cmd, body, &msg::CreatedFast::new(handshake.clone()).into());
    let created_fast = msg::CreatedFast::new(handshake.clone());
    assert_eq!(created_fast.into_body(), handshake);
}

#[test]
fn test_destroy() {
    let cmd = ChanCmd::DESTROY;
    assert_eq!(Into::<u8>::into(cmd), 4_u8);

    fbody(cmd, "04", &msg::Destroy::new(4.into()).into());
    fbody(cmd, "0000", &msg::Destroy::new(0.into()).into());
}

#[test]
fn test_netinfo() {
    let cmd = ChanCmd::NETINFO;
    assert_eq!(Into::<u8>::into(cmd), 8_u8);

    // Nothing to say about ourselves.
    let localhost = "127.0.0.1".parse::<IpAddr>().unwrap();
    vbody(
        cmd,
        "00000000 04 04 7F000001 00",
        &msg::Netinfo::new(0, Some(localhost), vec![]).into(),
    );

    // One address of our own.
    vbody(
        cmd,
        "5F6F80E1 04 04 7F000001 01 04 04 7F000001",
        &msg::Netinfo::new(0x5f6f80e1, Some(localhost), vec![localhost]).into(),
    );

    let localhost_v6 = "::1".parse::<IpAddr>().unwrap();
    vbody(
        cmd,
        "5F6F859C 06 10 00000000000000000000000000000001
         02
         04 04 7F000001
         06 10 00000000000000000000000000000001",
        &msg::Netinfo::new(
            0x5f6f859c,
            Some(localhost_v6),
            vec![localhost, localhost_v6],
        )
        .into(),
    );

    // Bogus addresses get ignored. (hand-generated from above)
    let (_, netinfo) = test_decode(
        cmd,
        "5F6F859C 06 09 000000000000000000
         03
         04 06 7F0000010000
         BB 02 FFFF
         06 10 00000000000000000000000000000001",
        false,
    );
    let expect: msg::ChanMsg = msg::Netinfo::new(0x5f6f859c, None, vec![localhost_v6]).into();
    assert_eq!(format!("{:?}", netinfo), format!("{:?}", expect));

    // Zero-valued their_address are None (hand-generated from above)
    vbody(
        cmd,
        "00000000 04 04 00000000 00",
        &msg::Netinfo::new(0, None, vec![]).into(),
    );

    // An address that runs off the end is an error.
    assert_eq!(
        decode_err(cmd, "5F6F859C 04 04 7F000001 01 06 10 0000", false),
        BytesError::Truncated
    );
}

#[test]
fn test_certs() {
    let cmd = ChanCmd::CERT;
    assert_eq!(Into::<u8>::into(cmd), 9_u8);

    let certs = msg::Certs::new(vec![b"identity"[..].into(), b"link"[..].into()]).unwrap();
    vbody(
        cmd,
        "0008 6964656e74697479 0004 6c696e6b",
        &certs.clone().into(),
    );
    assert_eq!(certs.certs().len(), 2);
    assert_eq!(&certs.certs()[1][..], b"link");
    vbody(cmd, "", &msg::Certs::new_empty().into());
}

#[test]
fn test_link_auth() {
    let cmd = ChanCmd::LINK_AUTH;
    assert_eq!(Into::<u8>::into(cmd), 10_u8);

    let sig = hex!("ED6B2ACBAC868D87D1500505BF59196FD38DEF15E1078C46BF97C7EBCC26C2A26AAF7E6B8FF0C27AB8F0047426017D03A413D8C1D00077ED441112C3E88EEE53");
    vbody(
        cmd,
        "0041 00
         ED6B2ACBAC868D87D1500505BF59196FD38DEF15E1078C46BF97C7EBCC26C2A26AAF7E6B8FF0C27AB8F0047426017D03A413D8C1D00077ED441112C3E88EEE53",
        &msg::LinkAuth::new(msg::LINK_AUTH_FORMAT_ED25519, &sig[..]).into(),
    );

    assert_eq!(
        decode_err(cmd, "0000", false),
        BytesError::BadMessage("empty LINK_AUTH body")
    );
    assert_eq!(decode_err(cmd, "0005 00 01", false), BytesError::Truncated);
    // Nothing may follow the signature.
    assert_eq!(
        decode_err(cmd, "0002 00 AA BB", false),
        BytesError::ExtraneousBytes
    );
}

#[test]
fn test_padding() {
    let cmd = ChanCmd::PADDING;
    assert_eq!(Into::<u8>::into(cmd), 0_u8);

    fbody(cmd, "", &msg::Padding::default().into());
}

#[test]
fn test_versions() {
    let cmd = ChanCmd::VERSIONS;
    assert_eq!(Into::<u8>::into(cmd), 7_u8);

    vbody(
        cmd,
        "000300040005",
        &msg::Versions::new(vec![3, 4, 5]).unwrap().into(),
    );
    // A stray byte at the end is an error.
    assert_eq!(decode_err(cmd, "000300", false), BytesError::Truncated);
}

#[test]
fn test_unspecified() {
    let cmd = 101.into(); // not a specified fixed-length cell

    // generated by hand, since there is no alternative.

    let mut text: Vec<u8> = b"A mage's name is better hidden than a herring in the sea"[..].into();
    text.resize(CELL_SIZE, 0);
    fbody(
        cmd,
        "41206d6167652773206e616d65206973206265747465722068696464656e207468616e20612068657272696e6720696e2074686520736561",
        &msg::Unrecognized::new(cmd, text).into(),
    );

    let cmd = 244.into(); // not a specified variable-length cell
    vbody(
        cmd,
        "6265747465722067756172646564207468616e206120647261676f6e27732064656e",
        &msg::Unrecognized::new(cmd, &b"better guarded than a dragon's den"[..]).into(),
    );

    // quote from Ursula K. Le Guin, _A Wizard Of EarthSea_
}

#[test]
fn test_relay() {
    // This is hand-generated.
    let cmd = ChanCmd::RELAY;
    assert_eq!(Into::<u8>::into(cmd), 3_u8);

    let mut body: Vec<u8> = b"not validated at this stage"[..].into();
    body.resize(CELL_SIZE, 0);
    fbody(
        cmd,
        "6e6f742076616c6964617465642061742074686973207374616765",
        &msg::Relay::new(&body).into(),
    );

    // Relay bodies survive conversion to and from raw bodies.
    let body = [3_u8; 509];
    let cell = msg::Relay::new(&body[..]);
    let body2 = cell.into_relay_body();
    assert_eq!(&body2[..], &body[..]);
}

#![no_main]
use libfuzzer_sys::fuzz_target;
use tor_cell::chancell::codec;
use tor_linkbuf::ByteBuffer;

fuzz_target!(|data: &[u8]| {
    let mut buf = ByteBuffer::new(data.len());
    if buf.append(data).is_ok() {
        while let Ok(Some(_)) = codec::read_chan_cell(&mut buf) {}
    }
});

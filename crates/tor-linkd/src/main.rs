//! A small daemon that runs a Tor link engine over plain TCP.
//!
//! It accepts links, opens links to the relays it's told about, runs
//! the link handshake on each, and refuses every circuit.  This is a
//! demo; you get no stability guarantee.

#![warn(missing_docs)]

mod circuits;
mod keys;
mod transport;

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use argh::FromArgs;
use serde::Deserialize;
use tor_cell::chancell::msg::{Destroy, DestroyReason};
use tor_cell::chancell::ChanCell;
use tor_link::{LinkConfig, LinkEngine};
use tracing::{debug, info, warn};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};

use circuits::RefusingCircuitLayer;
use keys::KeyTrustStore;
use transport::TcpTransport;

#[derive(FromArgs, Debug, Clone)]
/// Accept and open Tor links over TCP, and log what happens on them.
///
/// This is a demo; you get no stability guarantee.
struct Args {
    /// a configuration file to read (may be repeated)
    #[argh(option, short = 'f')]
    rc: Vec<String>,
    /// override a configuration option (uses toml syntax)
    #[argh(option, short = 'c')]
    cfg: Vec<String>,
    /// log at this level, overriding the configuration (e.g. "info")
    #[argh(option, short = 'l')]
    log_level: Option<String>,
}

/// Default options to use for our configuration.
const LINKD_DEFAULTS: &str = include_str!("./linkd_defaults.toml");

/// How often to log a summary of our connections.
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

/// Structure to hold our configuration options, whether from a
/// configuration file or the command line.
#[derive(Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
struct LinkdConfig {
    /// Address to accept links on, if any.
    listen: Option<SocketAddr>,
    /// Relays to open links to.
    #[serde(default)]
    connect: Vec<SocketAddr>,
    /// Whether to log at trace level.
    trace: bool,
    /// How long to sleep between passes.
    #[serde(with = "humantime_serde")]
    poll_interval: Duration,
    /// Settings for the link engine.
    link: LinkConfig,
}

/// Our link engine, as this daemon uses it.
type Engine = LinkEngine<TcpTransport, RefusingCircuitLayer, KeyTrustStore>;

/// Build our configuration from the defaults, then the files in `rc`,
/// then the `key=value` overrides in `opts`.
fn load_config(rc: &[String], opts: &[String]) -> Result<LinkdConfig> {
    let mut cfg = config::Config::new();
    cfg.merge(config::File::from_str(
        LINKD_DEFAULTS,
        config::FileFormat::Toml,
    ))?;
    for f in rc {
        let file: config::File<_> = Path::new(f).into();
        cfg.merge(file.format(config::FileFormat::Toml).required(true))
            .with_context(|| format!("reading configuration from {}", f))?;
    }
    for opt in opts {
        cfg.merge(config::File::from_str(opt, config::FileFormat::Toml))
            .with_context(|| format!("bad option {:?}", opt))?;
    }
    Ok(cfg.try_into()?)
}

/// Open a link to `addr`.
fn connect(engine: &mut Engine, addr: SocketAddr) -> Result<()> {
    let stream = TcpStream::connect(addr).with_context(|| format!("connecting to {}", addr))?;
    let h = engine.launch(TcpTransport::new(stream)?, addr)?;
    info!("Launched link {} to {}", h, addr);
    Ok(())
}

/// Take every connection that's waiting on `listener`.
fn accept_all(engine: &mut Engine, listener: &TcpListener) -> Result<()> {
    loop {
        match listener.accept() {
            Ok((stream, addr)) => {
                let transport = match TcpTransport::new(stream) {
                    Ok(t) => t,
                    Err(e) => {
                        warn!("Couldn't set up connection from {}: {}", addr, e);
                        continue;
                    }
                };
                let h = engine.accept(transport, addr)?;
                info!("Accepted link {} from {}", h, addr);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(e).context("accepting connection"),
        }
    }
}

/// Send a DESTROY for every circuit the circuit layer refused.
fn send_refusals(engine: &mut Engine) {
    for (h, id) in engine.circuits_mut().take_refused() {
        let cell = ChanCell::new(id, Destroy::new(DestroyReason::RESOURCELIMIT).into());
        if let Err(e) = engine.send_cell(h, cell) {
            debug!("Couldn't refuse circuit {} on {}: {}", id, h, e);
        }
    }
}

/// Log a line about every connection.
fn log_status(engine: &Engine) {
    info!("{} connection(s)", engine.n_connections());
    for h in engine.connections() {
        let (id, addr, hs) = match (engine.unique_id(h), engine.peer_addr(h), engine.handshake(h)) {
            (Ok(id), Ok(addr), Ok(hs)) => (id, addr, hs),
            _ => continue,
        };
        info!(
            "{}: {} {:?}, link protocol {}, authenticated {}",
            id,
            addr,
            hs.stage(),
            hs.link_proto(),
            hs.authenticated()
        );
    }
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    let config = load_config(&args.rc, &args.cfg)?;

    let level = match &args.log_level {
        Some(l) => l
            .parse::<LevelFilter>()
            .with_context(|| format!("bad log level {:?}", l))?,
        None if config.trace => LevelFilter::TRACE,
        None => LevelFilter::DEBUG,
    };
    let filt = EnvFilter::from_default_env().add_directive(level.into());
    tracing_subscriber::fmt().with_env_filter(filt).init();

    let trust = KeyTrustStore::generate(&mut rand::rngs::OsRng);
    info!("Our identity is {}", tor_link::TrustStore::own_identity(&trust));

    let mut engine: Engine =
        LinkEngine::new(config.link.clone(), RefusingCircuitLayer::default(), trust)?;

    let listener = match config.listen {
        Some(addr) => {
            let l = TcpListener::bind(addr).with_context(|| format!("binding {}", addr))?;
            l.set_nonblocking(true)?;
            info!("Listening on {}", addr);
            Some(l)
        }
        None => None,
    };
    for addr in &config.connect {
        if let Err(e) = connect(&mut engine, *addr) {
            warn!("{:#}", e);
        }
    }
    if listener.is_none() && engine.n_connections() == 0 {
        info!("Nothing to do: no listen address, and no links opened.");
        return Ok(());
    }

    let mut last_status = Instant::now();
    loop {
        if let Some(l) = &listener {
            accept_all(&mut engine, l)?;
        }
        let reaped = engine.run_once();
        if reaped > 0 {
            debug!("Reaped {} connection(s)", reaped);
        }
        send_refusals(&mut engine);

        if last_status.elapsed() >= STATUS_INTERVAL {
            log_status(&engine);
            last_status = Instant::now();
        }
        std::thread::sleep(config.poll_interval);
    }
}

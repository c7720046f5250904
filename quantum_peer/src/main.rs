//! Quantum Reality peer - one player on a UDP gossip mesh.
//!
//! Reads device-layer commands from stdin and drives a session:
//! - Objects and events are gossiped to the configured peers
//! - Quantum debt survives restarts in a sled store
//! - Rendering and HUD updates are written to the log

use anyhow::{Context, Result};
use clap::Parser;
use quantum_core::{
    spawn_session, Collaborators, DebtStore, MemoryDebtStore, PeerSession, SessionConfig, SledDebtStore,
};
use quantum_env::{PeerId, QuantumContext, TokioContext, UdpGossipChannel, UdpGossipConfig};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{parse_command, Command, HELP};

/// Quantum Reality peer
#[derive(Parser, Debug)]
#[command(name = "quantum-peer")]
#[command(about = "Join a Quantum Reality mesh as one player", long_about = None)]
struct Args {
    /// UDP address to bind
    #[arg(short, long, default_value = "0.0.0.0:7400")]
    bind: SocketAddr,

    /// Peer address to gossip with (repeatable)
    #[arg(short, long = "peer")]
    peers: Vec<SocketAddr>,

    /// Where quantum debt is persisted
    #[arg(long, default_value = "quantum_debt.sled")]
    store: PathBuf,

    /// Keep debt in memory only
    #[arg(long)]
    ephemeral: bool,

    /// JSON file overriding session settings
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the creation cooldown
    #[arg(long)]
    creation_cooldown_ms: Option<u64>,

    /// Override the freeze probability of a Collapser tap
    #[arg(long)]
    freeze_probability: Option<f64>,

    /// Override the prophecy fulfilment threshold
    #[arg(long)]
    prophecy_threshold: Option<u32>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

/// File settings first, then flag overrides.
fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?
        }
        None => SessionConfig::default(),
    };
    if let Some(ms) = args.creation_cooldown_ms {
        config = config.with_creation_cooldown_ms(ms);
    }
    if let Some(p) = args.freeze_probability {
        config = config.with_freeze_probability(p);
    }
    if let Some(threshold) = args.prophecy_threshold {
        config = config.with_prophecy_threshold(threshold);
    }
    Ok(config)
}

fn open_store(args: &Args) -> Result<Arc<dyn DebtStore>> {
    if args.ephemeral {
        return Ok(Arc::new(MemoryDebtStore::new()));
    }
    let store = SledDebtStore::open(&args.store)
        .with_context(|| format!("opening debt store at {}", args.store.display()))?;
    Ok(Arc::new(store))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose when set
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = load_config(&args)?;
    let store = open_store(&args)?;

    let context = TokioContext::shared();
    let peer_id = PeerId::generate(context.now_millis());
    let channel = Arc::new(UdpGossipChannel::new(
        peer_id.clone(),
        UdpGossipConfig::new(args.bind).with_peers(args.peers.clone()),
    ));
    info!(peer = %peer_id, bind = %args.bind, peers = args.peers.len(), "quantum peer starting");

    let session = PeerSession::new(context, channel, store, Collaborators::tracing(), config);
    let (handle, task) = spawn_session(session);

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let Some(line) = lines.next_line().await.context("reading stdin")? else {
            break;
        };

        match parse_command(&line) {
            Ok(Some(Command::Input(input))) => {
                if handle.send(input).is_err() {
                    warn!("session loop has stopped");
                    break;
                }
            }
            Ok(Some(Command::Help)) => println!("{}", HELP),
            Ok(Some(Command::Quit)) => break,
            Ok(None) => {}
            Err(e) => println!("{}", e),
        }
    }

    handle.shutdown();
    let session = task.await.context("session task panicked")?;
    info!(
        peer = %session.peer_id(),
        role = %session.role(),
        debt = session.debt(),
        objects = session.registry().len(),
        "quantum peer stopped"
    );
    Ok(())
}

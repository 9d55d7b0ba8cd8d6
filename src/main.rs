use clap::Parser;
use log::{error, info, warn};
use mnemos::memento::{EntityMemento, LocationMemento, PolicyMemento};
use mnemos::{MementoSource, PersistError, PersistenceConfig, PersistenceRuntime};
use slog::Drain;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;

#[derive(Parser, Debug)]
#[command(name = "mnemos")]
#[command(about = "Management node persistence and HA coordination", long_about = None)]
struct Args {
    /// Node ID (a random one is generated if not given)
    #[arg(short, long)]
    node_id: Option<String>,

    /// Directory of the RocksDB store (shared layout: entities/, locations/, policies/, ha/)
    #[arg(short, long, default_value = "./mnemos-data")]
    data_dir: PathBuf,

    /// Address advertised to other nodes in heartbeats
    #[arg(short = 'a', long)]
    advertise: Option<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    heartbeat_ms: u64,

    /// Heartbeat age in milliseconds after which another node is marked failed
    #[arg(long, default_value_t = 30_000)]
    heartbeat_timeout_ms: u64,

    /// Become master if the cluster has no live master
    #[arg(short, long, default_value_t = false)]
    promote: bool,
}

/// Stand-in for the entity model: this binary only hosts the persistence
/// services, so there are no live objects to generate mementos from.
struct DetachedSource;

impl DetachedSource {
    fn missing(kind: &'static str, id: &str) -> PersistError {
        PersistError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}

impl MementoSource for DetachedSource {
    fn entity_memento(&self, id: &str) -> mnemos::Result<EntityMemento> {
        Err(Self::missing("entity", id))
    }

    fn location_memento(&self, id: &str) -> mnemos::Result<LocationMemento> {
        Err(Self::missing("location", id))
    }

    fn policy_memento(&self, id: &str) -> mnemos::Result<PolicyMemento> {
        Err(Self::missing("policy", id))
    }
}

fn create_logger() -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let args = Args::parse();

    let node_id = args
        .node_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut config = PersistenceConfig::new(node_id)
        .with_rocksdb(args.data_dir.clone())
        .with_heartbeat_interval(Duration::from_millis(args.heartbeat_ms))
        .with_heartbeat_timeout(Duration::from_millis(args.heartbeat_timeout_ms));
    if let Some(advertise) = args.advertise {
        config = config.with_remote_address(advertise);
    }

    info!("Starting node {} with store at {}", config.node_id, args.data_dir.display());
    let runtime =
        PersistenceRuntime::start(config, Arc::new(DetachedSource), create_logger()).await?;

    // A corrupt store must stop startup here rather than run half-rebound
    let graph = runtime.rebind()?;
    info!(
        "Rebound {} entities ({} applications)",
        graph.entities().count(),
        graph.applications().len()
    );

    let failed = runtime.fail_stale_nodes().await?;
    if failed > 0 {
        warn!("Marked {} node(s) as failed", failed);
    }

    if args.promote {
        if runtime.promote_if_no_master().await? {
            info!("This node is master");
        } else {
            info!("Another node is master; staying standby");
        }
    }

    let record = runtime.sync_record()?;
    info!(
        "Cluster view: {} node(s), master = {}",
        record.nodes().len(),
        record.master_node_id().unwrap_or("none")
    );

    let mut events = runtime.subscribe_events();
    info!("Press Ctrl+C to shutdown gracefully");

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => error!("Persistence failure: {:?}", event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Missed {} persistence events", n)
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = signal::ctrl_c() => break,
        }
    }

    // Gracefully shutdown
    runtime.shutdown().await?;

    Ok(())
}

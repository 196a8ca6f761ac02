use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tidesync_core::config::{Config, SyncConfig};
use tidesync_core::core_sync::store::snapshot::{read_file, write_atomic};
use tidesync_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use tidesync_core::{metrics, LoopbackTransport, SyncDriver, SyncEngine};
use tokio::sync::watch;
use tracing::{info, warn};

const REPLICA_EXTENSION: &str = "replica";

#[derive(Parser, Debug)]
#[command(name = "tidesync")]
#[command(author, version, about = "Offline-first replicas that converge on sync", long_about = None)]
struct Args {
    /// Directory holding one replica file per device
    #[arg(short, long, default_value = "~/.tidesync/replicas")]
    dir: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Device to act as; defaults to `sync.device_id` from the configuration
    #[arg(short = 'D', long, global = true)]
    device: Option<String>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
enum Command {
    /// Create an empty replica for the device
    Init,

    /// Write a value
    Set { key: String, value: String },

    /// Delete a key
    Delete { key: String },

    /// Read a value
    Get { key: String },

    /// List live keys, optionally with tombstones
    List {
        #[arg(long)]
        tombstones: bool,
    },

    /// Exchange deltas with peers whose replicas live in the same directory
    Sync {
        #[arg(required = true)]
        peers: Vec<String>,
    },

    /// Sync with peers every configured interval until interrupted
    Run {
        #[arg(required = true)]
        peers: Vec<String>,
    },

    /// Drop tombstones every known peer has seen
    Reap,

    /// Print clock, counts and per-peer progress as JSON
    Inspect,
}

/// Replica files under one directory, `<device>.replica` each
struct ReplicaDir {
    root: PathBuf,
}

impl ReplicaDir {
    fn new(root: impl Into<PathBuf>) -> Self {
        ReplicaDir { root: root.into() }
    }

    fn path(&self, device: &str) -> PathBuf {
        self.root.join(format!("{}.{}", device, REPLICA_EXTENSION))
    }

    fn create(&self, device: &str) -> Result<SyncEngine> {
        let path = self.path(device);
        if path.exists() {
            bail!("replica for {} already exists at {}", device, path.display());
        }
        let engine = SyncEngine::new(device)?;
        self.save(&engine)?;
        Ok(engine)
    }

    fn open(&self, device: &str) -> Result<SyncEngine> {
        let path = self.path(device);
        if !path.exists() {
            bail!("no replica for {} (run `tidesync --device {} init`)", device, device);
        }
        let bytes = read_file(&path)?;
        SyncEngine::restore(device, &bytes).with_context(|| format!("loading {}", path.display()))
    }

    fn save(&self, engine: &SyncEngine) -> Result<()> {
        let path = self.path(engine.device_id());
        write_atomic(&path, &engine.save_state()?)?;
        Ok(())
    }
}

/// Engines for `device` and `peers`, all reachable through one loopback transport
fn connect(
    dir: &ReplicaDir,
    device: &str,
    peers: &[String],
) -> Result<(Arc<LoopbackTransport>, Vec<Arc<SyncEngine>>)> {
    if peers.iter().any(|p| p == device) {
        bail!("{} cannot sync with itself", device);
    }
    let transport = Arc::new(LoopbackTransport::new());
    let mut engines = Vec::with_capacity(peers.len() + 1);
    for id in std::iter::once(device).chain(peers.iter().map(String::as_str)) {
        let engine = Arc::new(dir.open(id)?);
        transport.attach(engine.clone())?;
        engines.push(engine);
    }
    Ok((transport, engines))
}

fn utf8(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// `--device` wins over the configured `sync.device_id`
fn resolve_device(flag: Option<String>, sync: &SyncConfig) -> Result<String> {
    match flag.or_else(|| sync.device_id.clone()) {
        Some(device) => Ok(device),
        None => bail!("no device given: pass --device or set sync.device_id"),
    }
}

/// Execute one command as `device`; returns the lines to print
async fn execute(command: Command, dir: &ReplicaDir, device: &str, sync: &SyncConfig) -> Result<Vec<String>> {
    match command {
        Command::Init => {
            let engine = dir.create(device)?;
            Ok(vec![format!("initialized {} at {}", engine.device_id(), dir.path(device).display())])
        }
        Command::Set { key, value } => {
            let engine = dir.open(device)?;
            engine.set(&key, value)?;
            dir.save(&engine)?;
            Ok(vec![format!("{} = {}", key, utf8(&engine.get(&key)?.unwrap_or_default()))])
        }
        Command::Delete { key } => {
            let engine = dir.open(device)?;
            let deleted = engine.delete(&key)?;
            dir.save(&engine)?;
            Ok(vec![if deleted {
                format!("deleted {}", key)
            } else {
                format!("{} not present", key)
            }])
        }
        Command::Get { key } => {
            let engine = dir.open(device)?;
            match engine.get(&key)? {
                Some(value) => Ok(vec![utf8(&value)]),
                None => bail!("{} not found", key),
            }
        }
        Command::List { tombstones } => {
            let map = dir.open(device)?.map_snapshot()?;
            let mut lines: Vec<String> = map.live().map(|(k, v)| format!("{} = {}", k, utf8(v))).collect();
            if tombstones {
                lines.extend(map.tombstones().map(|e| format!("{} (deleted by {} at {})", e.key, e.writer, e.clock)));
            }
            Ok(lines)
        }
        Command::Sync { peers } => {
            let (transport, engines) = connect(dir, device, &peers)?;
            let driver = SyncDriver::from_config(engines[0].clone(), transport, sync);
            let round = driver.sync_round(&peers).await;

            for engine in &engines {
                dir.save(engine)?;
            }

            let mut lines: Vec<String> = round
                .synced
                .iter()
                .map(|s| {
                    format!(
                        "{}: sent {}, received {}, applied {}, conflicts {}",
                        s.peer, s.sent, s.received, s.applied, s.conflicts
                    )
                })
                .collect();
            if round.reaped > 0 {
                lines.push(format!("reaped {} tombstones", round.reaped));
            }
            if let Some((peer, err)) = round.failed.first() {
                bail!("sync with {} failed: {}", peer, err);
            }
            Ok(lines)
        }
        Command::Run { peers } => {
            let (transport, engines) = connect(dir, device, &peers)?;
            let driver = SyncDriver::from_config(engines[0].clone(), transport, sync);
            let (shutdown_tx, shutdown_rx) = watch::channel(false);

            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("interrupt received, stopping");
                }
                let _ = shutdown_tx.send(true);
            });

            let rounds = driver.run(peers, sync.sync_interval, shutdown_rx).await;
            for engine in &engines {
                dir.save(engine)?;
            }
            Ok(vec![format!("completed {} sync rounds", rounds)])
        }
        Command::Reap => {
            let engine = dir.open(device)?;
            let removed = engine.reap_tombstones()?;
            dir.save(&engine)?;
            Ok(vec![format!("reaped {} tombstones", removed)])
        }
        Command::Inspect => {
            let engine = dir.open(device)?;
            let map = engine.map_snapshot()?;
            let report = serde_json::json!({
                "device": engine.device_id(),
                "clock": map.clock(),
                "live": map.len(),
                "tombstones": map.tombstone_count(),
                "peers": engine.sync_states()?,
            });
            Ok(vec![serde_json::to_string_pretty(&report)?])
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    let config = match path {
        Some(path) => Config::load(path)?,
        None => Config::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let mut log_config = LogConfig::try_from(&config.logging)?;
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>()?;
    }
    init_logging_with_config(log_config.json_format(args.json_logs || config.logging.json_format))?;

    if config.metrics.enabled {
        metrics::init_metrics();
    }

    let device = resolve_device(args.device, &config.sync)?;
    let dir = ReplicaDir::new(shellexpand::tilde(&args.dir).into_owned());
    match execute(args.command, &dir, &device, &config.sync).await {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            Ok(())
        }
        Err(e) => {
            warn!(error = %e, "command failed");
            Err(e)
        }
    }
}

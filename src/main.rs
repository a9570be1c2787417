//! FlashKV Persist - storage maintenance tool
//!
//! Inspects and maintains a storage directory written by any of the three
//! backends: list keys, read a value, check a TTL, delete, flush, and run
//! the expiry sweep once or continuously.

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use flashkv_persist::config::{parse_backend, parse_server_id, StorageConfig};
use flashkv_persist::storage::codec::to_tagged;
use flashkv_persist::storage::{BackendKind, ExpiryConfig, ExpirySweeper, KeyStore, SweepStore};
use flashkv_persist::Server;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter.
const LOG_ENV: &str = "FLASHKV_LOG";

/// What to do once the storage is open.
#[derive(Debug, Clone, PartialEq)]
enum Command {
    Keys { pattern: String },
    Get { key: Bytes },
    Ttl { key: Bytes },
    Del { key: Bytes },
    FlushDb,
    FlushAll,
    Sweep { watch: bool },
}

impl Command {
    fn needs_server(&self) -> bool {
        !matches!(self, Command::FlushAll | Command::Sweep { .. })
    }
}

/// Parsed command line
struct Cli {
    storage: StorageConfig,
    db: u32,
    command: Command,
}

impl Cli {
    /// Parse the command line on top of the environment configuration
    fn from_args(args: &[String], storage: StorageConfig) -> Result<Self> {
        let mut storage = storage;
        let mut db = 0;
        let mut positional = Vec::new();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--dir" | "-d" => {
                    storage.root = PathBuf::from(flag_value(args, i)?);
                    i += 2;
                }
                "--backend" | "-b" => {
                    storage.backend = parse_backend(flag_value(args, i)?)?;
                    i += 2;
                }
                "--server" | "-s" => {
                    storage.server_id = Some(parse_server_id(flag_value(args, i)?)?);
                    i += 2;
                }
                "--db" | "-n" => {
                    db = flag_value(args, i)?
                        .parse()
                        .context("--db expects a non-negative integer")?;
                    i += 2;
                }
                "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "--version" | "-v" => {
                    println!("flashkv-persist version {}", flashkv_persist::VERSION);
                    std::process::exit(0);
                }
                other => {
                    positional.push(other.to_string());
                    i += 1;
                }
            }
        }

        let command = parse_command(&positional)?;
        if command.needs_server() && storage.server_id.is_none() {
            bail!("this command needs --server <ID> (or FLASHKV_SERVER_ID)");
        }

        Ok(Self {
            storage,
            db,
            command,
        })
    }
}

fn flag_value<'a>(args: &'a [String], i: usize) -> Result<&'a str> {
    match args.get(i + 1) {
        Some(value) => Ok(value.as_str()),
        None => bail!("{} requires a value", args[i]),
    }
}

fn parse_command(words: &[String]) -> Result<Command> {
    let key = |name: &str| -> Result<Bytes> {
        match words.get(1) {
            Some(key) => Ok(Bytes::from(key.clone())),
            None => bail!("{name} requires a key"),
        }
    };

    let Some(name) = words.first() else {
        print_help();
        bail!("no command given");
    };

    let command = match name.to_ascii_lowercase().as_str() {
        "keys" => Command::Keys {
            pattern: words.get(1).cloned().unwrap_or_else(|| "*".to_string()),
        },
        "get" => Command::Get { key: key("get")? },
        "ttl" => Command::Ttl { key: key("ttl")? },
        "del" => Command::Del { key: key("del")? },
        "flushdb" => Command::FlushDb,
        "flushall" => Command::FlushAll,
        "sweep" => Command::Sweep {
            watch: words.iter().skip(1).any(|w| w == "--watch" || w == "-w"),
        },
        other => bail!("unknown command '{other}'"),
    };
    Ok(command)
}

fn print_help() {
    println!(
        r#"
FlashKV Persist - storage maintenance tool

USAGE:
    flashkv-persist [OPTIONS] <COMMAND> [ARGS]

COMMANDS:
    keys [PATTERN]     List live keys (default pattern: *)
    get <KEY>          Print a value as tagged JSON
    ttl <KEY>          Print the TTL (-2 missing, -1 no expiry)
    del <KEY>          Delete a key
    flushdb            Delete every key of one database
    flushall           Delete every key under the storage root
    sweep [--watch]    Remove expired .mjson files once, or until Ctrl+C

OPTIONS:
    -d, --dir <PATH>         Storage root (default: $TMPDIR/flashkv)
    -b, --backend <KIND>     file | key | sweep (default: key)
    -s, --server <ID>        Server identity directory
    -n, --db <N>             Database number (default: 0)
    -v, --version            Print version information
        --help               Print this help message

ENVIRONMENT:
    FLASHKV_STORAGE_DIR, FLASHKV_BACKEND, FLASHKV_SERVER_ID,
    FLASHKV_SWEEP_INTERVAL_SECS, FLASHKV_LOG

EXAMPLES:
    flashkv-persist -d ./data -s 127.0.0.1:6379:v7 keys 'user:*'
    flashkv-persist -d ./data -s 127.0.0.1:6379:v7 -n 2 get counter
    flashkv-persist -d ./data sweep --watch
"#
    );
}

fn init_logging() -> Result<()> {
    let directives = std::env::var(LOG_ENV).unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(directives).context("invalid FLASHKV_LOG filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let args: Vec<String> = std::env::args().collect();
    let cli = Cli::from_args(&args, StorageConfig::from_env()?)?;

    match cli.command.clone() {
        Command::Sweep { watch: true } => watch_sweep(&cli.storage).await,
        command => {
            let Cli { storage, db, .. } = cli;
            tokio::task::spawn_blocking(move || run_once(&storage, db, command)).await?
        }
    }
}

/// Runs one blocking command against the configured backend.
fn run_once(storage: &StorageConfig, db: u32, command: Command) -> Result<()> {
    // A one-shot command must not leave a background thread behind
    let store: Arc<dyn KeyStore> = match storage.backend {
        BackendKind::PerKeySweep => Arc::new(SweepStore::new(&storage.root)),
        _ => storage.open()?,
    };
    run_with(storage, db, command, store)
}

fn run_with(
    config: &StorageConfig,
    db: u32,
    command: Command,
    store: Arc<dyn KeyStore>,
) -> Result<()> {
    let server = Server::new(config.server_id(), store);
    let database = server.db(db);

    match command {
        Command::Keys { pattern } => {
            for key in database.scan(&pattern)? {
                println!("{}", String::from_utf8_lossy(&key));
            }
        }
        Command::Get { key } => match database.get_entry(&key)? {
            Some((value, expire_at)) => {
                println!("{}", serde_json::to_string_pretty(&to_tagged(&value))?);
                if let Some(at) = expire_at {
                    println!("expires at {at}");
                }
            }
            None => println!("(nil)"),
        },
        Command::Ttl { key } => println!("{}", database.ttl(&key)?),
        Command::Del { key } => println!("{}", u8::from(database.delete(&key)?)),
        Command::FlushDb => {
            database.flush()?;
            println!("OK");
        }
        Command::FlushAll => {
            server.flush_all()?;
            println!("OK");
        }
        Command::Sweep { .. } => {
            let stats = SweepStore::new(&config.root).sweep_expired()?;
            println!(
                "scanned {} file(s), removed {} expired, {} error(s)",
                stats.scanned, stats.expired, stats.errors
            );
        }
    }
    Ok(())
}

/// Runs the background sweeper until Ctrl+C.
async fn watch_sweep(storage: &StorageConfig) -> Result<()> {
    let store = SweepStore::new(&storage.root);
    let config = ExpiryConfig {
        interval: storage.sweep_interval,
    };
    let sweeper = ExpirySweeper::start(store, config)?;
    info!(
        root = %storage.root.display(),
        interval_ms = storage.sweep_interval.as_millis() as u64,
        "Sweeping until Ctrl+C"
    );

    signal::ctrl_c()
        .await
        .context("failed to install Ctrl+C handler")?;
    info!("Shutdown signal received, stopping sweeper...");

    // Joining the thread blocks
    tokio::task::spawn_blocking(move || drop(sweeper)).await?;
    Ok(())
}

mod cache;
mod config;
mod connectivity;
mod db;
mod error;
mod net;
mod proxy;
mod relay;
mod store;

use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use cache::RegionStorage;
use config::Config;
use db::Database;
use net::HttpTransport;
use relay::Relay;
use store::{Collection, RecordStore, SqliteRecordStore};

type AppRelay = Relay<SqliteRecordStore, HttpTransport>;

#[derive(Parser, Debug)]
#[command(name = "reviewrelay")]
#[command(about = "Offline-first relay for the restaurant reviews app")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/reviewrelay/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the relay proxy (default)
  Serve {
    /// Address to listen on
    #[arg(short, long)]
    listen: Option<SocketAddr>,

    /// API origin to relay to
    #[arg(long)]
    api: Option<Url>,
  },
  /// Pre-populate the shell region from the app origin
  Install,
  /// Purge cache regions from earlier deployments
  Activate,
  /// Deliver queued writes now
  Replay,
  /// List queued writes
  Outbox,
  /// List cache regions and stored collections
  Regions,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let mut config = Config::load(args.config.as_deref())?;

  let command = args.command.unwrap_or(Command::Serve {
    listen: None,
    api: None,
  });

  // Command line overrides the config file
  if let Command::Serve { listen, api } = &command {
    if let Some(listen) = listen {
      config.listen = *listen;
    }
    if let Some(api) = api {
      config.upstream.api = api.clone();
    }
  }

  let _guard = init_tracing(&config)?;

  let relay = Arc::new(build_relay(config)?);

  match command {
    Command::Serve { .. } => serve(relay).await,
    Command::Install => {
      let count = relay.install().await?;
      println!("Installed {} shell documents into {}", count, relay.config().regions.shell);
      Ok(())
    }
    Command::Activate => {
      let purged = relay.activate()?;
      if purged.is_empty() {
        println!("No stale regions");
      }
      for name in purged {
        println!("Purged {}", name);
      }
      Ok(())
    }
    Command::Replay => {
      let report = relay.replay_outbox().await?;
      println!(
        "Attempted {}, delivered {}, retained {}",
        report.attempted,
        report.delivered.len(),
        report.retained.len()
      );
      for retained in &report.retained {
        println!("  {}: {}", retained.key, retained.reason);
      }
      Ok(())
    }
    Command::Outbox => print_outbox(&relay),
    Command::Regions => print_regions(&relay),
  }
}

/// Log to stderr and to a daily rolling file.
///
/// Use RUST_LOG to control the level (e.g. RUST_LOG=reviewrelay=debug).
fn init_tracing(config: &Config) -> Result<WorkerGuard> {
  let log_dir = config.log_dir()?;
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&log_dir, "reviewrelay.log");
  let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(io::stderr))
    .with(fmt::layer().with_ansi(false).with_writer(file_writer))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn build_relay(config: Config) -> Result<AppRelay> {
  let db = Arc::new(Database::open(config.database_path())?);
  let transport = HttpTransport::new(config.timeout())
    .map_err(|e| eyre!("Failed to build HTTP client: {}", e))?;

  Ok(Relay::new(
    config,
    RegionStorage::new(Arc::clone(&db)),
    SqliteRecordStore::new(db),
    transport,
  ))
}

async fn serve(relay: Arc<AppRelay>) -> Result<()> {
  if !relay.shell_installed()? {
    match relay.install().await {
      Ok(count) => info!(documents = count, "Shell installed at startup"),
      // Not fatal: pages are cached on first visit instead
      Err(e) => warn!(error = %e, "Shell install failed"),
    }
  }
  relay.activate()?;

  let monitor = connectivity::spawn_monitor(Arc::clone(&relay), relay.config().probe_interval());
  let listen = relay.config().listen;

  let result = tokio::select! {
    result = proxy::run(Arc::clone(&relay), listen) => result,
    _ = tokio::signal::ctrl_c() => {
      info!("Shutting down");
      Ok(())
    }
  };

  monitor.abort();
  result
}

fn print_outbox(relay: &AppRelay) -> Result<()> {
  let entries = relay.queued_writes()?;
  if entries.is_empty() {
    println!("Outbox is empty");
    return Ok(());
  }

  for entry in entries {
    println!(
      "{}  {}  restaurant={}  author={}  rating={}",
      entry.created_at.format("%Y-%m-%d %H:%M:%S"),
      entry.key,
      entry.restaurant_id.as_deref().unwrap_or("-"),
      entry.author.as_deref().unwrap_or("-"),
      entry.rating.as_deref().unwrap_or("-"),
    );
  }
  Ok(())
}

fn print_regions(relay: &AppRelay) -> Result<()> {
  let current = relay.config().current_regions();

  println!("Cache regions:");
  for info in relay.regions().describe()? {
    let marker = if current.contains(&info.name) { "*" } else { " " };
    println!("{} {:<24} {:>6} entries", marker, info.name, info.entries);
  }

  println!("Collections:");
  for collection in Collection::ALL {
    println!("  {:<24} {:>6} records", collection.name(), relay.store().count(collection)?);
  }
  Ok(())
}

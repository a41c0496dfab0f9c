use clap::{Parser, Subcommand};
use color_eyre::{eyre::eyre, Result};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use tms_sync::config::{Config, Credentials};
use tms_sync::presenter::TracingPresenter;
use tms_sync::realtime::PhoenixFeed;
use tms_sync::remote::filter::parse_filter_arg;
use tms_sync::remote::{Query, RestStore, Table};
use tms_sync::Session;

#[derive(Parser, Debug)]
#[command(name = "tms-sync")]
#[command(about = "Sync the TMS dataset from its backend and follow live changes")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/tms-sync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Load every collection and print row counts
  Load {
    /// Ignore the cache
    #[arg(long)]
    force: bool,
  },
  /// Fetch rows from one table as JSON
  Fetch {
    table: String,
    /// Columns to return
    #[arg(long)]
    select: Option<String>,
    /// Filter as field=op.value, e.g. status=eq.active (repeatable)
    #[arg(short, long = "filter")]
    filters: Vec<String>,
    /// Sort as field or field.desc
    #[arg(short, long)]
    order: Option<String>,
  },
  /// Load, then follow realtime changes until Ctrl-C
  Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = init_logging(args.verbose)?;

  let config = Config::load(args.config.as_deref())?;
  let credentials = Credentials::from_env()?;

  let store = RestStore::new(&config.backend, &credentials)?;
  let presenter = Arc::new(TracingPresenter::new(config.sync.conflict_resolution));
  let session = Session::new(store, presenter, &config.sync);

  match args.command {
    Command::Load { force } => {
      let outcome = session.load_all(force).await?;
      if let Some(secondary) = outcome.secondary {
        secondary.await?;
      }
      for (table, count) in session.dataset().counts() {
        println!("{:<22} {}", table, count);
      }
    }
    Command::Fetch {
      table,
      select,
      filters,
      order,
    } => {
      let table: Table = table.parse()?;
      let filters = filters
        .iter()
        .map(|arg| parse_filter_arg(arg))
        .collect::<tms_sync::Result<BTreeMap<_, _>>>()?;
      let query = Query::parse(select.as_deref(), &filters, order.as_deref());

      let rows = session.fetch(table, &query).await?;
      println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Command::Watch => {
      let outcome = session.load_all(true).await?;
      if let Some(secondary) = outcome.secondary {
        secondary.await?;
      }

      let feed = PhoenixFeed::new(&config.backend, &credentials, config.sync.heartbeat())?;
      let mut listener = session.realtime(Some(Arc::new(feed)));
      listener.start().await?;
      eprintln!("Watching for changes. Press Ctrl-C to stop.");

      tokio::signal::ctrl_c().await?;
      listener.stop();
    }
  }

  Ok(())
}

/// Log to a daily file under the data directory, and to stderr if asked.
fn init_logging(verbose: bool) -> Result<WorkerGuard> {
  let log_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?
    .join("tms-sync");
  std::fs::create_dir_all(&log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&log_dir, "tms-sync.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("tms_sync=info"));
  let stderr = verbose.then(|| fmt::layer().with_writer(std::io::stderr));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(stderr)
    .init();

  Ok(guard)
}

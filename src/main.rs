use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use bursst_cache::{
  ClientMessage, Config, Event, FetchOutcome, Request, ReqwestNetwork, Router, SqliteBackend,
  SyncQueue,
};
use bursst_cache::{CacheStoreRegistry, Network, StoreBackend};

#[derive(Parser, Debug)]
#[command(name = "bursst-cache")]
#[command(about = "Offline request cache: classify, serve and sync like the app's service layer")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/bursst-cache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Populate the versioned precache from the manifest
  Install,
  /// Reap stale store generations and go active
  Activate,
  /// Route one GET request through the cache layer
  Fetch { url: String },
  /// Drain the deferred-write queue against the network
  Sync,
  /// Broadcast a feed-refresh notification to connected clients
  Refresh,
  /// Delete the runtime store
  Clear,
  /// List cache store names and entry counts
  Stores,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;
  let _guard = init_tracing();

  let args = Args::parse();
  let config = Config::load(args.config.as_deref())?;

  let backend: Arc<dyn StoreBackend> = Arc::new(SqliteBackend::open_default()?);
  let registry = CacheStoreRegistry::new(backend);
  let network: Arc<dyn Network> = Arc::new(ReqwestNetwork::new());
  let queue = Arc::new(SyncQueue::open_default()?);
  let router = Router::new(config, registry.clone(), network, queue);

  match args.command {
    Command::Install => {
      router.dispatch(Event::Install).await?;
      println!("installed, precache ready");
    }
    Command::Activate => {
      router.dispatch(Event::Activate).await?;
      println!("active");
    }
    Command::Fetch { url } => {
      let url = url::Url::parse(&url)?;
      let outcome = router.handle_fetch(&Request::get(url)).await?;
      router.background_settled().await?;
      report_outcome(outcome);
    }
    Command::Sync => {
      router
        .dispatch(Event::Sync(bursst_cache::router::SYNC_STATE_TAG.to_string()))
        .await?;
      println!("sync drained");
    }
    Command::Refresh => {
      router
        .dispatch(Event::PeriodicSync(
          bursst_cache::router::REFRESH_FEEDS_TAG.to_string(),
        ))
        .await?;
      println!("refresh broadcast");
    }
    Command::Clear => {
      router
        .dispatch(Event::Message(ClientMessage::ClearCache))
        .await?;
      println!("runtime store cleared");
    }
    Command::Stores => {
      for name in registry.list_names()? {
        let store = registry.open(&name)?;
        println!("{}\t{} entries", name, store.keys()?.len());
      }
    }
  }

  Ok(())
}

fn report_outcome(outcome: FetchOutcome) {
  match outcome {
    FetchOutcome::Passthrough => println!("not intercepted, pass through"),
    FetchOutcome::Response(response) => {
      println!(
        "{} {} ({} bytes)",
        response.status,
        response.content_type().unwrap_or("unknown"),
        response.body.len()
      );
    }
    FetchOutcome::NoResponse => println!("offline with no cached entry"),
  }
}

/// Log to a file under the data dir; the returned guard must stay alive for
/// the process lifetime so buffered lines are flushed.
fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
  let log_dir = dirs::data_dir()
    .map(|d| d.join("bursst-cache"))
    .unwrap_or_else(|| PathBuf::from("."));
  std::fs::create_dir_all(&log_dir).ok();

  let appender = tracing_appender::rolling::never(log_dir, "bursst-cache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .with_writer(writer)
    .with_ansi(false)
    .init();

  guard
}

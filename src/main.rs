use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use lookcache::cache::{CacheStorage, MemoryStorage, SqliteStorage};
use lookcache::config::Config;
use lookcache::http::FetchRequest;
use lookcache::network::HttpFetcher;
use lookcache::policy::Scope;
use lookcache::registration::Registration;
use lookcache::server;
use lookcache::worker::VersionBuilder;

#[derive(Parser, Debug)]
#[command(name = "lookcache")]
#[command(about = "Offline cache proxy for the lookbook frontend")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/lookcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Keep the cache in memory instead of the SQLite database
  #[arg(long)]
  memory: bool,

  #[command(subcommand)]
  command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Run the proxy as a local HTTP front (default)
  Serve {
    /// Listen address, overrides the config file
    #[arg(short, long)]
    listen: Option<String>,
  },
  /// Install the configured version and activate it
  Install,
  /// Send one GET request through the configured version and print the body
  Fetch {
    /// Absolute URL or path relative to the origin
    url: String,
  },
  /// List cache generations and their entry counts
  Caches,
}

/// Initialize the tracing subscriber for logging.
///
/// RUST_LOG controls the level (default: info). Logs go to stderr, and to a
/// daily file in the data directory when `log_file` is enabled.
fn init_tracing(config: &Config) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  let (file_layer, guard) = if config.log_file {
    let appender = tracing_appender::rolling::daily(Config::data_dir()?, "lookcache.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    (
      Some(fmt::layer().with_writer(writer).with_ansi(false)),
      Some(guard),
    )
  } else {
    (None, None)
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr))
    .with(file_layer)
    .init();

  Ok(guard)
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let mut config = Config::load(args.config.as_deref())?;
  let command = args.command.unwrap_or(Command::Serve { listen: None });
  if let Command::Serve {
    listen: Some(listen),
  } = &command
  {
    config.listen = listen.clone();
    config.listen_addr()?;
  }

  let _guard = init_tracing(&config)?;
  info!(origin = %config.origin, cache = %config.cache.generation_name(), "lookcache starting");

  if args.memory {
    run(config, command, Arc::new(MemoryStorage::new())).await
  } else {
    let path = config.cache.database_path()?;
    info!(path = %path.display(), "opening cache database");
    run(config, command, Arc::new(SqliteStorage::open(&path)?)).await
  }
}

async fn run<S: CacheStorage + 'static>(
  config: Config,
  command: Command,
  storage: Arc<S>,
) -> Result<()> {
  let origin = config.origin_url()?;
  let scope = Scope::new(&origin, &config.scope)?;
  let network = Arc::new(HttpFetcher::new(config.network.timeout())?);
  let versions = Arc::new(VersionBuilder::new(
    config.cache.prefix.clone(),
    scope.clone(),
    Arc::clone(&storage),
    network,
  ));
  let proxy = versions.build(config.cache.version);

  match command {
    Command::Serve { .. } => {
      let registration = Arc::new(Registration::new(
        Arc::clone(versions.network()),
        config.lifecycle.skip_waiting_on_install,
      ));
      registration.register(proxy).await?;
      server::run_server(config.listen_addr()?, registration, versions, origin).await
    }
    Command::Install => {
      let registration = Registration::new(Arc::clone(versions.network()), true);
      let state = registration.register(proxy).await?;
      let name = config.cache.generation_name();
      println!("{} {} ({} entries)", name, state, storage.entry_count(&name)?);
      Ok(())
    }
    Command::Fetch { url } => {
      let request = FetchRequest::get(scope.resolve(&url)?);
      let outcome = proxy.handle_fetch(&request).await?;
      eprintln!("{} ({})", outcome.response.status, outcome.source.as_str());
      std::io::stdout().write_all(&outcome.response.body)?;
      Ok(())
    }
    Command::Caches => {
      let current = config.cache.generation_name();
      for name in storage.generations()? {
        let marker = if name == current { " *" } else { "" };
        println!("{}\t{}{}", name, storage.entry_count(&name)?, marker);
      }
      Ok(())
    }
  }
}

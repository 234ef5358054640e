mod commands;

use cachesync::config::Config;
use clap::Parser;
use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cachesync")]
#[command(about = "Inspect and maintain a cachesync cache")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/cachesync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Namespace to operate on
  #[arg(short, long)]
  namespace: Option<String>,

  /// Storage backend: durable, session, memory-shared or memory-private
  #[arg(short, long)]
  backend: Option<String>,

  #[command(subcommand)]
  command: commands::Command,
}

fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Command line overrides
  let config = Config {
    namespace: args.namespace.unwrap_or(config.namespace),
    backend: args.backend.unwrap_or(config.backend),
    ..config
  };

  let backends = config.backends()?;
  let _guard = init_logging(backends.database())?;

  let store = config.open_store(&backends)?;
  if let Some(output) = commands::run(&store, args.command)? {
    println!("{}", serde_json::to_string_pretty(&output)?);
  }

  Ok(())
}

/// Log to `cachesync.log` next to the database. Filter with CACHESYNC_LOG.
fn init_logging(database: &Path) -> Result<WorkerGuard> {
  let dir = database
    .parent()
    .filter(|dir| !dir.as_os_str().is_empty())
    .unwrap_or_else(|| Path::new("."));
  std::fs::create_dir_all(dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(
    dir,
    "cachesync.log",
  ));
  let filter = EnvFilter::try_from_env("CACHESYNC_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(guard)
}

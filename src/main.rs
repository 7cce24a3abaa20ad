mod app;
mod cache;
mod config;
mod control;
mod critical;
mod db;
mod engine;
mod event;
mod lifecycle;
mod net;
mod notify;
mod router;
mod sync;

#[cfg(test)]
mod testing;

use clap::Parser;
use color_eyre::Result;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "mindcache")]
#[command(about = "Offline cache and background sync engine for a mental-health web app")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./mindcache.yaml, then $XDG_CONFIG_HOME/mindcache/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Directory holding the cache database and logs
  #[arg(short, long)]
  data_dir: Option<PathBuf>,

  /// Application origin to intercept
  #[arg(short, long)]
  origin: Option<String>,

  /// Log to stderr instead of a file in the data directory
  #[arg(long)]
  log_stderr: bool,

  /// Keep the cache in memory; nothing survives a restart
  #[arg(long)]
  in_memory: bool,
}

/// Logs never go to stdout, which carries the host protocol.
fn init_tracing(data_dir: &Path, to_stderr: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_env("MINDCACHE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

  if to_stderr {
    tracing_subscriber::fmt()
      .with_env_filter(filter)
      .with_writer(std::io::stderr)
      .init();
    return Ok(None);
  }

  std::fs::create_dir_all(data_dir)?;
  let appender = tracing_appender::rolling::daily(data_dir, "mindcache.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(false)
    .init();

  Ok(Some(guard))
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  let mut config = config::Config::load(args.config.as_deref())?;
  if let Some(origin) = args.origin {
    config.origin = origin;
  }
  if let Some(dir) = args.data_dir {
    config.data_dir = Some(dir);
  }
  let origin = config.origin()?;
  let data_dir = config.data_dir()?;

  let _guard = init_tracing(&data_dir, args.log_stderr)?;
  tracing::info!(%origin, generation = %config.generation.version, "Starting mindcache");

  let db = if args.in_memory {
    db::Database::open_in_memory()?
  } else {
    db::Database::open(&data_dir.join("mindcache.db"))?
  };

  let engine = engine::CacheEngine::open(&config, db)?;
  let app = app::App::new(engine, origin);
  app.run(tokio::io::stdin(), tokio::io::stdout()).await?;

  Ok(())
}

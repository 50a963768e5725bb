use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Logs go to `<log_dir>/mgnrega-offline.log` so stdout stays clean for
/// command output; `verbose` mirrors them to stderr. Use RUST_LOG to
/// control the level (e.g., RUST_LOG=mgnrega_offline=debug).
///
/// Keep the returned guard alive until exit or buffered lines are lost.
pub fn init(log_dir: &Path, verbose: bool) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::never(log_dir, "mgnrega-offline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .with(verbose.then(|| fmt::layer().with_writer(std::io::stderr)))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

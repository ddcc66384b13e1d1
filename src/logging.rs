use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Default level for this crate by `-v` count; other crates stay at warn.
fn default_directive(verbosity: u8) -> String {
  let level = match verbosity {
    0 => "warn",
    1 => "info",
    2 => "debug",
    _ => "trace",
  };
  format!("warn,cmdb_mgr={}", level)
}

/// Install the global subscriber, writing to stderr or to `log_file`.
///
/// RUST_LOG overrides the verbosity flag. The returned guard flushes pending
/// lines on drop and must be held until exit.
pub fn init(verbosity: u8, log_file: Option<&Path>) -> Result<WorkerGuard> {
  let filter = EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));

  let (writer, guard) = match log_file {
    Some(path) => {
      let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
      let name = path
        .file_name()
        .ok_or_else(|| eyre!("Invalid log file path: {}", path.display()))?;
      tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name))
    }
    None => tracing_appender::non_blocking(std::io::stderr()),
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(log_file.is_none())
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

mod api;
mod cache;
mod config;
mod error;
mod loader;
mod logging;
mod target;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use crate::api::LazyClient;
use crate::cache::{CacheStorage, NoopStorage, ResourceMap};
use crate::loader::{LoadOptions, Loader};

#[derive(Parser, Debug)]
#[command(name = "cmdb-mgr")]
#[command(about = "Bulk operations against a CMDB REST API")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./cmdb-mgr.yaml or $XDG_CONFIG_HOME/cmdb-mgr/config.yaml)
  #[arg(short, long, env = "CMDB_MGR_CONFIGFILE")]
  config: Option<PathBuf>,

  /// Increase log verbosity (-v info, -vv debug, -vvv trace)
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Read CMDB objects named by target files
  Read(ReadArgs),
}

#[derive(clap::Args, Debug)]
struct ReadArgs {
  /// Target files to read, relative to the targets directory (default: `targets.files` in the config)
  #[arg(short = 't', long = "targetfile")]
  targetfiles: Vec<String>,

  /// Do not read cached data
  #[arg(long)]
  no_cache: bool,

  /// Fetch everything from the API and rewrite the cache
  #[arg(long)]
  refresh: bool,

  /// Max records to print (default: all)
  #[arg(long)]
  max_records: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    Command::Read(read) => run_read(&config, read).await,
  }
}

async fn run_read(config: &config::Config, args: ReadArgs) -> Result<()> {
  let targetfiles = config.target_paths(&args.targetfiles)?;
  let use_cache = !args.no_cache;

  // A refresh needs the directory even when cached reads are disabled
  let storage: Box<dyn CacheStorage> = if use_cache || args.refresh {
    Box::new(config.storage())
  } else {
    Box::new(NoopStorage)
  };

  let options = LoadOptions {
    use_cache,
    refresh_cache: args.refresh,
    max_concurrent_requests: config.api.concurrency(),
  };
  let loader = Loader::new(storage, LazyClient::new(config.api.clone()), options);

  let loaded = loader.load_files(&targetfiles).await?;
  tracing::info!(
    requested = loaded.report.requested,
    hits = loaded.report.hits,
    fetched = loaded.report.fetched,
    refreshed = loaded.report.refreshed,
    "Load complete"
  );

  let shown = limit(loaded.resources, args.max_records);
  println!("{}", serde_json::to_string_pretty(&shown)?);
  Ok(())
}

/// Keep at most `max` entries, in identifier order.
fn limit(resources: ResourceMap, max: Option<usize>) -> ResourceMap {
  match max {
    Some(max) => resources.into_iter().take(max).collect(),
    None => resources,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_limit() {
    let resources: ResourceMap = (0..5).map(|i| (format!("r{}", i), json!(i))).collect();

    assert_eq!(limit(resources.clone(), None).len(), 5);
    let limited = limit(resources, Some(2));
    assert_eq!(limited.keys().collect::<Vec<_>>(), vec!["r0", "r1"]);
  }

  #[test]
  fn test_read_flags() {
    let args = Args::try_parse_from([
      "cmdb-mgr",
      "read",
      "-t",
      "devices.json",
      "--targetfile",
      "ips.yaml",
      "--refresh",
      "--max-records",
      "10",
    ])
    .unwrap();

    let Command::Read(read) = args.command;
    assert_eq!(read.targetfiles, vec!["devices.json", "ips.yaml"]);
    assert!(read.refresh);
    assert!(!read.no_cache);
    assert_eq!(read.max_records, Some(10));
  }
}

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::ApiSettings;
use crate::cache::{CorruptPolicy, DirStorage, DEFAULT_CACHE_FILE};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub targets: TargetsConfig,
  pub cache: CacheConfig,
  /// Connection settings; anything missing falls back to CMDB_API_* env vars
  #[serde(default)]
  pub api: ApiSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TargetsConfig {
  /// Directory target file names are resolved against
  pub dir: PathBuf,
  /// Target files read when none are given on the command line
  #[serde(default)]
  pub files: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  pub dir: PathBuf,
  /// Name of the canonical cache file inside `dir`
  #[serde(default = "default_cache_file")]
  pub file: String,
  #[serde(default)]
  pub on_corrupt: CorruptPolicy,
}

fn default_cache_file() -> String {
  DEFAULT_CACHE_FILE.to_string()
}

fn validate_file(path: &Path) -> Result<()> {
  if !path.exists() {
    return Err(eyre!("{}: file does not exist", path.display()));
  }
  if !path.is_file() {
    return Err(eyre!("{}: not a file", path.display()));
  }
  Ok(())
}

fn validate_dir(path: &Path) -> Result<()> {
  if !path.exists() {
    return Err(eyre!("{}: directory does not exist", path.display()));
  }
  if !path.is_dir() {
    return Err(eyre!("{}: not a directory", path.display()));
  }
  Ok(())
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (flag or CMDB_MGR_CONFIGFILE)
  /// 2. ./cmdb-mgr.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/cmdb-mgr/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Pass --config, set CMDB_MGR_CONFIGFILE, \
         or create ~/.config/cmdb-mgr/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("cmdb-mgr.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("cmdb-mgr").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    tracing::info!(path = %path.display(), "Loading config file");

    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config = Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    config.validate()?;
    Ok(config)
  }

  fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    serde_yaml::from_str(contents)
  }

  /// Check that the configured directories and default target files exist.
  ///
  /// The cache directory may be missing; it is created on first refresh.
  pub fn validate(&self) -> Result<()> {
    validate_dir(&self.targets.dir)?;
    for name in &self.targets.files {
      validate_file(&self.targets.dir.join(name))?;
    }

    if self.cache.dir.exists() && !self.cache.dir.is_dir() {
      return Err(eyre!("{}: not a directory", self.cache.dir.display()));
    }
    Ok(())
  }

  /// Target file paths for a run.
  ///
  /// User-supplied names are resolved against the targets directory and must
  /// exist; without any, the configured defaults are used.
  pub fn target_paths(&self, supplied: &[String]) -> Result<Vec<PathBuf>> {
    if supplied.is_empty() {
      return Ok(
        self
          .targets
          .files
          .iter()
          .map(|name| self.targets.dir.join(name))
          .collect(),
      );
    }

    supplied
      .iter()
      .map(|name| -> Result<PathBuf> {
        let path = self.targets.dir.join(name);
        validate_file(&path)?;
        Ok(path)
      })
      .collect()
  }

  /// Directory storage described by the `cache` section.
  pub fn storage(&self) -> DirStorage {
    DirStorage::new(&self.cache.dir)
      .with_file_name(&self.cache.file)
      .with_corrupt_policy(self.cache.on_corrupt)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_config(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("config.yaml");
    std::fs::write(&path, body).unwrap();
    path
  }

  fn fixture() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let targets = dir.path().join("targets");
    std::fs::create_dir(&targets).unwrap();
    std::fs::write(targets.join("devices.json"), "{}").unwrap();
    let body = format!(
      "targets:\n  dir: {}\n  files: [devices.json]\ncache:\n  dir: {}\napi:\n  host: cmdb.example.com\n  port: 443\n",
      targets.display(),
      dir.path().join("cache").display()
    );
    let path = write_config(dir.path(), &body);
    (dir, path)
  }

  #[test]
  fn test_load_with_defaults() {
    let (_dir, path) = fixture();
    let config = Config::load(Some(path.as_path())).unwrap();

    assert_eq!(config.cache.file, DEFAULT_CACHE_FILE);
    assert_eq!(config.cache.on_corrupt, CorruptPolicy::Fail);
    assert_eq!(config.api.host.as_deref(), Some("cmdb.example.com"));
    assert_eq!(config.api.port, Some(443));
    assert!(config.api.username.is_none());
  }

  #[test]
  fn test_explicit_path_must_exist() {
    let dir = TempDir::new().unwrap();
    let err = Config::load(Some(dir.path().join("missing.yaml").as_path())).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_missing_default_target_file_is_rejected() {
    let dir = TempDir::new().unwrap();
    let body = format!(
      "targets:\n  dir: {}\n  files: [absent.json]\ncache:\n  dir: {}\n",
      dir.path().display(),
      dir.path().display()
    );
    let path = write_config(dir.path(), &body);

    let err = Config::load(Some(path.as_path())).unwrap_err();
    assert!(err.to_string().contains("absent.json: file does not exist"));
  }

  #[test]
  fn test_corrupt_policy_parses() {
    let config = Config::parse(
      "targets:\n  dir: /tmp\ncache:\n  dir: /tmp\n  file: store.cache\n  on_corrupt: skip\n",
    )
    .unwrap();
    assert_eq!(config.cache.on_corrupt, CorruptPolicy::Skip);
    assert_eq!(config.cache.file, "store.cache");
  }

  #[test]
  fn test_target_paths() {
    let (dir, path) = fixture();
    let config = Config::load(Some(path.as_path())).unwrap();
    let targets = dir.path().join("targets");

    assert_eq!(
      config.target_paths(&[]).unwrap(),
      vec![targets.join("devices.json")]
    );
    assert_eq!(
      config.target_paths(&["devices.json".to_string()]).unwrap(),
      vec![targets.join("devices.json")]
    );
    assert!(config.target_paths(&["nope.json".to_string()]).is_err());
  }
}

//! Cache storage trait and directory-backed implementation.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use super::format::{self, CacheFileFormat};
use super::ResourceMap;
use crate::error::{Error, Result};
use crate::target::ResourceId;

/// Default name of the canonical durable cache file
pub const DEFAULT_CACHE_FILE: &str = "cmdb.cache";

/// What `load` does when it meets a cache file it cannot decode.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CorruptPolicy {
  /// Abort the load with a CacheCorrupt error
  #[default]
  Fail,
  /// Log a warning and ignore the file
  Skip,
}

/// Trait for cache storage backends.
pub trait CacheStorage: Send + Sync {
  /// Read cached entries. A non-empty `keys` restricts the result to those keys.
  fn load(&self, keys: &BTreeSet<ResourceId>) -> Result<ResourceMap>;

  /// Merge entries into the persisted store (new values win).
  fn refresh(&self, entries: &ResourceMap) -> Result<()>;

  /// Whether the canonical store has been written yet.
  fn exists(&self) -> bool;
}

impl<S: CacheStorage + ?Sized> CacheStorage for Box<S> {
  fn load(&self, keys: &BTreeSet<ResourceId>) -> Result<ResourceMap> {
    (**self).load(keys)
  }

  fn refresh(&self, entries: &ResourceMap) -> Result<()> {
    (**self).refresh(entries)
  }

  fn exists(&self) -> bool {
    (**self).exists()
  }
}

/// Storage implementation that doesn't cache anything.
/// Used when caching is disabled - all operations are no-ops.
pub struct NoopStorage;

impl CacheStorage for NoopStorage {
  fn load(&self, _keys: &BTreeSet<ResourceId>) -> Result<ResourceMap> {
    Ok(ResourceMap::new()) // Always miss
  }

  fn refresh(&self, _entries: &ResourceMap) -> Result<()> {
    Ok(()) // Discard
  }

  fn exists(&self) -> bool {
    true // Nothing to initialize
  }
}

/// Directory of cache files.
///
/// Reads every durable snapshot and legacy record in the directory; writes
/// only the canonical snapshot file. Access to one directory must be
/// serialized by the caller.
#[derive(Debug, Clone)]
pub struct DirStorage {
  dir: PathBuf,
  file_name: String,
  on_corrupt: CorruptPolicy,
}

impl DirStorage {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self {
      dir: dir.into(),
      file_name: DEFAULT_CACHE_FILE.to_string(),
      on_corrupt: CorruptPolicy::default(),
    }
  }

  /// Set the canonical file name. It is always treated as a durable snapshot.
  pub fn with_file_name(mut self, file_name: impl Into<String>) -> Self {
    self.file_name = file_name.into();
    self
  }

  pub fn with_corrupt_policy(mut self, on_corrupt: CorruptPolicy) -> Self {
    self.on_corrupt = on_corrupt;
    self
  }

  /// Path of the canonical snapshot file.
  pub fn canonical_path(&self) -> PathBuf {
    self.dir.join(&self.file_name)
  }

  fn format_of(&self, path: &Path) -> Option<CacheFileFormat> {
    if path.file_name().and_then(|n| n.to_str()) == Some(self.file_name.as_str()) {
      return Some(CacheFileFormat::Durable);
    }
    CacheFileFormat::from_path(path)
  }

  /// List cache files in name order with the canonical file last, so its
  /// entries win over any older file.
  fn cache_files(&self) -> Result<Vec<(PathBuf, CacheFileFormat)>> {
    let read_dir = match std::fs::read_dir(&self.dir) {
      Ok(read_dir) => read_dir,
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
      Err(e) => {
        return Err(Error::io(
          format!("Failed to read cache directory {}", self.dir.display()),
          e,
        ))
      }
    };

    let canonical = self.canonical_path();
    let mut files = Vec::new();
    for entry in read_dir {
      let path = entry
        .map_err(|e| Error::io(format!("Failed to scan {}", self.dir.display()), e))?
        .path();
      if !path.is_file() || path == canonical {
        continue;
      }
      if let Some(kind) = self.format_of(&path) {
        files.push((path, kind));
      }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    if canonical.is_file() {
      files.push((canonical, CacheFileFormat::Durable));
    }
    Ok(files)
  }

  /// Decode and merge the given files; later files overwrite earlier ones.
  fn read_files(
    &self,
    files: &[(PathBuf, CacheFileFormat)],
    on_corrupt: CorruptPolicy,
  ) -> Result<ResourceMap> {
    let mut merged = ResourceMap::new();
    for (path, kind) in files {
      let bytes = std::fs::read(path)
        .map_err(|e| Error::io(format!("Failed to read cache file {}", path.display()), e))?;

      match format::decode(path, *kind, &bytes) {
        Ok(entries) => {
          tracing::debug!(path = %path.display(), ?kind, count = entries.len(), "Read cache file");
          merged.extend(entries);
        }
        Err(e) if on_corrupt == CorruptPolicy::Skip => {
          tracing::warn!(error = %e, "Skipping unreadable cache file");
        }
        Err(e) => return Err(e),
      }
    }
    Ok(merged)
  }
}

impl CacheStorage for DirStorage {
  fn load(&self, keys: &BTreeSet<ResourceId>) -> Result<ResourceMap> {
    let files = self.cache_files()?;
    if files.is_empty() {
      return Ok(ResourceMap::new());
    }

    let mut data = self.read_files(&files, self.on_corrupt)?;
    if !keys.is_empty() {
      data.retain(|uri, _| keys.contains(uri));
    }
    Ok(data)
  }

  fn refresh(&self, entries: &ResourceMap) -> Result<()> {
    std::fs::create_dir_all(&self.dir).map_err(|e| {
      Error::io(
        format!("Failed to create cache directory {}", self.dir.display()),
        e,
      )
    })?;

    // Only durable snapshots are carried forward; never skip a corrupt one
    // here or the rewrite would drop its entries.
    let durable: Vec<_> = self
      .cache_files()?
      .into_iter()
      .filter(|(_, kind)| *kind == CacheFileFormat::Durable)
      .collect();
    let mut merged = self.read_files(&durable, CorruptPolicy::Fail)?;
    let previous = merged.len();
    merged.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));

    let path = self.canonical_path();
    let count = merged.len();
    let bytes = format::encode_snapshot(&path, &merged)?;

    let write_err = |e| Error::io(format!("Failed to write cache file {}", path.display()), e);
    let mut tmp = NamedTempFile::new_in(&self.dir).map_err(write_err)?;
    tmp.write_all(&bytes).map_err(write_err)?;
    tmp.as_file().sync_all().map_err(write_err)?;
    tmp.persist(&path).map_err(|e| write_err(e.error))?;

    tracing::info!(
      path = %path.display(),
      previous,
      written = count,
      "Refreshed cache"
    );
    Ok(())
  }

  fn exists(&self) -> bool {
    self.canonical_path().is_file()
  }
}

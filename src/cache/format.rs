//! On-disk formats found in a cache directory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use sha2::{Digest, Sha256};
use std::path::Path;

use super::ResourceMap;
use crate::error::{Error, Result};

/// Current version of the durable snapshot envelope
pub const SNAPSHOT_VERSION: u32 = 1;

/// Extension of durable whole-store snapshots
pub const DURABLE_EXTENSION: &str = "cache";

/// Extension of legacy plain-record files
pub const LEGACY_EXTENSION: &str = "json";

/// Kind of cache file, decided by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheFileFormat {
  /// Whole-store snapshot, rewritten atomically on refresh
  Durable,
  /// One plain uri -> payload mapping per file. Read-only.
  LegacyRecord,
}

impl CacheFileFormat {
  /// Returns None for files that are not cache files at all.
  pub fn from_path(path: &Path) -> Option<Self> {
    match path.extension().and_then(|e| e.to_str()) {
      Some(DURABLE_EXTENSION) => Some(Self::Durable),
      Some(LEGACY_EXTENSION) => Some(Self::LegacyRecord),
      _ => None,
    }
  }
}

/// Envelope of a durable snapshot file.
#[derive(Debug, Serialize, Deserialize)]
pub struct Snapshot {
  pub version: u32,
  pub written_at: DateTime<Utc>,
  /// Hex SHA-256 of the `entries` text exactly as stored
  pub checksum: String,
  /// Kept as raw text so the checksum covers the stored bytes, not a re-encoding
  pub entries: Box<RawValue>,
}

impl Snapshot {
  pub fn new(entries: &ResourceMap) -> serde_json::Result<Self> {
    let entries = serde_json::value::to_raw_value(entries)?;
    Ok(Self {
      version: SNAPSHOT_VERSION,
      written_at: Utc::now(),
      checksum: checksum(entries.get()),
      entries,
    })
  }
}

fn checksum(text: &str) -> String {
  let mut hasher = Sha256::new();
  hasher.update(text.as_bytes());
  hex::encode(hasher.finalize())
}

/// Decode a cache file's bytes according to its format.
pub fn decode(path: &Path, format: CacheFileFormat, bytes: &[u8]) -> Result<ResourceMap> {
  match format {
    CacheFileFormat::LegacyRecord => {
      serde_json::from_slice(bytes).map_err(|e| Error::cache_corrupt(path, e))
    }
    CacheFileFormat::Durable => {
      let snapshot: Snapshot =
        serde_json::from_slice(bytes).map_err(|e| Error::cache_corrupt(path, e))?;

      if snapshot.version != SNAPSHOT_VERSION {
        return Err(Error::cache_corrupt(
          path,
          format!("unsupported snapshot version {}", snapshot.version),
        ));
      }

      if checksum(snapshot.entries.get()) != snapshot.checksum {
        return Err(Error::cache_corrupt(path, "checksum mismatch"));
      }

      serde_json::from_str(snapshot.entries.get()).map_err(|e| Error::cache_corrupt(path, e))
    }
  }
}

/// Serialize entries as a durable snapshot.
pub fn encode_snapshot(path: &Path, entries: &ResourceMap) -> Result<Vec<u8>> {
  let snapshot = Snapshot::new(entries).map_err(|e| Error::cache_corrupt(path, e))?;
  serde_json::to_vec_pretty(&snapshot).map_err(|e| Error::cache_corrupt(path, e))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn sample() -> ResourceMap {
    let mut entries = ResourceMap::new();
    entries.insert("devices/".to_string(), json!({"Devices": [{"id": 1}]}));
    entries.insert("ips/?subnet=10".to_string(), json!({"ips": []}));
    entries
  }

  #[test]
  fn test_format_by_extension() {
    assert_eq!(
      CacheFileFormat::from_path(Path::new("cmdb.cache")),
      Some(CacheFileFormat::Durable)
    );
    assert_eq!(
      CacheFileFormat::from_path(Path::new("2019-export.json")),
      Some(CacheFileFormat::LegacyRecord)
    );
    assert_eq!(CacheFileFormat::from_path(Path::new("notes.txt")), None);
    assert_eq!(CacheFileFormat::from_path(Path::new("README")), None);
  }

  #[test]
  fn test_snapshot_decodes_what_it_encodes() {
    let path = Path::new("cmdb.cache");
    let bytes = encode_snapshot(path, &sample()).unwrap();
    let decoded = decode(path, CacheFileFormat::Durable, &bytes).unwrap();
    assert_eq!(decoded, sample());
  }

  #[test]
  fn test_tampered_snapshot_is_corrupt() {
    let path = Path::new("cmdb.cache");
    let bytes = encode_snapshot(path, &sample()).unwrap();
    let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["entries"]["devices/"] = json!({"Devices": []});
    let tampered = serde_json::to_vec(&value).unwrap();

    let err = decode(path, CacheFileFormat::Durable, &tampered).unwrap_err();
    assert!(matches!(err, Error::CacheCorrupt { .. }));
    assert!(err.to_string().contains("checksum mismatch"));
  }

  #[test]
  fn test_unknown_version_is_corrupt() {
    let path = Path::new("cmdb.cache");
    let bytes = encode_snapshot(path, &sample()).unwrap();
    let mut value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    value["version"] = json!(7);
    let bytes = serde_json::to_vec(&value).unwrap();

    let err = decode(path, CacheFileFormat::Durable, &bytes).unwrap_err();
    assert!(err.to_string().contains("unsupported snapshot version 7"));
  }

  #[test]
  fn test_snapshot_with_floats_decodes_exactly() {
    let path = Path::new("cmdb.cache");
    let mut entries = ResourceMap::new();
    entries.insert(
      "devices/".to_string(),
      json!({"cpu_load": 971.9863718547629, "tiny": 1.0715660391465826e-75, "ratio": 0.1}),
    );

    let bytes = encode_snapshot(path, &entries).unwrap();
    let decoded = decode(path, CacheFileFormat::Durable, &bytes).unwrap();
    assert_eq!(decoded, entries);
  }

  #[test]
  fn test_checksum_covers_stored_text() {
    let path = Path::new("cmdb.cache");
    let bytes = encode_snapshot(path, &sample()).unwrap();
    let text = String::from_utf8(bytes).unwrap();

    // Same entries, different whitespace
    let respelled = text.replacen(r#""id":1"#, r#""id": 1"#, 1);
    assert_ne!(respelled, text);
    let err = decode(path, CacheFileFormat::Durable, respelled.as_bytes()).unwrap_err();
    assert!(err.to_string().contains("checksum mismatch"));
  }

  #[test]
  fn test_legacy_record_is_a_plain_mapping() {
    let path = Path::new("old.json");
    let decoded = decode(
      path,
      CacheFileFormat::LegacyRecord,
      br#"{"devices/": {"Devices": []}}"#,
    )
    .unwrap();
    assert_eq!(decoded.len(), 1);
    assert_eq!(decoded["devices/"], json!({"Devices": []}));

    let err = decode(path, CacheFileFormat::LegacyRecord, b"not json").unwrap_err();
    assert!(matches!(err, Error::CacheCorrupt { .. }));
  }
}

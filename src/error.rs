//! Typed failures surfaced by the read pipeline.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A target file could not be read, decoded, or lacks required fields
  #[error("Malformed target file {}: {reason}", .path.display())]
  MalformedTarget { path: PathBuf, reason: String },

  /// A cache file could not be decoded
  #[error("Corrupt cache file {}: {reason}", .path.display())]
  CacheCorrupt { path: PathBuf, reason: String },

  /// A single resource GET failed
  #[error("Failed to get {uri}: {reason}")]
  RemoteFetch { uri: String, reason: String },

  /// Connection parameters are missing or invalid
  #[error("Invalid API configuration: {0}")]
  ApiConfig(String),

  #[error("{context}: {source}")]
  Io {
    context: String,
    #[source]
    source: std::io::Error,
  },
}

impl Error {
  pub(crate) fn malformed_target(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
    Self::MalformedTarget {
      path: path.into(),
      reason: reason.to_string(),
    }
  }

  pub(crate) fn cache_corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
    Self::CacheCorrupt {
      path: path.into(),
      reason: reason.to_string(),
    }
  }

  pub(crate) fn remote_fetch(uri: &str, reason: impl ToString) -> Self {
    Self::RemoteFetch {
      uri: uri.to_string(),
      reason: reason.to_string(),
    }
  }

  pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
    Self::Io {
      context: context.into(),
      source,
    }
  }
}

pub type Result<T> = std::result::Result<T, Error>;

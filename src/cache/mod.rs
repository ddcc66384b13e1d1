//! On-disk cache of API resource payloads.
//!
//! The cache is one flat mapping from resource identifier to the decoded
//! response body. It is persisted under a directory that may hold:
//! - durable snapshots (`*.cache`), the canonical one rewritten atomically on refresh
//! - legacy plain records (`*.json`), read for compatibility and never written
//!
//! Entries never expire; a refresh is the only way to replace them.

mod format;
mod storage;

use std::collections::BTreeMap;

use crate::target::ResourceId;

pub use storage::{CacheStorage, CorruptPolicy, DirStorage, NoopStorage, DEFAULT_CACHE_FILE};

/// Resource identifier -> decoded payload
pub type ResourceMap = BTreeMap<ResourceId, serde_json::Value>;

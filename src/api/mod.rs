//! Remote access to the CMDB REST API.

mod client;
mod settings;

use serde_json::Value;
use std::future::Future;

use crate::error::Result;

pub use client::LazyClient;
pub use settings::ApiSettings;

/// Source of resource payloads for identifiers the cache could not supply.
pub trait Fetcher: Send + Sync {
  /// GET one resource and return its decoded JSON body.
  fn get(&self, uri: &str) -> impl Future<Output = Result<Value>> + Send;
}

//! Read pipeline: resolve targets, consult the cache, fetch what is missing
//! from the API, and optionally persist the merged result.
//!
//! Each stage returns a value that the next stage consumes:
//!
//! ```text
//! ResolvedTargets -> CacheLookup { hits, misses } -> fetched -> merged -> (refresh)
//! ```
//!
//! The first failed fetch aborts the whole load; no partial result is
//! returned and the cache is left untouched.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::api::Fetcher;
use crate::cache::{CacheStorage, ResourceMap};
use crate::error::{Error, Result};
use crate::target::{ResolvedTargets, ResourceId};

/// Pipeline stages, logged as a load progresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Resolving,
  CacheLookup,
  AllHit,
  PartialMiss,
  Fetching,
  Refreshing,
  Done,
  Failed,
}

fn enter(stage: Stage) {
  tracing::debug!(?stage, "Load stage");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
  /// Serve identifiers from the cache when present
  pub use_cache: bool,
  /// Fetch everything remotely and rewrite the cache
  pub refresh_cache: bool,
  /// Upper bound on in-flight requests
  pub max_concurrent_requests: usize,
}

impl Default for LoadOptions {
  fn default() -> Self {
    Self {
      use_cache: true,
      refresh_cache: false,
      max_concurrent_requests: 1,
    }
  }
}

/// Result of consulting the cache for a set of identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheLookup {
  pub hits: ResourceMap,
  pub misses: BTreeSet<ResourceId>,
}

impl CacheLookup {
  /// Split `ids` into entries the storage holds and identifiers it lacks.
  pub fn lookup<S: CacheStorage + ?Sized>(storage: &S, ids: &BTreeSet<ResourceId>) -> Result<Self> {
    // An empty key set would mean "everything" to the storage
    if ids.is_empty() {
      return Ok(Self::default());
    }

    let mut hits = storage.load(ids)?;
    hits.retain(|uri, _| ids.contains(uri));
    let misses = ids
      .iter()
      .filter(|uri| !hits.contains_key(*uri))
      .cloned()
      .collect();
    Ok(Self { hits, misses })
  }

  /// Treat every identifier as a miss.
  pub fn bypass(ids: &BTreeSet<ResourceId>) -> Self {
    Self {
      hits: ResourceMap::new(),
      misses: ids.clone(),
    }
  }
}

/// Fetch every miss, at most `concurrency` at a time.
///
/// Stops at the first error; requests still in flight are dropped.
pub async fn fetch_misses<F: Fetcher>(
  fetcher: &F,
  misses: &BTreeSet<ResourceId>,
  concurrency: usize,
) -> Result<ResourceMap> {
  stream::iter(misses.iter().cloned())
    .map(|uri| async move {
      tracing::info!(%uri, "Loading uri");
      let payload = fetcher.get(&uri).await?;
      Ok::<_, Error>((uri, payload))
    })
    .buffer_unordered(concurrency.max(1))
    .try_collect()
    .await
}

/// Counters describing where a load's data came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
  pub requested: usize,
  pub hits: usize,
  pub fetched: usize,
  pub refreshed: bool,
}

#[derive(Debug, Clone)]
pub struct Loaded {
  pub resources: ResourceMap,
  pub report: LoadReport,
}

/// Loads target files through the cache and the API.
pub struct Loader<S, F> {
  storage: S,
  fetcher: F,
  options: LoadOptions,
}

impl<S: CacheStorage, F: Fetcher> Loader<S, F> {
  pub fn new(storage: S, fetcher: F, options: LoadOptions) -> Self {
    Self {
      storage,
      fetcher,
      options,
    }
  }

  /// Resolve the target files and load every identifier they name.
  pub async fn load_files(&self, targetfiles: &[PathBuf]) -> Result<Loaded> {
    enter(Stage::Resolving);
    let targets = ResolvedTargets::from_files(targetfiles)?;
    if targets.is_empty() {
      tracing::warn!(files = targetfiles.len(), "Target files name no resources");
    }
    self.load(&targets).await
  }

  /// Load every identifier in `targets`.
  pub async fn load(&self, targets: &ResolvedTargets) -> Result<Loaded> {
    let ids: BTreeSet<ResourceId> = targets.ids().cloned().collect();

    enter(Stage::CacheLookup);
    let lookup = if self.options.use_cache && !self.options.refresh_cache {
      CacheLookup::lookup(&self.storage, &ids)?
    } else {
      CacheLookup::bypass(&ids)
    };
    tracing::info!(
      requested = ids.len(),
      hits = lookup.hits.len(),
      misses = lookup.misses.len(),
      "Cache lookup"
    );
    for uri in &lookup.misses {
      if let Some(meta) = targets.get(uri) {
        tracing::debug!(%uri, categories = ?meta.categories, "Cache miss");
      }
    }

    let fetched = if lookup.misses.is_empty() {
      enter(Stage::AllHit);
      ResourceMap::new()
    } else {
      enter(Stage::PartialMiss);
      enter(Stage::Fetching);
      match fetch_misses(
        &self.fetcher,
        &lookup.misses,
        self.options.max_concurrent_requests,
      )
      .await
      {
        Ok(fetched) => fetched,
        Err(e) => {
          enter(Stage::Failed);
          return Err(e);
        }
      }
    };

    let mut report = LoadReport {
      requested: targets.len(),
      hits: lookup.hits.len(),
      fetched: fetched.len(),
      refreshed: false,
    };

    let mut resources = lookup.hits;
    resources.extend(fetched);

    if self.should_refresh() {
      enter(Stage::Refreshing);
      self.storage.refresh(&resources)?;
      report.refreshed = true;
    }

    enter(Stage::Done);
    Ok(Loaded { resources, report })
  }

  /// A refresh was asked for, or the cache is in use but has never been written.
  fn should_refresh(&self) -> bool {
    self.options.refresh_cache || (self.options.use_cache && !self.storage.exists())
  }
}

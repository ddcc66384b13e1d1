//! Target files: declarative lists of the API resources a run should read.
//!
//! A target file maps a resource category (the base key) to an optional
//! filter and a list of categories:
//!
//! ```json
//! { "devices": { "filter": "?type=physical", "categories": ["hw"] } }
//! ```

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Key identifying one API resource (base key plus optional filter).
pub type ResourceId = String;

/// Shape of a single entry as written in a target file
#[derive(Debug, Deserialize)]
struct TargetEntry {
  #[serde(default)]
  filter: Option<String>,
  categories: Vec<String>,
}

/// One resource category declared by a target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
  pub base_key: String,
  pub filter: Option<String>,
  pub categories: Vec<String>,
}

impl Target {
  /// The filter is appended verbatim; it carries its own delimiter (e.g. `?`).
  pub fn resource_id(&self) -> ResourceId {
    match &self.filter {
      Some(filter) => format!("{}{}", self.base_key, filter),
      None => self.base_key.clone(),
    }
  }
}

/// Metadata carried alongside a resolved identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetMeta {
  pub categories: Vec<String>,
}

/// Encoding of a target file, chosen by extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetFormat {
  Json,
  Yaml,
}

impl TargetFormat {
  pub fn from_path(path: &Path) -> Self {
    match path.extension().and_then(|e| e.to_str()) {
      Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml") => {
        Self::Yaml
      }
      _ => Self::Json,
    }
  }
}

/// Parse the contents of a target file.
///
/// `path` is only used for error reporting.
pub fn parse_targets(path: &Path, format: TargetFormat, contents: &str) -> Result<Vec<Target>> {
  let entries: BTreeMap<String, TargetEntry> = match format {
    TargetFormat::Json => {
      serde_json::from_str(contents).map_err(|e| Error::malformed_target(path, e))?
    }
    TargetFormat::Yaml => {
      serde_yaml::from_str(contents).map_err(|e| Error::malformed_target(path, e))?
    }
  };

  Ok(
    entries
      .into_iter()
      .map(|(base_key, entry)| Target {
        base_key,
        filter: entry.filter,
        categories: entry.categories,
      })
      .collect(),
  )
}

/// Read and parse one target file from disk.
pub fn load_target_file(path: &Path) -> Result<Vec<Target>> {
  let contents = std::fs::read_to_string(path).map_err(|e| Error::malformed_target(path, e))?;
  parse_targets(path, TargetFormat::from_path(path), &contents)
}

/// Union of the identifiers resolved from one or more target files.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedTargets {
  resources: BTreeMap<ResourceId, TargetMeta>,
}

impl ResolvedTargets {
  /// Resolve a set of targets. Colliding identifiers keep the last target's metadata.
  pub fn resolve<'a>(targets: impl IntoIterator<Item = &'a Target>) -> Self {
    let resources = targets
      .into_iter()
      .map(|t| {
        (
          t.resource_id(),
          TargetMeta {
            categories: t.categories.clone(),
          },
        )
      })
      .collect();
    Self { resources }
  }

  /// Load and resolve every file, unioning the results in argument order.
  pub fn from_files(paths: &[PathBuf]) -> Result<Self> {
    let mut resolved = Self::default();
    for path in paths {
      let targets = load_target_file(path)?;
      tracing::debug!(path = %path.display(), count = targets.len(), "Parsed target file");
      resolved = resolved.union(Self::resolve(&targets));
    }
    Ok(resolved)
  }

  pub fn union(mut self, other: Self) -> Self {
    self.resources.extend(other.resources);
    self
  }

  pub fn ids(&self) -> impl Iterator<Item = &ResourceId> {
    self.resources.keys()
  }

  pub fn get(&self, id: &str) -> Option<&TargetMeta> {
    self.resources.get(id)
  }

  pub fn len(&self) -> usize {
    self.resources.len()
  }

  pub fn is_empty(&self) -> bool {
    self.resources.is_empty()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn parse_json(contents: &str) -> Result<Vec<Target>> {
    parse_targets(Path::new("targets.json"), TargetFormat::Json, contents)
  }

  #[test]
  fn test_identifier_without_filter_is_base_key() {
    let targets = parse_json(r#"{"device": {"categories": ["hw"]}}"#).unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].resource_id(), "device");
    assert_eq!(targets[0].categories, vec!["hw".to_string()]);
  }

  #[test]
  fn test_identifier_with_filter_is_concatenated() {
    let targets =
      parse_json(r#"{"device": {"filter": "?type=server", "categories": ["hw"]}}"#).unwrap();
    assert_eq!(targets[0].resource_id(), "device?type=server");
  }

  #[test]
  fn test_filter_is_appended_without_separator() {
    let target = Target {
      base_key: "ips/".to_string(),
      filter: Some("subnet/10".to_string()),
      categories: vec![],
    };
    assert_eq!(target.resource_id(), "ips/subnet/10");
  }

  #[test]
  fn test_missing_categories_is_malformed() {
    let err = parse_json(r#"{"device": {"filter": "?a=b"}}"#).unwrap_err();
    assert!(matches!(err, Error::MalformedTarget { .. }));
    assert!(err.to_string().contains("categories"));
  }

  #[test]
  fn test_non_mapping_payload_is_malformed() {
    let err = parse_json(r#"["device", "ips"]"#).unwrap_err();
    assert!(matches!(err, Error::MalformedTarget { .. }));
  }

  #[test]
  fn test_yaml_target_file() {
    let yaml = "devices/:\n  filter: \"?name=web01\"\n  categories: [hw, web]\nips/:\n  categories: []\n";
    let targets = parse_targets(Path::new("t.yaml"), TargetFormat::Yaml, yaml).unwrap();
    let resolved = ResolvedTargets::resolve(&targets);
    let ids: Vec<&ResourceId> = resolved.ids().collect();
    assert_eq!(ids, vec!["devices/?name=web01", "ips/"]);
    assert_eq!(
      resolved.get("devices/?name=web01").unwrap().categories,
      vec!["hw".to_string(), "web".to_string()]
    );
  }

  #[test]
  fn test_format_from_extension() {
    assert_eq!(TargetFormat::from_path(Path::new("a.yml")), TargetFormat::Yaml);
    assert_eq!(TargetFormat::from_path(Path::new("a.YAML")), TargetFormat::Yaml);
    assert_eq!(TargetFormat::from_path(Path::new("a.json")), TargetFormat::Json);
    assert_eq!(TargetFormat::from_path(Path::new("targets")), TargetFormat::Json);
  }

  #[test]
  fn test_from_files_unions_identifiers() {
    let dir = TempDir::new().unwrap();
    let first = dir.path().join("first.json");
    let second = dir.path().join("second.json");
    std::fs::write(&first, r#"{"device": {"categories": ["hw"]}}"#).unwrap();
    std::fs::write(
      &second,
      r#"{"device": {"categories": ["inventory"]}, "ips": {"categories": ["net"]}}"#,
    )
    .unwrap();

    let resolved = ResolvedTargets::from_files(&[first, second]).unwrap();
    assert_eq!(resolved.len(), 2);
    // later file wins on collision
    assert_eq!(
      resolved.get("device").unwrap().categories,
      vec!["inventory".to_string()]
    );
  }

  #[test]
  fn test_unreadable_file_is_malformed() {
    let dir = TempDir::new().unwrap();
    let err = ResolvedTargets::from_files(&[dir.path().join("missing.json")]).unwrap_err();
    assert!(matches!(err, Error::MalformedTarget { .. }));
  }
}

//! Connection parameters for the CMDB API.
//!
//! Values come from the config file's `api` section first and fall back, per
//! field, to `CMDB_API_*` environment variables.

use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{Error, Result};

/// Prefix of the environment variables consulted for missing settings
pub const ENV_PREFIX: &str = "CMDB_API_";

pub const DEFAULT_API_PATH: &str = "/api/1.0/";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;
pub const HTTPS_PORT: u16 = 443;

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
  Http,
  Https,
}

impl fmt::Display for Transport {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Http => f.write_str("http"),
      Self::Https => f.write_str("https"),
    }
  }
}

impl FromStr for Transport {
  type Err = String;

  fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "http" => Ok(Self::Http),
      "https" => Ok(Self::Https),
      other => Err(format!("unknown transport '{}'", other)),
    }
  }
}

/// Parse a boolean flag the way it is commonly spelled in env vars.
fn parse_flag(s: &str) -> std::result::Result<bool, String> {
  match s.trim().to_ascii_lowercase().as_str() {
    "true" | "1" | "yes" => Ok(true),
    "false" | "0" | "no" => Ok(false),
    other => Err(format!("expected true or false, got '{}'", other)),
  }
}

/// Partially specified connection settings, as written in the config file.
#[derive(Clone, Default, Deserialize)]
pub struct ApiSettings {
  pub host: Option<String>,
  pub port: Option<u16>,
  pub username: Option<String>,
  pub password: Option<String>,
  pub transport: Option<Transport>,
  pub verify_tls: Option<bool>,
  pub api_path: Option<String>,
  /// Seconds
  pub request_timeout: Option<u64>,
  /// Upper bound on in-flight requests; read from the config file only
  pub max_concurrent_requests: Option<usize>,
}

impl fmt::Debug for ApiSettings {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ApiSettings")
      .field("host", &self.host)
      .field("port", &self.port)
      .field("username", &self.username)
      .field("password", &self.password.as_ref().map(|_| "<redacted>"))
      .field("transport", &self.transport)
      .field("verify_tls", &self.verify_tls)
      .field("api_path", &self.api_path)
      .field("request_timeout", &self.request_timeout)
      .field("max_concurrent_requests", &self.max_concurrent_requests)
      .finish()
  }
}

/// Fully resolved connection settings.
#[derive(Clone)]
pub struct ApiConfig {
  pub host: String,
  pub port: u16,
  pub username: String,
  pub password: String,
  pub transport: Transport,
  pub verify_tls: bool,
  pub api_path: String,
  pub request_timeout: Duration,
}

impl fmt::Debug for ApiConfig {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ApiConfig")
      .field("base_url", &self.base_url())
      .field("username", &self.username)
      .field("verify_tls", &self.verify_tls)
      .field("request_timeout", &self.request_timeout)
      .finish_non_exhaustive()
  }
}

impl ApiConfig {
  /// `{transport}://{host}:{port}{api_path}`; resource identifiers are appended verbatim.
  pub fn base_url(&self) -> String {
    format!(
      "{}://{}:{}{}",
      self.transport, self.host, self.port, self.api_path
    )
  }
}

/// Looks up one setting by its environment variable name.
struct Lookup<E> {
  env: E,
}

impl<E: Fn(&str) -> Option<String>> Lookup<E> {
  fn key(suffix: &str) -> String {
    format!("{}{}", ENV_PREFIX, suffix)
  }

  fn required(&self, supplied: Option<&String>, field: &str, suffix: &str) -> Result<String> {
    if let Some(value) = supplied.filter(|v| !v.is_empty()) {
      return Ok(value.clone());
    }
    let key = Self::key(suffix);
    (self.env)(&key).ok_or_else(|| {
      Error::ApiConfig(format!(
        "No value provided for {} and env var {} not set",
        field, key
      ))
    })
  }

  fn optional<T>(
    &self,
    supplied: Option<T>,
    suffix: &str,
    parse: impl Fn(&str) -> std::result::Result<T, String>,
  ) -> Result<Option<T>> {
    if supplied.is_some() {
      return Ok(supplied);
    }
    let key = Self::key(suffix);
    match (self.env)(&key) {
      Some(raw) => parse(&raw)
        .map(Some)
        .map_err(|e| Error::ApiConfig(format!("Invalid value for {}: {}", key, e))),
      None => Ok(None),
    }
  }
}

fn parse_number<T: FromStr>(s: &str) -> std::result::Result<T, String>
where
  T::Err: fmt::Display,
{
  s.trim().parse::<T>().map_err(|e| format!("'{}': {}", s, e))
}

impl ApiSettings {
  /// Fill missing fields via `env`, then apply defaults.
  ///
  /// host, port, username and password are required. Port 443 implies https
  /// unless a transport is given explicitly.
  pub fn resolve(&self, env: impl Fn(&str) -> Option<String>) -> Result<ApiConfig> {
    let lookup = Lookup { env };

    let host = lookup.required(self.host.as_ref(), "host", "HOST")?;
    let username = lookup.required(self.username.as_ref(), "username", "USERNAME")?;
    let password = lookup.required(self.password.as_ref(), "password", "PASSWORD")?;

    let port_raw = self.port.map(|p| p.to_string());
    let port = lookup.required(port_raw.as_ref(), "port", "PORT")?;
    let port: u16 = parse_number(&port)
      .map_err(|e| Error::ApiConfig(format!("Invalid value for {}PORT: {}", ENV_PREFIX, e)))?;

    let transport = lookup
      .optional(self.transport, "TRANSPORT", Transport::from_str)?
      .unwrap_or(if port == HTTPS_PORT {
        Transport::Https
      } else {
        Transport::Http
      });
    let verify_tls = lookup
      .optional(self.verify_tls, "VERIFY_TLS", parse_flag)?
      .unwrap_or(false);
    let api_path = lookup
      .optional(self.api_path.clone(), "PATH", |s| Ok(s.to_string()))?
      .unwrap_or_else(|| DEFAULT_API_PATH.to_string());
    let request_timeout = lookup
      .optional(self.request_timeout, "REQUEST_TIMEOUT", parse_number)?
      .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

    Ok(ApiConfig {
      host,
      port,
      username,
      password,
      transport,
      verify_tls,
      api_path,
      request_timeout: Duration::from_secs(request_timeout),
    })
  }

  /// Requests the loader may keep in flight; sequential unless configured.
  pub fn concurrency(&self) -> usize {
    self.max_concurrent_requests.unwrap_or(1).max(1)
  }
}

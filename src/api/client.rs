use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde_json::Value;
use tokio::sync::OnceCell;
use url::Url;

use super::settings::{ApiConfig, ApiSettings};
use super::Fetcher;
use crate::error::{Error, Result};

/// CMDB API client wrapper
#[derive(Clone)]
pub struct ApiClient {
  http: reqwest::Client,
  base_url: String,
  username: String,
  password: String,
}

impl ApiClient {
  pub fn new(config: &ApiConfig) -> Result<Self> {
    let http = reqwest::Client::builder()
      .timeout(config.request_timeout)
      .danger_accept_invalid_certs(!config.verify_tls)
      .build()
      .map_err(|e| Error::ApiConfig(format!("Failed to create HTTP client: {}", e)))?;

    Ok(Self {
      http,
      base_url: config.base_url(),
      username: config.username.clone(),
      password: config.password.clone(),
    })
  }

  /// Full URL for a resource identifier (plain concatenation onto the base URL).
  pub fn url_for(&self, uri: &str) -> Result<Url> {
    let raw = format!("{}{}", self.base_url, uri);
    Url::parse(&raw).map_err(|e| Error::remote_fetch(uri, format!("invalid URL {}: {}", raw, e)))
  }
}

/// Compare media types only, ignoring parameters such as charset.
fn is_json(content_type: &str) -> bool {
  content_type
    .split(';')
    .next()
    .map(|media| media.trim().eq_ignore_ascii_case("application/json"))
    .unwrap_or(false)
}

impl Fetcher for ApiClient {
  async fn get(&self, uri: &str) -> Result<Value> {
    let url = self.url_for(uri)?;

    let response = self
      .http
      .get(url.clone())
      .basic_auth(&self.username, Some(&self.password))
      .send()
      .await
      .map_err(|e| {
        let reason = if e.is_timeout() {
          format!("Request - {} - timed out", url)
        } else {
          format!("Request - {} - {}", url, e)
        };
        Error::remote_fetch(uri, reason)
      })?;

    let status = response.status();
    if status != StatusCode::OK {
      return Err(Error::remote_fetch(
        uri,
        format!("Request - {} - HTTP status - {}", url, status.as_u16()),
      ));
    }

    let content_type = response
      .headers()
      .get(CONTENT_TYPE)
      .and_then(|v| v.to_str().ok())
      .unwrap_or("")
      .to_string();
    if !is_json(&content_type) {
      return Err(Error::remote_fetch(
        uri,
        format!("Request - {} - expecting json - got {}", url, content_type),
      ));
    }

    response
      .json::<Value>()
      .await
      .map_err(|e| Error::remote_fetch(uri, format!("Request - {} - invalid json: {}", url, e)))
  }
}

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Builds the real client on first use.
///
/// A run served entirely from cache never needs connection settings, so they
/// are only resolved once a fetch is actually attempted.
pub struct LazyClient {
  settings: ApiSettings,
  env: EnvLookup,
  client: OnceCell<ApiClient>,
}

impl LazyClient {
  /// Missing settings fall back to the process environment.
  pub fn new(settings: ApiSettings) -> Self {
    Self::with_env(settings, |key| std::env::var(key).ok())
  }

  pub(crate) fn with_env(
    settings: ApiSettings,
    env: impl Fn(&str) -> Option<String> + Send + Sync + 'static,
  ) -> Self {
    Self {
      settings,
      env: Box::new(env),
      client: OnceCell::new(),
    }
  }

  async fn client(&self) -> Result<&ApiClient> {
    self
      .client
      .get_or_try_init(|| async {
        let config = self.settings.resolve(|key| (self.env)(key))?;
        tracing::debug!(?config, "Connecting to CMDB API");
        ApiClient::new(&config)
      })
      .await
  }
}

impl Fetcher for LazyClient {
  async fn get(&self, uri: &str) -> Result<Value> {
    self.client().await?.get(uri).await
  }
}

//! Connection configuration.
//!
//! `ConnectionConfig` derives `Deserialize` so a host application can load it
//! from whatever format it already uses; this crate never reads files or the
//! environment itself.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;

/// Base path for signed API calls.
pub const API_BASE: &str = "/page/api";
/// Base path for the unsigned graph sub-API.
pub const GRAPH_API_BASE: &str = "/page/graph";
/// Value injected as `api_ver` into every signed call.
pub const API_VERSION: &str = "2";
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Host and API key pair. Immutable once a `Connection` owns it.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub host: String,
    pub api_id: String,
    api_secret: String,
}

impl Credentials {
    pub fn new(host: &str, api_id: &str, api_secret: &str) -> Self {
        Self {
            host: host.to_string(),
            api_id: api_id.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("host", &self.host)
            .field("api_id", &self.api_id)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    #[serde(flatten)]
    pub credentials: Credentials,

    /// Per-request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Overrides `https://{host}`; useful for plain-HTTP test servers.
    #[serde(default)]
    pub base_url: Option<String>,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_TIMEOUT_MS
}

impl ConnectionConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            base_url: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1);
        self
    }

    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.base_url = Some(base_url.trim_end_matches('/').to_string());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Scheme and authority every request URL starts with.
    pub fn base_url(&self) -> String {
        match &self.base_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("https://{}", self.credentials.host),
        }
    }
}

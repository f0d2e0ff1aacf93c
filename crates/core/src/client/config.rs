//! Client configuration and endpoint resolution

use crate::transport::ReconnectConfig;

/// Default host used when no endpoint is configured
pub const DEFAULT_HOST: &str = "localhost:8080";

/// Path of the live-event endpoint on the run-script-service server
pub const DEFAULT_PATH: &str = "/ws";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Explicit endpoint; overrides `host`/`secure`/`path`
    pub url: Option<String>,

    /// Host (and optional port) the default endpoint is derived from
    pub host: String,

    /// Use `wss` instead of `ws` for the derived endpoint
    pub secure: bool,

    /// Path of the derived endpoint
    pub path: String,

    /// Reconnect policy after unclean closes
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: DEFAULT_HOST.to_string(),
            secure: false,
            path: DEFAULT_PATH.to_string(),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create config pinned to an explicit endpoint
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    /// Set the host the default endpoint is derived from
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Select `wss` for the derived endpoint
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Set the derived endpoint path
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Set reconnect policy
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// `scheme://host/path` derived from host and security settings
    pub fn default_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        let path = self.path.trim_start_matches('/');
        format!("{}://{}/{}", scheme, self.host, path)
    }

    /// Effective endpoint: explicit argument, else configured url, else derived
    pub fn resolve_url(&self, explicit: Option<&str>) -> String {
        explicit
            .map(str::to_string)
            .or_else(|| self.url.clone())
            .unwrap_or_else(|| self.default_url())
    }
}

//! Client configuration
//!
//! Values come from the environment (see [`SyncConfig::from_env`]) or the
//! `with_*` builders:
//!
//! - `SYNC_API_BASE_URL`: REST base, e.g. `http://localhost:5000/api/v1`
//! - `SYNC_SOCKET_PATH`: WebSocket path on the API origin (default `/ws`)
//! - `SYNC_TOKEN`: token used when `connect` is called without one
//! - `SYNC_CREDENTIAL_FILE`: cookie-style file holding `token=<value>`
//! - `SYNC_RECONNECT_DELAY_MS`, `SYNC_RECONNECT_ATTEMPTS`
//! - `SYNC_CONNECT_TIMEOUT_MS`
//! - `SYNC_NOTICE_TTL_MS`

use std::path::PathBuf;
use std::time::Duration;

use url::Url;

use crate::connection::reconnect::ReconnectPolicy;
use crate::error::{Result, SyncError};

/// REST base used when nothing is configured
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api/v1";

/// Origin used when the API base cannot be parsed
pub const FALLBACK_ORIGIN: &str = "http://localhost:5000";

pub const DEFAULT_SOCKET_PATH: &str = "/ws";

/// Per-attempt handshake timeout
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// How long a notice stays visible
pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(4);

/// Settings for the socket client, REST client and notices
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub api_base_url: String,
    pub socket_path: String,
    pub token: Option<String>,
    pub credential_file: Option<PathBuf>,
    pub reconnect: ReconnectPolicy,
    pub connect_timeout: Duration,
    pub notice_ttl: Duration,
}

impl SyncConfig {
    pub fn new(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            socket_path: DEFAULT_SOCKET_PATH.to_string(),
            token: None,
            credential_file: None,
            reconnect: ReconnectPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            notice_ttl: DEFAULT_NOTICE_TTL,
        }
    }

    /// Build from `SYNC_*` environment variables; unparsable numbers keep
    /// their defaults.
    pub fn from_env() -> Self {
        let mut config = Self::new(
            std::env::var("SYNC_API_BASE_URL").unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
        );

        if let Ok(path) = std::env::var("SYNC_SOCKET_PATH") {
            config.socket_path = path;
        }
        if let Ok(token) = std::env::var("SYNC_TOKEN") {
            if !token.trim().is_empty() {
                config.token = Some(token);
            }
        }
        if let Ok(path) = std::env::var("SYNC_CREDENTIAL_FILE") {
            config.credential_file = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_u64("SYNC_RECONNECT_DELAY_MS") {
            config.reconnect.delay = Duration::from_millis(ms);
        }
        if let Some(attempts) = env_u64("SYNC_RECONNECT_ATTEMPTS") {
            config.reconnect.max_attempts = attempts.min(u32::MAX as u64) as u32;
        }
        if let Some(ms) = env_u64("SYNC_CONNECT_TIMEOUT_MS") {
            config.connect_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = env_u64("SYNC_NOTICE_TTL_MS") {
            config.notice_ttl = Duration::from_millis(ms);
        }

        config
    }

    pub fn with_socket_path(mut self, path: impl Into<String>) -> Self {
        self.socket_path = path.into();
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn with_credential_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.credential_file = Some(path.into());
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    /// `scheme://host[:port]` of the API base, without any path
    pub fn socket_origin(&self) -> String {
        socket_origin(&self.api_base_url)
    }

    /// Full WebSocket URL: API origin with `ws`/`wss` scheme plus the socket path
    pub fn websocket_url(&self) -> Result<Url> {
        let mut url = Url::parse(&self.socket_origin())?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(SyncError::Config(format!(
                    "unsupported scheme for socket: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| SyncError::Config(format!("cannot switch scheme to {}", scheme)))?;
        let path = if self.socket_path.starts_with('/') {
            self.socket_path.clone()
        } else {
            format!("/{}", self.socket_path)
        };
        url.set_path(&path);
        Ok(url)
    }

    /// API base as a URL with a trailing slash, ready for `Url::join`
    pub fn api_base(&self) -> Result<Url> {
        let mut base = self.api_base_url.clone();
        if !base.ends_with('/') {
            base.push('/');
        }
        Ok(Url::parse(&base)?)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE_URL)
    }
}

/// Strip the path from an API base URL, falling back to the local default
pub fn socket_origin(api_base_url: &str) -> String {
    match Url::parse(api_base_url) {
        Ok(url) if url.has_host() => {
            let origin = url.origin().ascii_serialization();
            if origin == "null" {
                FALLBACK_ORIGIN.to_string()
            } else {
                origin
            }
        }
        _ => FALLBACK_ORIGIN.to_string(),
    }
}

fn env_u64(var: &str) -> Option<u64> {
    std::env::var(var).ok().and_then(|v| v.trim().parse().ok())
}

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

pub const ENV_SERVER_URL: &str = "CVSYNC_SERVER_URL";
pub const ENV_API_URL: &str = "CVSYNC_API_URL";
pub const ENV_SESSION_COOKIE: &str = "CVSYNC_SESSION_COOKIE";
pub const ENV_USER_ID: &str = "CVSYNC_USER_ID";
pub const ENV_TRANSPORTS: &str = "CVSYNC_TRANSPORTS";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    WebSocket,
    Sse,
}

impl TransportKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::WebSocket => "websocket",
            Self::Sse => "sse",
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "websocket" | "web-socket" | "ws" => Ok(Self::WebSocket),
            "sse" | "event-stream" | "polling" => Ok(Self::Sse),
            _ => Err(format!("unsupported transport: {value}")),
        }
    }
}

/// Reconnection bounds for the realtime connection.
///
/// Delays grow exponentially from `initial_delay_ms`, are capped at
/// `max_delay_ms`, and are spread by `jitter` (a fraction of the delay,
/// 0.0 disables it). After `max_attempts` consecutive failures the
/// connection stops retrying on its own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconnectPolicy {
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
            jitter: default_jitter(),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry number `attempt` (0-based), without jitter.
    pub fn capped_delay(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.min(16);
        let delay_ms = self
            .initial_delay_ms
            .saturating_mul(factor)
            .min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Delay before retry number `attempt`, with jitter applied and the
    /// result still bounded by `max_delay_ms`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let capped = self.capped_delay(attempt).as_millis() as f64;
        if self.jitter <= 0.0 || capped <= 0.0 {
            return Duration::from_millis(capped as u64);
        }

        let spread = capped * self.jitter.min(1.0);
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        let jittered = (capped + offset).max(0.0) as u64;
        Duration::from_millis(jittered.min(self.max_delay_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Base URL of the realtime endpoint. The WebSocket URL is derived by
    /// swapping the scheme and appending `/ws`; the event-stream fallback
    /// uses `/events` and `/emit` under the same base.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Raw `Cookie` header value carrying the session credentials.
    #[serde(default)]
    pub session_cookie: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_transports")]
    pub transports: Vec<TransportKind>,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    #[serde(default)]
    pub activity_interval_secs: Option<u64>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            api_url: default_api_url(),
            session_cookie: None,
            user_id: None,
            transports: default_transports(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            reconnect: ReconnectPolicy::default(),
            activity_interval_secs: None,
        }
    }
}

impl SyncConfig {
    /// Read a JSON config file. Missing fields fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup. Blank values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(value) = get(ENV_SERVER_URL) {
            self.server_url = value;
        }
        if let Some(value) = get(ENV_API_URL) {
            self.api_url = value;
        }
        if let Some(value) = get(ENV_SESSION_COOKIE) {
            self.session_cookie = Some(value);
        }
        if let Some(value) = get(ENV_USER_ID) {
            self.user_id = Some(value);
        }
        if let Some(value) = get(ENV_TRANSPORTS) {
            let parsed: Vec<TransportKind> = value
                .split(',')
                .filter_map(|item| match TransportKind::from_str(item) {
                    Ok(kind) => Some(kind),
                    Err(e) => {
                        tracing::warn!("ignoring {ENV_TRANSPORTS} entry: {e}");
                        None
                    }
                })
                .collect();
            if !parsed.is_empty() {
                self.transports = parsed;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_http_url("server_url", &self.server_url)?;
        validate_http_url("api_url", &self.api_url)?;

        if self.transports.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one transport must be configured".to_string(),
            ));
        }
        if self.handshake_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "handshake timeout must be greater than 0".to_string(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "request timeout must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "reconnect.max_attempts must be greater than 0".to_string(),
            ));
        }
        if self.reconnect.initial_delay_ms > self.reconnect.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "reconnect.initial_delay_ms ({}) exceeds reconnect.max_delay_ms ({})",
                self.reconnect.initial_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter) {
            return Err(ConfigError::Invalid(
                "reconnect.jitter must be between 0.0 and 1.0".to_string(),
            ));
        }
        if self.activity_interval_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "activity_interval_secs must be greater than 0 when set".to_string(),
            ));
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn activity_interval(&self) -> Option<Duration> {
        self.activity_interval_secs.map(Duration::from_secs)
    }

    /// WebSocket endpoint derived from `server_url`.
    pub fn websocket_url(&self) -> String {
        let base = self.server_url.trim().trim_end_matches('/');
        let swapped = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!("{swapped}/ws")
    }

    pub fn events_url(&self) -> String {
        format!("{}/events", self.server_url.trim().trim_end_matches('/'))
    }

    pub fn emit_url(&self) -> String {
        format!("{}/emit", self.server_url.trim().trim_end_matches('/'))
    }
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let url = reqwest::Url::parse(value.trim())
        .map_err(|e| ConfigError::Invalid(format!("invalid {field} '{value}': {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(ConfigError::Invalid(format!(
            "{field} must use http or https, got '{other}'"
        ))),
    }
}

fn default_server_url() -> String {
    "http://localhost:4000/realtime".to_string()
}

fn default_api_url() -> String {
    "http://localhost:4000/api".to_string()
}

fn default_transports() -> Vec<TransportKind> {
    vec![TransportKind::WebSocket, TransportKind::Sse]
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    5
}

fn default_jitter() -> f64 {
    0.5
}

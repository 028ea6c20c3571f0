//! Config schema types (server, whatsapp, sidecar, rate limit, security, logging, reconnect).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WagateConfig {
    pub server: ServerConfig,
    pub whatsapp: WhatsAppConfig,
    pub sidecar: SidecarConfig,
    pub rate_limit: RateLimitConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub reconnect: ReconnectConfig,
}

/// Deployment mode. Controls whether internal error detail reaches callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    #[default]
    Production,
    Test,
}

impl Environment {
    #[must_use]
    pub fn exposes_error_detail(self) -> bool {
        matches!(self, Self::Development)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(Self::Development),
            "production" | "prod" => Some(Self::Production),
            "test" => Some(Self::Test),
            _ => None,
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0".
    pub bind: String,
    /// Port to listen on. Defaults to 3000.
    pub port: u16,
    /// Maximum accepted request body, in bytes.
    pub body_limit_bytes: usize,
    /// Resolve the client address from forwarding headers.
    pub trust_proxy: bool,
    pub environment: Environment,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 3000,
            body_limit_bytes: 10 * 1024,
            trust_proxy: false,
            environment: Environment::default(),
        }
    }
}

/// Channel session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WhatsAppConfig {
    /// Identifier of the persisted session inside `session_path`.
    pub client_id: String,
    /// Directory holding persisted session credentials.
    pub session_path: PathBuf,
    /// Prefix added to bare 10-digit numbers.
    pub default_country_code: String,
    /// Upper bound on a single channel call (existence check or send).
    pub send_timeout_secs: u64,
}

impl WhatsAppConfig {
    #[must_use]
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            client_id: "wagate".into(),
            session_path: PathBuf::from("./.wwebjs_auth"),
            default_country_code: "91".into(),
            send_timeout_secs: 30,
        }
    }
}

/// Node.js sidecar hosting the WhatsApp Web automation library.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SidecarConfig {
    /// Directory containing the sidecar's `package.json`. Searched when unset.
    pub dir: Option<PathBuf>,
    /// Local WebSocket port the sidecar listens on.
    pub port: u16,
    /// Spawn and supervise the sidecar process. Disable to run it manually.
    pub auto_start: bool,
}

impl Default for SidecarConfig {
    fn default() -> Self {
        Self {
            dir: None,
            port: 18_790,
            auto_start: true,
        }
    }
}

/// Fixed-window request limit per client address.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub window_ms: u64,
    pub max_requests: usize,
}

impl RateLimitConfig {
    #[must_use]
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_ms: 15 * 60 * 1000,
            max_requests: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Allowed CORS origin. `*` allows any origin.
    pub cors_origin: String,
    /// Attach hardening response headers (nosniff, frame deny, ...).
    pub security_headers: bool,
    /// Process memory above which `/health` reports a memory warning.
    pub memory_warn_mb: u64,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            cors_origin: "*".into(),
            security_headers: true,
            memory_warn_mb: 512,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Directory for `combined.log` and `error.log`. File logging is off when unset.
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            dir: Some(PathBuf::from("logs")),
        }
    }
}

/// Reconnect schedule after the channel disconnects.
///
/// The default is a fixed 5 second delay retried forever. `multiplier > 1`
/// turns it into exponential backoff capped at `max_delay_secs`;
/// `max_attempts` stops retrying after that many consecutive failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub base_delay_secs: u64,
    pub multiplier: u32,
    pub max_delay_secs: u64,
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            multiplier: 1,
            max_delay_secs: 300,
            max_attempts: None,
        }
    }
}

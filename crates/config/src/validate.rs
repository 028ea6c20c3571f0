//! Semantic checks on a loaded configuration.

use crate::schema::{Environment, WagateConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Dotted path, e.g. "rate_limit.max_requests"
    pub path: &'static str,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    fn error(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            path,
            message: message.into(),
        });
    }

    fn warning(&mut self, path: &'static str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            path,
            message: message.into(),
        });
    }
}

pub fn validate(config: &WagateConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.server.port == 0 {
        result.error("server.port", "port must be non-zero");
    }
    if config.server.body_limit_bytes == 0 {
        result.error("server.body_limit_bytes", "body limit must be non-zero");
    }
    if config.rate_limit.window_ms == 0 {
        result.error("rate_limit.window_ms", "window must be non-zero");
    }
    if config.rate_limit.max_requests == 0 {
        result.warning(
            "rate_limit.max_requests",
            "a zero limit rejects every request",
        );
    }
    if config.whatsapp.client_id.trim().is_empty() {
        result.error("whatsapp.client_id", "client id must not be empty");
    }
    if !config
        .whatsapp
        .default_country_code
        .chars()
        .all(|c| c.is_ascii_digit())
    {
        result.error(
            "whatsapp.default_country_code",
            "country code must contain digits only",
        );
    }
    if config.whatsapp.send_timeout_secs == 0 {
        result.error("whatsapp.send_timeout_secs", "timeout must be non-zero");
    }
    if config.reconnect.base_delay_secs == 0 {
        result.error("reconnect.base_delay_secs", "delay must be non-zero");
    }
    if config.reconnect.multiplier == 0 {
        result.error("reconnect.multiplier", "multiplier must be at least 1");
    }
    if config.reconnect.max_delay_secs < config.reconnect.base_delay_secs {
        result.warning(
            "reconnect.max_delay_secs",
            "cap is below the base delay; the cap wins",
        );
    }
    if config.server.environment == Environment::Production && config.security.cors_origin == "*"
    {
        result.warning(
            "security.cors_origin",
            "any origin is allowed in production",
        );
    }

    result
}

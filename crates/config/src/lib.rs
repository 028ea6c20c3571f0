//! Configuration loading, validation, and env substitution.
//!
//! Config files: `wagate.toml`, `wagate.yaml`, or `wagate.json`
//! Searched in `./` then `~/.config/wagate/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values and `WAGATE_*`
//! environment overrides on top of the file.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, discover_and_load, load_config},
    schema::{
        Environment, LoggingConfig, RateLimitConfig, ReconnectConfig, SecurityConfig,
        ServerConfig, SidecarConfig, WagateConfig, WhatsAppConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};

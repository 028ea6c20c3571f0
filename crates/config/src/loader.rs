use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::{Environment, WagateConfig},
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["wagate.toml", "wagate.yaml", "wagate.yml", "wagate.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<WagateConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `<config_dir>/wagate.{toml,yaml,yml,json}` when a directory is given
/// 2. `./wagate.{toml,yaml,yml,json}` (project-local)
/// 3. `~/.config/wagate/wagate.{toml,yaml,yml,json}` (user-global)
///
/// Returns `WagateConfig::default()` if no config file is found or it fails
/// to parse. Environment overrides are applied on top either way.
pub fn discover_and_load(config_dir: Option<&Path>) -> WagateConfig {
    let mut config = match find_config_file(config_dir) {
        Some(path) => {
            debug!(path = %path.display(), "loading config");
            match load_config(&path) {
                Ok(cfg) => cfg,
                Err(e) => {
                    warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to load config, using defaults"
                    );
                    WagateConfig::default()
                },
            }
        },
        None => {
            debug!("no config file found, using defaults");
            WagateConfig::default()
        },
    };

    match apply_env_overrides(&mut config) {
        Ok(()) => {},
        Err(Error::InvalidOverrides(errors)) => {
            for e in &errors {
                warn!(error = %e, "ignoring invalid environment override");
            }
        },
        Err(e) => warn!(error = %e, "ignoring invalid environment override"),
    }
    config
}

/// Find the first config file in standard locations.
fn find_config_file(config_dir: Option<&Path>) -> Option<PathBuf> {
    if let Some(dir) = config_dir {
        return CONFIG_FILENAMES
            .iter()
            .map(|name| dir.join(name))
            .find(|p| p.exists());
    }

    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dirs = directories::ProjectDirs::from("", "", "wagate")?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dirs.config_dir().join(name))
        .find(|p| p.exists())
}

/// Overlay `WAGATE_*` environment variables on top of file config.
///
/// Every valid variable is applied even when others are malformed; the
/// malformed ones come back together in [`Error::InvalidOverrides`].
pub fn apply_env_overrides(config: &mut WagateConfig) -> Result<()> {
    apply_env_overrides_with(config, |name| std::env::var(name).ok())
}

fn apply_env_overrides_with(
    config: &mut WagateConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<()> {
    fn parsed<T: std::str::FromStr>(var: &'static str, value: String) -> Result<T> {
        value
            .trim()
            .parse()
            .map_err(|_| Error::InvalidEnv { var, value })
    }

    fn flag(var: &'static str, value: String) -> Result<bool> {
        match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::InvalidEnv { var, value }),
        }
    }

    fn keep<T>(errors: &mut Vec<Error>, result: Result<T>) -> Option<T> {
        result.map_err(|e| errors.push(e)).ok()
    }

    let mut errors = Vec::new();

    if let Some(v) = lookup("WAGATE_BIND") {
        config.server.bind = v;
    }
    if let Some(v) = lookup("WAGATE_PORT")
        && let Some(port) = keep(&mut errors, parsed("WAGATE_PORT", v))
    {
        config.server.port = port;
    }
    if let Some(v) = lookup("WAGATE_BODY_LIMIT")
        && let Some(limit) = keep(&mut errors, parsed("WAGATE_BODY_LIMIT", v))
    {
        config.server.body_limit_bytes = limit;
    }
    if let Some(v) = lookup("WAGATE_TRUST_PROXY")
        && let Some(trust) = keep(&mut errors, flag("WAGATE_TRUST_PROXY", v))
    {
        config.server.trust_proxy = trust;
    }
    if let Some(v) = lookup("WAGATE_ENV") {
        match Environment::parse(&v) {
            Some(environment) => config.server.environment = environment,
            None => errors.push(Error::InvalidEnv {
                var: "WAGATE_ENV",
                value: v,
            }),
        }
    }
    if let Some(v) = lookup("WAGATE_SESSION_PATH") {
        config.whatsapp.session_path = PathBuf::from(v);
    }
    if let Some(v) = lookup("WAGATE_CLIENT_ID") {
        config.whatsapp.client_id = v;
    }
    if let Some(v) = lookup("WAGATE_SEND_TIMEOUT_SECS")
        && let Some(secs) = keep(&mut errors, parsed("WAGATE_SEND_TIMEOUT_SECS", v))
    {
        config.whatsapp.send_timeout_secs = secs;
    }
    if let Some(v) = lookup("WAGATE_SIDECAR_DIR") {
        config.sidecar.dir = Some(PathBuf::from(v));
    }
    if let Some(v) = lookup("WAGATE_SIDECAR_PORT")
        && let Some(port) = keep(&mut errors, parsed("WAGATE_SIDECAR_PORT", v))
    {
        config.sidecar.port = port;
    }
    if let Some(v) = lookup("WAGATE_RATE_LIMIT_WINDOW_MS")
        && let Some(window) = keep(&mut errors, parsed("WAGATE_RATE_LIMIT_WINDOW_MS", v))
    {
        config.rate_limit.window_ms = window;
    }
    if let Some(v) = lookup("WAGATE_RATE_LIMIT_MAX")
        && let Some(max) = keep(&mut errors, parsed("WAGATE_RATE_LIMIT_MAX", v))
    {
        config.rate_limit.max_requests = max;
    }
    if let Some(v) = lookup("WAGATE_CORS_ORIGIN") {
        config.security.cors_origin = v;
    }
    if let Some(v) = lookup("WAGATE_SECURITY_HEADERS")
        && let Some(enabled) = keep(&mut errors, flag("WAGATE_SECURITY_HEADERS", v))
    {
        config.security.security_headers = enabled;
    }
    if let Some(v) = lookup("WAGATE_LOG_LEVEL") {
        config.logging.level = v;
    }
    if let Some(v) = lookup("WAGATE_LOG_DIR") {
        config.logging.dir = (!v.is_empty()).then(|| PathBuf::from(v));
    }
    if let Some(v) = lookup("WAGATE_RECONNECT_MAX_ATTEMPTS") {
        match v.trim() {
            "" | "0" => config.reconnect.max_attempts = None,
            _ => {
                let max = keep(&mut errors, parsed("WAGATE_RECONNECT_MAX_ATTEMPTS", v));
                if max.is_some() {
                    config.reconnect.max_attempts = max;
                }
            },
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(Error::InvalidOverrides(errors))
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<WagateConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat(ext.to_string())),
    }
}

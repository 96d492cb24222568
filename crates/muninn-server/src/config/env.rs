// crates/muninn-server/src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use tracing::{debug, warn};

/// Which store adapter the process uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StoreMode {
    /// Embedded file database (the default).
    #[default]
    Local,
    /// Shared single-primary store reached over HTTP.
    Http,
}

impl StoreMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreMode::Local => "local",
            StoreMode::Http => "http",
        }
    }
}

/// Runtime configuration loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    /// MUNINN_MODE: local (default) or http.
    pub mode: StoreMode,
    /// MUNINN_PRIMARY_URL: required in http mode.
    pub primary_url: Option<String>,
    /// MUNINN_API_TOKEN: write-auth token, optional.
    pub api_token: Option<String>,
    /// MUNINN_TRUSTED_PROXY: whether X-Forwarded-For comes from a proxy we trust.
    pub trusted_proxy: bool,
    /// MUNINN_LOCALHOST_BYPASS: allow unauthenticated writes from localhost (default on).
    pub localhost_bypass: bool,
    /// MUNINN_LOG_LEVEL: debug | info | warn | error (default info).
    pub log_level: String,
}

impl EnvConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let mode = match read_var("MUNINN_MODE").as_deref() {
            Some("http") => StoreMode::Http,
            Some("local") | None => StoreMode::Local,
            Some(other) => {
                warn!("Unknown MUNINN_MODE={other:?}, falling back to local");
                StoreMode::Local
            }
        };

        let primary_url = read_var("MUNINN_PRIMARY_URL");
        if mode == StoreMode::Http && primary_url.is_none() {
            warn!("MUNINN_MODE=http but MUNINN_PRIMARY_URL is not set");
        }

        let api_token = read_var("MUNINN_API_TOKEN");
        if let Some(ref token) = api_token
            && token.len() < 32
        {
            warn!(
                "MUNINN_API_TOKEN is only {} chars; use at least 32 for write auth",
                token.len()
            );
        }

        let log_level = read_var("MUNINN_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let config = Self {
            mode,
            primary_url,
            api_token,
            trusted_proxy: parse_bool_env("MUNINN_TRUSTED_PROXY").unwrap_or(false),
            localhost_bypass: parse_bool_env("MUNINN_LOCALHOST_BYPASS").unwrap_or(true),
            log_level,
        };
        debug!(mode = config.mode.as_str(), "env config loaded");
        config
    }
}

/// Read a single env var, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

/// Parse a boolean env var: "1"/"true"/"yes" are true, "0"/"false"/"no" false.
pub fn parse_bool_env(name: &str) -> Option<bool> {
    let raw = read_var(name)?;
    match raw.to_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        other => {
            warn!("Unparseable boolean {name}={other:?}, ignoring");
            None
        }
    }
}

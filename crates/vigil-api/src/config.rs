//! Server configuration.
//!
//! Read once at startup from the environment.

use std::net::SocketAddr;

use vigil_core::observability::LogFormat;
use vigil_core::{Error, Result};

/// Default public bind address.
pub const DEFAULT_LISTEN: &str = ":8081";

/// Default database name.
pub const DEFAULT_DATABASE: &str = "cis";

/// Configuration for the vigil API server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Public bind address (`:8081` or `host:port`).
    pub listen: String,

    /// Optional admin bind address; serves the same router.
    pub admin_listen: Option<String>,

    /// MongoDB connection URL. Required unless `memory` is set.
    pub mongo_url: Option<String>,

    /// Database name.
    pub database: String,

    /// Allowed CORS origins; `*` allows all.
    pub allowed_origins: Vec<String>,

    /// Log output format.
    pub log_format: LogFormat,

    /// Run against the in-memory repository (development only).
    pub memory: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
            admin_listen: None,
            mongo_url: None,
            database: DEFAULT_DATABASE.to_string(),
            allowed_origins: vec!["*".to_string()],
            log_format: LogFormat::Pretty,
            memory: false,
        }
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// Supported env vars:
    /// - `LISTEN` public bind address, default `:8081`
    /// - `ADMIN_LISTEN` admin bind address (optional)
    /// - `MONGO_URL` required unless `VIGIL_MEMORY=true`
    /// - `DATABASE` default `cis`
    /// - `ALLOWED_ORIGINS` comma-separated list or `*`, default `*`
    /// - `VIGIL_LOG_FORMAT` `json` or `pretty`, default `pretty`
    /// - `VIGIL_MEMORY` run against the in-memory repository
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed,
    /// or if `MONGO_URL` is missing without `VIGIL_MEMORY`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(listen) = env_string("LISTEN") {
            config.listen = listen;
        }
        config.admin_listen = env_string("ADMIN_LISTEN");
        config.mongo_url = env_string("MONGO_URL");
        if let Some(database) = env_string("DATABASE") {
            config.database = database;
        }
        if let Some(origins) = env_string("ALLOWED_ORIGINS") {
            config.allowed_origins = parse_allowed_origins(&origins);
        }
        if let Some(format) = env_string("VIGIL_LOG_FORMAT") {
            config.log_format = parse_log_format(&format)?;
        }
        if let Some(memory) = env_string("VIGIL_MEMORY") {
            config.memory = parse_bool("VIGIL_MEMORY", &memory)?;
        }

        if config.mongo_url.is_none() && !config.memory {
            return Err(Error::invalid_argument(
                "MONGO_URL is required unless VIGIL_MEMORY=true",
            ));
        }

        Ok(config)
    }

    /// Resolves the public bind address.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        parse_listen_addr(&self.listen)
    }

    /// Resolves the admin bind address, if configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be parsed.
    pub fn admin_listen_addr(&self) -> Result<Option<SocketAddr>> {
        self.admin_listen
            .as_deref()
            .map(parse_listen_addr)
            .transpose()
    }
}

/// Parses a bind address, accepting the `:port` shorthand for
/// all-interfaces binds.
fn parse_listen_addr(value: &str) -> Result<SocketAddr> {
    let normalized = if value.starts_with(':') {
        format!("0.0.0.0{value}")
    } else {
        value.to_string()
    };

    normalized
        .parse()
        .map_err(|e| Error::invalid_argument(format!("invalid listen address '{value}': {e}")))
}

fn parse_allowed_origins(value: &str) -> Vec<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    if trimmed == "*" {
        return vec!["*".to_string()];
    }

    trimmed
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn parse_log_format(value: &str) -> Result<LogFormat> {
    match value.to_ascii_lowercase().as_str() {
        "json" => Ok(LogFormat::Json),
        "pretty" => Ok(LogFormat::Pretty),
        other => Err(Error::invalid_argument(format!(
            "VIGIL_LOG_FORMAT must be json or pretty (got {other})"
        ))),
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(true),
        "false" | "0" | "no" | "n" => Ok(false),
        _ => Err(Error::invalid_argument(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

//! Configuration loading and validation for the HTTP server.
//!
//! Values are read from a JSON file (`config.json`, server section under the
//! `"core"` key). If the file cannot be loaded for any reason, environment
//! variables prefixed with `HTTP_` are used instead. The process exits with a
//! clear error message if neither source yields a valid configuration.

use std::{collections::HashMap, path::Path};

use anyhow::{Context, Result};
use axum::http::{HeaderValue, Method};
use serde::Deserialize;

/// File tried first by [`ServerConfig::load`].
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Prefix of the fallback environment variables (`HTTP_HOST`, `HTTP_PORT`, ...).
pub const ENV_PREFIX: &str = "HTTP";

/// Keys read as comma-separated lists from the environment.
const LIST_KEYS: [&str; 3] = ["allowed_origins", "allowed_headers", "allowed_methods"];

/// Validated server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// TCP port to bind. `0` asks the OS for a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// CORS allowed origins. `"*"` allows any origin.
    #[serde(default = "default_wildcard")]
    pub allowed_origins: Vec<String>,

    /// CORS allowed request headers. `"*"` allows any header.
    #[serde(default = "default_wildcard")]
    pub allowed_headers: Vec<String>,

    /// CORS allowed methods.
    #[serde(default = "default_allowed_methods")]
    pub allowed_methods: Vec<String>,

    /// Upper bound on the time spent handling a single request, authorization included.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Tracing log level (e.g. `"info"`, `"debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// OTLP endpoint for span export. Spans are only logged locally when unset.
    #[serde(default)]
    pub otel_exporter_otlp_endpoint: Option<String>,

    /// Tokens and secured routes for the built-in static authorization backend.
    /// Authorization is disabled when absent.
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

/// Settings for [`crate::auth::StaticAuthProvider`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Route patterns (e.g. `/users/:id`) that require a bearer token.
    #[serde(default)]
    pub secured_routes: Vec<String>,

    /// Accepted bearer tokens.
    #[serde(default)]
    pub tokens: Vec<TokenGrant>,
}

/// A bearer token and the principal it resolves to.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub token: String,
    pub username: String,
    /// Secured routes this token may access. Every secured route when absent.
    #[serde(default)]
    pub routes: Option<Vec<String>>,
}

/// On-disk layout of `config.json`.
#[derive(Debug, Deserialize)]
struct FileConfig {
    core: ServerConfig,
}

fn default_host() -> String {
    "0.0.0.0".into()
}
fn default_port() -> u16 {
    8080
}
fn default_wildcard() -> Vec<String> {
    vec!["*".into()]
}
fn default_allowed_methods() -> Vec<String> {
    ["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS", "HEAD"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_request_timeout() -> u64 {
    30
}
fn default_log_level() -> String {
    "info".into()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allowed_origins: default_wildcard(),
            allowed_headers: default_wildcard(),
            allowed_methods: default_allowed_methods(),
            request_timeout_secs: default_request_timeout(),
            log_level: default_log_level(),
            otel_exporter_otlp_endpoint: None,
            auth: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from [`DEFAULT_CONFIG_FILE`], falling back to
    /// `HTTP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error naming both causes if neither source is usable.
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Like [`ServerConfig::load`] with an explicit file path.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path.as_ref(), None)
    }

    fn load_with_env(path: &Path, env: Option<HashMap<String, String>>) -> Result<Self> {
        match Self::from_file(path) {
            Ok(cfg) => Ok(cfg),
            Err(file_err) => Self::from_env_source(env).with_context(|| {
                format!("configuration file unusable ({file_err:#}) and environment fallback failed")
            }),
        }
    }

    /// Load and validate the `"core"` section of a JSON configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing, unparsable, or invalid.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let cfg = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .format(config::FileFormat::Json)
                    .required(true),
            )
            .build()
            .with_context(|| format!("failed to read configuration file {}", path.display()))?;

        let file: FileConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration file")?;

        file.core.validate()?;
        Ok(file.core)
    }

    /// Load and validate configuration from `HTTP_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_env_source(None)
    }

    fn from_env_source(source: Option<HashMap<String, String>>) -> Result<Self> {
        let env = LIST_KEYS.iter().fold(
            config::Environment::with_prefix(ENV_PREFIX)
                .try_parsing(true)
                .list_separator(","),
            |env, key| env.with_list_parse_key(key),
        );

        let cfg = config::Config::builder()
            .add_source(env.source(source))
            .build()
            .context("failed to build configuration from environment")?;

        let c: ServerConfig = cfg
            .try_deserialize()
            .context("failed to deserialise configuration from environment")?;

        c.validate()?;
        Ok(c)
    }

    /// The dial address `host:port`. IPv6 hosts are bracketed (`[::1]:8080`).
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("HOST is required and must not be empty");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("REQUEST_TIMEOUT_SECS must be > 0");
        }
        for method in &self.allowed_methods {
            Method::from_bytes(method.as_bytes())
                .with_context(|| format!("ALLOWED_METHODS contains an invalid method: {method:?}"))?;
        }
        for origin in &self.allowed_origins {
            HeaderValue::from_str(origin)
                .with_context(|| format!("ALLOWED_ORIGINS contains an invalid origin: {origin:?}"))?;
        }
        if let Some(auth) = &self.auth {
            for grant in &auth.tokens {
                if grant.token.is_empty() || grant.token.contains(' ') {
                    anyhow::bail!(
                        "token for user {:?} must be non-empty and contain no spaces",
                        grant.username
                    );
                }
            }
        }
        Ok(())
    }
}

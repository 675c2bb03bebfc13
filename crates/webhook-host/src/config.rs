//! Configuration types for the webhook host
//!
//! Every field carries a serde default, so an absent file or an entirely
//! unconfigured environment still yields a usable configuration. A malformed
//! file or a value that cannot be coerced to the right type is a hard error.

use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Environment variable prefix, e.g. `WEBHOOK_HOST__SERVER__PORT=9090`.
pub const ENV_PREFIX: &str = "WEBHOOK_HOST";

/// Configuration file looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config/webhook-host";

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Complete host configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct HostConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook routing and dispatch settings
    pub webhook: WebhookConfig,

    /// TLS settings; absent means plaintext HTTP
    pub tls: Option<TlsConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl HostConfig {
    /// Load configuration from layered sources.
    ///
    /// Sources (later sources override earlier ones):
    ///  1. built-in defaults
    ///  2. `config/webhook-host.{yaml,toml,json}` (optional)
    ///  3. `explicit_file` (required when given)
    ///  4. environment variables prefixed `WEBHOOK_HOST__`
    ///
    /// The merged result is validated before it is returned.
    pub fn load(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let config = Self::load_unvalidated(explicit_file)?;
        config.validate()?;
        Ok(config)
    }

    /// Merge the same sources as [`load`](Self::load) without validating.
    ///
    /// For callers that apply their own overrides before calling
    /// [`validate`](Self::validate).
    pub fn load_unvalidated(explicit_file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(DEFAULT_CONFIG_FILE).required(false));

        if let Some(path) = explicit_file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Check every section, reporting the first violation.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.validate()?;
        self.webhook.validate()?;
        if let Some(tls) = &self.tls {
            tls.validate()?;
        }
        self.logging.validate()
    }

    /// Whether connections on the listening port use TLS.
    pub fn is_tls(&self) -> bool {
        self.tls.is_some()
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on (1-65535)
    pub port: u16,

    /// Upper bound on draining in-flight requests after shutdown is requested
    pub shutdown_timeout_seconds: u64,

    /// Maximum POST body size in bytes
    pub max_body_size: usize,

    /// Stop on Ctrl+C / SIGTERM
    pub handle_os_signals: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            shutdown_timeout_seconds: 30,
            max_body_size: 10 * 1024 * 1024, // 10MB
            handle_os_signals: true,
        }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(invalid("server.host", "host must not be empty"));
        }
        if self.port == 0 {
            return Err(invalid("server.port", "port must be between 1 and 65535"));
        }
        if self.max_body_size == 0 {
            return Err(invalid(
                "server.max_body_size",
                "maximum body size must be greater than zero",
            ));
        }
        Ok(())
    }

    /// `host:port` as used for binding and log scoping.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What dispatch does once a subscriber fails for a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log the failure and skip the remaining subscribers for that request
    #[default]
    Abort,

    /// Log the failure and keep invoking the remaining subscribers
    Continue,
}

/// Webhook routing and dispatch configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Path shared by GET and POST webhook traffic
    pub webhook_path: String,

    /// Liveness probe path
    pub status_path: String,

    /// Reject POST requests without `Content-Length` with 411
    pub require_content_length: bool,

    /// Subscriber failure handling
    pub failure_policy: FailurePolicy,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            webhook_path: "webhook".to_string(),
            status_path: "status".to_string(),
            require_content_length: false,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl WebhookConfig {
    /// Create a configuration for the given webhook path with defaults elsewhere.
    pub fn for_path(webhook_path: impl Into<String>) -> Self {
        Self {
            webhook_path: webhook_path.into(),
            ..Default::default()
        }
    }

    /// Webhook path as a router path (always starts with `/`).
    pub fn webhook_route(&self) -> String {
        normalize_path(&self.webhook_path)
    }

    /// Status path as a router path (always starts with `/`).
    pub fn status_route(&self) -> String {
        normalize_path(&self.status_path)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.webhook_path.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "webhook.webhook_path".to_string(),
            });
        }
        if self.status_path.trim().is_empty() {
            return Err(ConfigError::Missing {
                key: "webhook.status_path".to_string(),
            });
        }

        validate_route("webhook.webhook_path", &self.webhook_route())?;
        validate_route("webhook.status_path", &self.status_route())?;

        if self.webhook_route() == self.status_route() {
            return Err(invalid(
                "webhook.status_path",
                "status path must differ from the webhook path",
            ));
        }
        Ok(())
    }
}

/// TLS configuration
///
/// The certificate file is a PEM bundle holding the certificate chain and the
/// private key. An `ENCRYPTED PRIVATE KEY` block is unlocked with `passphrase`.
/// The passphrase is wiped from memory on drop.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct TlsConfig {
    /// PEM bundle with certificate chain and private key
    #[zeroize(skip)]
    pub certificate_path: PathBuf,

    /// Passphrase for an encrypted private key
    #[serde(default)]
    pub passphrase: Option<String>,
}

impl TlsConfig {
    pub fn new(certificate_path: impl Into<PathBuf>, passphrase: Option<String>) -> Self {
        Self {
            certificate_path: certificate_path.into(),
            passphrase,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.certificate_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing {
                key: "tls.certificate_path".to_string(),
            });
        }
        if matches!(&self.passphrase, Some(p) if p.is_empty()) {
            return Err(invalid(
                "tls.passphrase",
                "passphrase must not be empty when present",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("certificate_path", &self.certificate_path)
            .field(
                "passphrase",
                &self.passphrase.as_ref().map(|_| "<REDACTED>"),
            )
            .finish()
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum log severity (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl LoggingConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let level = self.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(invalid(
                "logging.level",
                &format!("unknown log level '{}'", self.level),
            ));
        }
        Ok(())
    }
}

/// Prefix a path with `/` and strip surrounding whitespace.
pub fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Reject paths the router would treat as captures or wildcards.
fn validate_route(field: &str, route: &str) -> Result<(), ConfigError> {
    if route.chars().any(|c| c.is_whitespace() || matches!(c, '{' | '}' | '*' | '?' | '#')) {
        return Err(invalid(
            field,
            &format!("'{}' contains characters not allowed in a fixed path", route),
        ));
    }
    if route.split('/').any(|segment| segment.starts_with(':')) {
        return Err(invalid(
            field,
            &format!("'{}' has a segment starting with ':'", route),
        ));
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

//! # Service Configuration
//!
//! Typed configuration for the run-board service. The binary assembles these
//! structs from layered sources (YAML files, then `RB__`-prefixed environment
//! variables); every section carries serde defaults so an entirely
//! unconfigured environment still deserializes. [`ServiceConfig::validate`]
//! is the startup gate for the settings that have no safe default.

use run_board_core::Environment;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook intake settings
    pub webhooks: WebhookConfig,

    /// Run storage settings
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Deployment environment
    pub environment: Environment,
}

impl ServiceConfig {
    /// Validate settings that have no safe default
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the webhook secret is absent or
    /// empty, [`ConfigError::Invalid`] for out-of-range or malformed values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.webhooks.secret.as_deref() {
            Some(secret) if !secret.is_empty() => {}
            _ => {
                return Err(ConfigError::Missing {
                    key: "webhooks.secret".to_string(),
                });
            }
        }

        if !self.webhooks.endpoint_path.starts_with('/') {
            return Err(ConfigError::Invalid {
                message: format!(
                    "webhooks.endpoint_path must start with '/', got '{}'",
                    self.webhooks.endpoint_path
                ),
            });
        }

        if self.server.port == 0 {
            return Err(ConfigError::Invalid {
                message: "server.port must be non-zero".to_string(),
            });
        }

        if self.server.request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid {
                message: "server.request_timeout_seconds must be non-zero".to_string(),
            });
        }

        if self.server.max_payload_size_bytes == 0 {
            return Err(ConfigError::Invalid {
                message: "server.max_payload_size_bytes must be non-zero".to_string(),
            });
        }

        match self.logging.level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid {
                    message: format!("logging.level '{}' is not a valid level", other),
                });
            }
        }

        if let StorageBackend::Filesystem { path } = &self.storage.backend {
            if path.as_os_str().is_empty() {
                return Err(ConfigError::Invalid {
                    message: "storage.backend.path must not be empty".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Maximum request body size in bytes
    pub max_payload_size_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_seconds: 30,
            // GitHub caps webhook payloads at 25 MB.
            max_payload_size_bytes: 25 * 1024 * 1024,
        }
    }
}

/// Webhook intake configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Webhook endpoint path
    pub endpoint_path: String,

    /// Shared secret for HMAC-SHA256 signature verification
    ///
    /// Required: an absent or empty secret fails [`ServiceConfig::validate`].
    pub secret: Option<String>,

    /// Skip signature verification for relay-wrapped deliveries
    ///
    /// Only effective outside production; the relay policy neutralizes the
    /// flag there.
    pub allow_unverified_relay: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            endpoint_path: "/api/webhooks".to_string(),
            secret: None,
            allow_unverified_relay: false,
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookConfig")
            .field("endpoint_path", &self.endpoint_path)
            .field("secret", &self.secret.as_ref().map(|_| "<REDACTED>"))
            .field("allow_unverified_relay", &self.allow_unverified_relay)
            .finish()
    }
}

/// Run storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend selection
    pub backend: StorageBackend,

    /// Seconds between maintenance sweeps; 0 disables the sweep task
    pub sweep_interval_seconds: u64,
}

impl StorageConfig {
    /// Sweep cadence, or `None` when the sweep task is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        if self.sweep_interval_seconds == 0 {
            None
        } else {
            Some(Duration::from_secs(self.sweep_interval_seconds))
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            sweep_interval_seconds: 3600,
        }
    }
}

/// Storage backend selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory tables, lost on restart
    Memory,
    /// JSON rows under a local directory
    Filesystem { path: PathBuf },
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Log output format
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Structured JSON lines, one object per event
    Json,
    /// Human-readable output for development
    Pretty,
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

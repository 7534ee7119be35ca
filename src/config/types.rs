//! Core configuration types and loading.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::defaults::{default_database_path, default_key_id, default_listen_address};
use super::tokens::{AuthorizationConfig, CapabilityConfig, IntrospectionConfig, TokensConfig};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {}", format_errors(.0))]
    Invalid(Vec<super::ValidationError>),
}

fn format_errors(errors: &[super::ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server information.
    pub server: ServerConfig,
    /// HTTP listen configuration.
    #[serde(default)]
    pub listen: ListenConfig,
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Root key material.
    pub keys: KeysConfig,
    /// Token backend selection and lifetimes.
    #[serde(default)]
    pub tokens: TokensConfig,
    /// OAuth2 token introspection client (required for the `oauth2` backend).
    pub introspection: Option<IntrospectionConfig>,
    /// Capability URI lifetimes.
    #[serde(default)]
    pub capabilities: CapabilityConfig,
    /// Which stored permission model gates spaces.
    #[serde(default)]
    pub authorization: AuthorizationConfig,
}

impl Config {
    /// Load configuration from a TOML file and validate it.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        super::validate(&config).map_err(ConfigError::Invalid)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Public base URL (e.g., "https://api.natter.local"). Used as the
    /// macaroon location and as the prefix of capability URIs.
    pub base_url: String,
    /// Prometheus metrics HTTP port (0 disables, default: 0).
    #[serde(default)]
    pub metrics_port: u16,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// Address to bind to (e.g., "0.0.0.0:4567").
    #[serde(default = "default_listen_address")]
    pub address: SocketAddr,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_address(),
        }
    }
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file (":memory:" for an ephemeral database).
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

/// Root key material. Exactly one of `root_secret` / `root_secret_file`.
#[derive(Clone, Deserialize)]
pub struct KeysConfig {
    /// Hex-encoded root secret (at least 32 bytes once decoded).
    pub root_secret: Option<String>,
    /// File holding the hex-encoded root secret.
    pub root_secret_file: Option<PathBuf>,
    /// Identifier embedded in self-contained credentials.
    #[serde(default = "default_key_id")]
    pub key_id: String,
}

impl std::fmt::Debug for KeysConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysConfig")
            .field("root_secret", &self.root_secret.as_ref().map(|_| "[REDACTED]"))
            .field("root_secret_file", &self.root_secret_file)
            .field("key_id", &self.key_id)
            .finish()
    }
}

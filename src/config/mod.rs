//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, ListenConfig, KeysConfig)
//! - [`tokens`]: Token backend, introspection and capability configuration
//! - [`validation`]: Startup checks that refuse unsafe or inconsistent settings
//! - [`defaults`]: serde default functions

mod defaults;
mod tokens;
mod types;
mod validation;

pub use tokens::{
    AuthorizationConfig, CapabilityConfig, IntrospectionConfig, PermissionModel, TokenBackend,
    TokensConfig,
};
pub use types::{Config, ConfigError, DatabaseConfig, KeysConfig, ListenConfig, ServerConfig};
pub use validation::{ValidationError, validate};

//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{Config, TokenBackend};
use crate::authz::scope;
use std::path::Path;
use thiserror::Error;

/// Longest token lifetime accepted (one year).
pub const MAX_TOKEN_TTL_SECS: u64 = 365 * 86_400;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("server.base_url must start with http:// or https://, got '{0}'")]
    InvalidBaseUrl(String),
    #[error("keys: exactly one of root_secret or root_secret_file must be set")]
    RootSecretSource,
    #[error("keys.key_id must be 1-32 characters of [A-Za-z0-9_-], got '{0}'")]
    InvalidKeyId(String),
    #[error("tokens.ttl_secs must be between 1 and {MAX_TOKEN_TTL_SECS}")]
    TokenTtl,
    #[error("tokens.default_scopes contains unknown scope '{0}'")]
    UnknownScope(String),
    #[error("tokens.backend = \"oauth2\" requires an [introspection] section")]
    MissingIntrospection,
    #[error("introspection.{field} must use https (set require_https = false to override): {url}")]
    InsecureEndpoint { field: &'static str, url: String },
    #[error("introspection.max_concurrent must be greater than zero")]
    ZeroConcurrency,
    #[error("introspection.timeout_ms must be greater than zero")]
    ZeroTimeout,
    #[error("capabilities.default_ttl_secs must be between 1 and max_ttl_secs")]
    CapabilityTtl,
    #[error("database.path parent directory does not exist: {0}")]
    DatabasePathInvalid(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let base_url = &config.server.base_url;
    if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
        errors.push(ValidationError::InvalidBaseUrl(base_url.clone()));
    }

    // Keys
    if config.keys.root_secret.is_some() == config.keys.root_secret_file.is_some() {
        errors.push(ValidationError::RootSecretSource);
    }
    let key_id = &config.keys.key_id;
    let key_id_ok = !key_id.is_empty()
        && key_id.len() <= 32
        && key_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !key_id_ok {
        errors.push(ValidationError::InvalidKeyId(key_id.clone()));
    }

    // Tokens
    if config.tokens.ttl_secs == 0 || config.tokens.ttl_secs > MAX_TOKEN_TTL_SECS {
        errors.push(ValidationError::TokenTtl);
    }
    for name in config.tokens.default_scopes.split_whitespace() {
        if !scope::is_known(name) {
            errors.push(ValidationError::UnknownScope(name.to_string()));
        }
    }

    // Introspection
    match (&config.tokens.backend, &config.introspection) {
        (TokenBackend::OAuth2, None) => errors.push(ValidationError::MissingIntrospection),
        (_, Some(intro)) => {
            if intro.require_https {
                let endpoints = std::iter::once(("endpoint", Some(&intro.endpoint)))
                    .chain(std::iter::once((
                        "revocation_endpoint",
                        intro.revocation_endpoint.as_ref(),
                    )));
                for (field, url) in endpoints {
                    if let Some(url) = url
                        && !url.starts_with("https://")
                    {
                        errors.push(ValidationError::InsecureEndpoint {
                            field,
                            url: url.clone(),
                        });
                    }
                }
            }
            if intro.max_concurrent == 0 {
                errors.push(ValidationError::ZeroConcurrency);
            }
            if intro.timeout_ms == 0 {
                errors.push(ValidationError::ZeroTimeout);
            }
        }
        _ => {}
    }

    // Capabilities
    let caps = &config.capabilities;
    if caps.default_ttl_secs == 0 || caps.default_ttl_secs > caps.max_ttl_secs {
        errors.push(ValidationError::CapabilityTtl);
    }

    // Database path validation
    let db_path = Path::new(&config.database.path);
    if config.database.path != ":memory:"
        && let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        errors.push(ValidationError::DatabasePathInvalid(
            config.database.path.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

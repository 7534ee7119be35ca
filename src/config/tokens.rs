//! Token backend, introspection and capability configuration.

use serde::Deserialize;

use super::defaults::{
    default_capability_max_ttl, default_capability_ttl, default_cleanup_interval,
    default_introspection_concurrency, default_introspection_timeout_ms, default_scopes,
    default_token_ttl, default_true,
};

/// Which token store backs bearer credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TokenBackend {
    /// Opaque identifiers, state in the `tokens` table.
    #[default]
    Database,
    /// Self-contained JSON payload with an HMAC-SHA256 tag.
    Hmac,
    /// Self-contained payload sealed with XChaCha20-Poly1305.
    Encrypted,
    /// Standard JWT claims in a JWE (`dir` + `A256GCM`) envelope.
    Claims,
    /// Opaque tokens issued elsewhere, validated by RFC 7662 introspection.
    #[serde(rename = "oauth2")]
    OAuth2,
}

impl TokenBackend {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Hmac => "hmac",
            Self::Encrypted => "encrypted",
            Self::Claims => "claims",
            Self::OAuth2 => "oauth2",
        }
    }
}

/// Token issuance configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TokensConfig {
    /// Backend store (default: database).
    #[serde(default)]
    pub backend: TokenBackend,
    /// Wrap the backend's identifiers in macaroons (default: true).
    #[serde(default = "default_true")]
    pub macaroons: bool,
    /// Lifetime of tokens minted by the login route, in seconds (default: 600).
    #[serde(default = "default_token_ttl")]
    pub ttl_secs: u64,
    /// Space-separated scopes granted when login does not ask for any.
    #[serde(default = "default_scopes")]
    pub default_scopes: String,
    /// Interval for deleting expired database tokens, in seconds (0 disables).
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_secs: u64,
    /// `iss` claim for the claims backend (defaults to the server base URL).
    pub issuer: Option<String>,
    /// `aud` claim for the claims backend (defaults to the server base URL).
    pub audience: Option<String>,
}

impl Default for TokensConfig {
    fn default() -> Self {
        Self {
            backend: TokenBackend::default(),
            macaroons: true,
            ttl_secs: default_token_ttl(),
            default_scopes: default_scopes(),
            cleanup_interval_secs: default_cleanup_interval(),
            issuer: None,
            audience: None,
        }
    }
}

/// OAuth2 introspection client configuration.
#[derive(Clone, Deserialize)]
pub struct IntrospectionConfig {
    /// RFC 7662 introspection endpoint.
    pub endpoint: String,
    /// Optional RFC 7009 revocation endpoint.
    pub revocation_endpoint: Option<String>,
    /// Client id presented with HTTP Basic authentication.
    pub client_id: String,
    /// Client secret presented with HTTP Basic authentication.
    pub client_secret: String,
    /// Per-call timeout including the wait for a concurrency permit (default: 2000).
    #[serde(default = "default_introspection_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum introspection calls in flight (default: 16).
    #[serde(default = "default_introspection_concurrency")]
    pub max_concurrent: usize,
    /// Refuse non-https endpoints (default: true).
    #[serde(default = "default_true")]
    pub require_https: bool,
}

impl std::fmt::Debug for IntrospectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntrospectionConfig")
            .field("endpoint", &self.endpoint)
            .field("revocation_endpoint", &self.revocation_endpoint)
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("timeout_ms", &self.timeout_ms)
            .field("max_concurrent", &self.max_concurrent)
            .field("require_https", &self.require_https)
            .finish()
    }
}

/// Capability URI configuration.
///
/// Capabilities cannot be revoked once minted, so `max_ttl_secs` is the
/// longest window a leaked link stays usable.
#[derive(Debug, Clone, Deserialize)]
pub struct CapabilityConfig {
    /// Lifetime of links minted when a space is created (default: 1 day).
    #[serde(default = "default_capability_ttl")]
    pub default_ttl_secs: u64,
    /// Upper bound applied to every mint (default: 30 days).
    #[serde(default = "default_capability_max_ttl")]
    pub max_ttl_secs: u64,
}

impl Default for CapabilityConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_capability_ttl(),
            max_ttl_secs: default_capability_max_ttl(),
        }
    }
}

/// Stored permission model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PermissionModel {
    /// Per-(space, user) permission strings over `rwd`.
    #[default]
    Acl,
    /// Per-(space, user) roles mapped to fixed permission strings.
    Roles,
}

/// Authorization configuration.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthorizationConfig {
    /// Permission model (default: acl).
    #[serde(default)]
    pub model: PermissionModel,
}

//! Bearer token stores.
//!
//! A [`Token`] is `(subject, expiry, attributes)`. A [`TokenStore`] turns one
//! into a bearer string and back. The variants trade server-side state for
//! self-containment:
//!
//! | Variant     | State      | Revocable | Encoding                          |
//! |-------------|------------|-----------|-----------------------------------|
//! | `Database`  | `tokens`   | yes       | random id, row keyed by its hash  |
//! | `Hmac`      | none       | no        | JSON payload + HMAC-SHA256 tag    |
//! | `Encrypted` | none       | no        | XChaCha20-Poly1305 sealed JSON    |
//! | `Claims`    | none       | no        | JWE (`dir` / `A256GCM`) JWT       |
//! | `OAuth2`    | remote AS  | optional  | opaque, RFC 7662 introspection    |
//! | `Macaroon`  | inner's    | inner's   | macaroon around the inner id      |
//!
//! Reads never fail loudly. Anything wrong with a presented credential comes
//! back as [`Validation::Invalid`], or [`Validation::Expired`] when it decoded
//! and verified but is past its expiry.

mod claims;
mod database;
mod encrypted;
mod hmac;
mod macaroon;
mod oauth2;

pub use claims::ClaimsTokenStore;
pub use database::DatabaseTokenStore;
pub use encrypted::EncryptedTokenStore;
pub use hmac::HmacTokenStore;
pub use macaroon::{Caveat, MacaroonTokenStore};
pub use oauth2::IntrospectionTokenStore;

use crate::clock::SharedClock;
use crate::config::{Config, TokenBackend};
use crate::db::{Database, DbError};
use crate::keys::KeyRing;
use crate::metrics;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use http::Method;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Attribute holding the space-separated scope list.
pub const SCOPE_ATTRIBUTE: &str = "scope";

pub(crate) type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors from `create` and `revoke`. Reads never error.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token store does not support {0}")]
    Unsupported(&'static str),
    #[error("database error: {0}")]
    Db(#[from] DbError),
    #[error("token could not be encoded: {0}")]
    Encoding(String),
    #[error("invalid caveat: {0}")]
    InvalidCaveat(String),
    #[error("authorization server error: {0}")]
    Upstream(String),
}

/// A bearer token's content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub subject: String,
    pub expiry: DateTime<Utc>,
    pub attributes: BTreeMap<String, String>,
}

impl Token {
    /// New token with no attributes.
    ///
    /// The expiry is truncated to whole seconds, the precision every
    /// self-contained encoding carries.
    pub fn new(subject: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        Self {
            subject: subject.into(),
            expiry: whole_seconds(expiry),
            attributes: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn scope(&self) -> Option<&str> {
        self.attributes.get(SCOPE_ATTRIBUTE).map(String::as_str)
    }

    /// Valid strictly before `expiry`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }
}

pub(crate) fn whole_seconds(t: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(t.timestamp(), 0).unwrap_or(t)
}

/// The request a token is presented with. Macaroon caveats are checked
/// against it.
#[derive(Debug, Clone)]
pub struct TokenContext {
    pub method: Method,
    pub path: String,
}

impl TokenContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
        }
    }
}

/// Outcome of inspecting a presented credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Validation {
    Active(Token),
    /// Authentic but past its expiry.
    Expired,
    /// Malformed, forged, unknown, revoked, or rejected upstream.
    Invalid,
}

impl Validation {
    pub fn active(self) -> Option<Token> {
        match self {
            Self::Active(token) => Some(token),
            _ => None,
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            Self::Active(_) => "active",
            Self::Expired => "expired",
            Self::Invalid => "invalid",
        }
    }

    /// Classify an authentic token by expiry.
    pub(crate) fn check_expiry(token: Token, now: DateTime<Utc>) -> Self {
        if token.is_expired(now) {
            Self::Expired
        } else {
            Self::Active(token)
        }
    }
}

/// Every token store, dispatched by variant.
pub enum TokenStore {
    Database(DatabaseTokenStore),
    Hmac(HmacTokenStore),
    Encrypted(EncryptedTokenStore),
    Claims(ClaimsTokenStore),
    OAuth2(IntrospectionTokenStore),
    Macaroon(MacaroonTokenStore),
}

impl TokenStore {
    /// Build the store selected by configuration.
    pub fn from_config(
        config: &Config,
        keys: &KeyRing,
        db: Database,
        clock: SharedClock,
    ) -> Result<Self, TokenError> {
        let base = match config.tokens.backend {
            TokenBackend::Database => Self::Database(DatabaseTokenStore::new(db, clock.clone())),
            TokenBackend::Hmac => Self::Hmac(HmacTokenStore::new(keys, clock.clone())),
            TokenBackend::Encrypted => {
                Self::Encrypted(EncryptedTokenStore::new(keys, clock.clone()))
            }
            TokenBackend::Claims => {
                let issuer = config
                    .tokens
                    .issuer
                    .clone()
                    .unwrap_or_else(|| config.server.base_url.clone());
                let audience = config
                    .tokens
                    .audience
                    .clone()
                    .unwrap_or_else(|| config.server.base_url.clone());
                Self::Claims(ClaimsTokenStore::new(keys, issuer, audience, clock.clone()))
            }
            TokenBackend::OAuth2 => {
                let intro = config
                    .introspection
                    .as_ref()
                    .ok_or(TokenError::Unsupported("oauth2 without [introspection]"))?;
                Self::OAuth2(IntrospectionTokenStore::new(intro, clock.clone())?)
            }
        };

        // Introspected tokens are minted elsewhere and arrive bare.
        if config.tokens.macaroons && base.supports_create() {
            Ok(Self::Macaroon(MacaroonTokenStore::wrap(
                base,
                keys,
                &config.server.base_url,
                clock,
            )))
        } else {
            Ok(base)
        }
    }

    /// Stable label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Database(_) => "database",
            Self::Hmac(_) => "hmac",
            Self::Encrypted(_) => "encrypted",
            Self::Claims(_) => "claims",
            Self::OAuth2(_) => "oauth2",
            Self::Macaroon(_) => "macaroon",
        }
    }

    /// Whether tokens can be minted locally.
    pub fn supports_create(&self) -> bool {
        match self {
            Self::OAuth2(_) => false,
            Self::Macaroon(m) => m.inner().supports_create(),
            _ => true,
        }
    }

    /// The database store underneath, if any, for expiry cleanup.
    pub fn database(&self) -> Option<&DatabaseTokenStore> {
        match self {
            Self::Database(s) => Some(s),
            Self::Macaroon(m) => m.inner().database(),
            _ => None,
        }
    }

    /// Encode or persist `token`, returning the bearer string.
    pub fn create<'a>(
        &'a self,
        ctx: &'a TokenContext,
        token: &'a Token,
    ) -> BoxFuture<'a, Result<String, TokenError>> {
        Box::pin(async move {
            let result = match self {
                Self::Database(s) => s.create(token).await,
                Self::Hmac(s) => s.create(token),
                Self::Encrypted(s) => s.create(token),
                Self::Claims(s) => s.create(token),
                Self::OAuth2(_) => Err(TokenError::Unsupported("create")),
                Self::Macaroon(s) => s.create(ctx, token).await,
            };
            metrics::record_token_op(self.kind(), "create", op_outcome(&result));
            result
        })
    }

    /// Decode or look up a presented bearer string.
    pub fn inspect<'a>(&'a self, ctx: &'a TokenContext, id: &'a str) -> BoxFuture<'a, Validation> {
        Box::pin(async move {
            let validation = match self {
                Self::Database(s) => s.inspect(id).await,
                Self::Hmac(s) => s.inspect(id),
                Self::Encrypted(s) => s.inspect(id),
                Self::Claims(s) => s.inspect(id),
                Self::OAuth2(s) => s.inspect(id).await,
                Self::Macaroon(s) => s.inspect(ctx, id).await,
            };
            metrics::record_token_op(self.kind(), "read", validation.outcome());
            validation
        })
    }

    /// The token, if `id` is authentic and unexpired.
    pub async fn read(&self, ctx: &TokenContext, id: &str) -> Option<Token> {
        self.inspect(ctx, id).await.active()
    }

    /// Revoke a bearer string. Revoking an unknown or already revoked token
    /// is not an error.
    pub fn revoke<'a>(
        &'a self,
        ctx: &'a TokenContext,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), TokenError>> {
        Box::pin(async move {
            let result = match self {
                Self::Database(s) => s.revoke(id).await,
                Self::Hmac(_) | Self::Encrypted(_) | Self::Claims(_) => {
                    Err(TokenError::Unsupported("revoke"))
                }
                Self::OAuth2(s) => s.revoke(id).await,
                Self::Macaroon(s) => s.revoke(ctx, id).await,
            };
            metrics::record_token_op(self.kind(), "revoke", op_outcome(&result));
            result
        })
    }
}

fn op_outcome<T>(result: &Result<T, TokenError>) -> &'static str {
    if result.is_ok() { "ok" } else { "error" }
}

/// Canonical JSON body shared by the HMAC and encrypted stores.
#[derive(serde::Serialize, serde::Deserialize)]
pub(crate) struct Payload {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
}

impl Payload {
    pub fn from_token(token: &Token) -> Self {
        Self {
            sub: token.subject.clone(),
            exp: token.expiry.timestamp(),
            attrs: token.attributes.clone(),
        }
    }

    pub fn into_token(self) -> Option<Token> {
        Some(Token {
            subject: self.sub,
            expiry: DateTime::from_timestamp(self.exp, 0)?,
            attributes: self.attrs,
        })
    }
}

pub(crate) fn b64_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub(crate) fn b64_decode(text: &str) -> Option<Vec<u8>> {
    URL_SAFE_NO_PAD.decode(text).ok()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::Duration;

    pub fn ctx() -> TokenContext {
        TokenContext::new(Method::GET, "/spaces/1/messages")
    }

    pub fn sample_token(now: DateTime<Utc>) -> Token {
        Token::new("alice", now + Duration::minutes(10))
            .with_attribute(SCOPE_ATTRIBUTE, "post_message read_message")
    }

    /// Every single-character alteration of `encoded`, with its position.
    pub fn tamperings(encoded: &str) -> Vec<(usize, String)> {
        let bytes = encoded.as_bytes();
        (0..bytes.len())
            .map(|i| {
                let mut tampered = bytes.to_vec();
                // Stay inside the base64url alphabet so the damage reaches the crypto.
                tampered[i] = match tampered[i] {
                    b'A' => b'B',
                    b'.' => b'_',
                    _ => b'A',
                };
                (i, String::from_utf8(tampered).unwrap())
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn expiry_is_strict() {
        let now = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        let token = Token::new("alice", now);
        assert!(token.is_expired(now));
        assert!(!token.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn new_truncates_to_seconds() {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap() + Duration::milliseconds(750);
        assert_eq!(Token::new("a", t).expiry.timestamp_subsec_millis(), 0);
    }
}

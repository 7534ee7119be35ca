//! Capability minting and verification.

use super::{ACCESS_TOKEN_PARAM, CapabilityGrant};
use crate::authz::Permissions;
use crate::clock::SharedClock;
use crate::config::CapabilityConfig;
use crate::keys::{KeyRing, SecretKey};
use crate::metrics;
use crate::token::{b64_decode, b64_encode, whole_seconds};
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

/// Errors from minting or sharing a capability.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CapabilityError {
    #[error("capability must grant at least one permission")]
    NoPermissions,
    #[error("capability lifetime must be positive")]
    InvalidTtl,
    #[error("resource path must start with '/'")]
    InvalidPath,
    #[error("not a capability URI for this server")]
    ForeignUri,
    #[error("invalid or expired capability")]
    InvalidCapability,
    #[error("cannot widen {held:?} to {requested:?}")]
    Widening {
        held: Permissions,
        requested: Permissions,
    },
}

/// Upper bound on any configured lifetime (100 years).
const LIFETIME_CEILING_SECS: u64 = 100 * 365 * 86_400;

fn lifetime(secs: u64) -> Duration {
    Duration::seconds(secs.min(LIFETIME_CEILING_SECS) as i64)
}

/// Signed part of a capability.
#[derive(Serialize, Deserialize)]
struct Claims {
    path: String,
    perms: Permissions,
    exp: i64,
    kid: String,
}

pub struct CapabilityController {
    key: SecretKey,
    key_id: String,
    base_url: String,
    default_ttl: Duration,
    max_ttl: Duration,
    clock: SharedClock,
}

impl CapabilityController {
    pub fn new(
        keys: &KeyRing,
        base_url: &str,
        config: &CapabilityConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            key: keys.capability().clone(),
            key_id: keys.key_id().to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            default_ttl: lifetime(config.default_ttl_secs),
            max_ttl: lifetime(config.max_ttl_secs),
            clock,
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.key.as_bytes()).expect("HMAC can take key of any size")
    }

    /// Lifetime used when the caller has no opinion.
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Mint a link to `path` granting `perms` for `ttl`, clamped to the
    /// configured maximum.
    pub fn mint(
        &self,
        path: &str,
        perms: Permissions,
        ttl: Duration,
    ) -> Result<String, CapabilityError> {
        if ttl <= Duration::zero() {
            return Err(CapabilityError::InvalidTtl);
        }
        let now = self.clock.now();
        self.mint_until(path, perms, now + ttl.min(self.max_ttl))
    }

    /// Mint a link expiring at `expiry`, or at the configured maximum if
    /// that comes first.
    pub fn mint_until(
        &self,
        path: &str,
        perms: Permissions,
        expiry: DateTime<Utc>,
    ) -> Result<String, CapabilityError> {
        if perms.is_empty() {
            return Err(CapabilityError::NoPermissions);
        }
        if !path.starts_with('/') || path.contains(['?', '#']) {
            return Err(CapabilityError::InvalidPath);
        }
        let now = self.clock.now();
        let expiry = whole_seconds(expiry.min(now + self.max_ttl));
        if expiry <= now {
            return Err(CapabilityError::InvalidTtl);
        }

        let claims = Claims {
            path: path.to_string(),
            perms,
            exp: expiry.timestamp(),
            kid: self.key_id.clone(),
        };
        // Four plain fields always serialize.
        let payload = b64_encode(&serde_json::to_vec(&claims).unwrap_or_default());
        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        let sig = b64_encode(&mac.finalize().into_bytes());

        debug!(path, perms = %perms, expiry = %expiry, "capability minted");
        metrics::record_capability_op("mint", "ok");
        Ok(format!(
            "{}{path}?{ACCESS_TOKEN_PARAM}={sig}.{payload}",
            self.base_url
        ))
    }

    /// Check a presented `{sig}.{payload}` against the path being accessed.
    pub fn verify(&self, presented: &str, path: &str) -> Option<CapabilityGrant> {
        let grant = self.check(presented, path);
        metrics::record_capability_op("verify", if grant.is_some() { "ok" } else { "rejected" });
        grant
    }

    fn check(&self, presented: &str, path: &str) -> Option<CapabilityGrant> {
        let Some((sig, payload)) = presented.split_once('.') else {
            debug!(reason = "malformed", "capability rejected");
            return None;
        };
        let sig = b64_decode(sig)?;

        let mut mac = self.mac();
        mac.update(payload.as_bytes());
        if mac.verify_slice(&sig).is_err() {
            debug!(reason = "mac_mismatch", "capability rejected");
            return None;
        }

        let claims: Claims = serde_json::from_slice(&b64_decode(payload)?).ok()?;
        if claims.kid != self.key_id {
            debug!(kid = %claims.kid, reason = "unknown_key", "capability rejected");
            return None;
        }
        if claims.path != path {
            debug!(minted_for = %claims.path, path, reason = "wrong_path", "capability rejected");
            return None;
        }
        let expiry = DateTime::from_timestamp(claims.exp, 0)?;
        if self.clock.now() >= expiry {
            debug!(path, reason = "expired", "capability rejected");
            return None;
        }
        Some(CapabilityGrant::new(claims.path, claims.perms, expiry))
    }

    /// Split a capability URI minted by this server into `(path, token)`.
    pub fn parse_uri<'u>(&self, uri: &'u str) -> Option<(&'u str, &'u str)> {
        let rest = uri.strip_prefix(&self.base_url)?;
        let (path, query) = rest.split_once('?')?;
        if !path.starts_with('/') {
            return None;
        }
        let token = query
            .split('&')
            .filter_map(|pair| pair.split_once('='))
            .find_map(|(name, value)| (name == ACCESS_TOKEN_PARAM).then_some(value))?;
        Some((path, token))
    }

    /// Derive a link to the same resource with `perms`, which must be a
    /// subset of the presented link's. The new link never outlives it.
    pub fn share(&self, uri: &str, perms: Permissions) -> Result<String, CapabilityError> {
        let (path, token) = self.parse_uri(uri).ok_or(CapabilityError::ForeignUri)?;
        let grant = self
            .verify(token, path)
            .ok_or(CapabilityError::InvalidCapability)?;
        self.attenuate(&grant, perms)
    }

    /// Re-mint `grant` with no more than its permissions and no later expiry.
    pub fn attenuate(
        &self,
        grant: &CapabilityGrant,
        perms: Permissions,
    ) -> Result<String, CapabilityError> {
        if !grant.perms().contains(perms) {
            return Err(CapabilityError::Widening {
                held: grant.perms(),
                requested: perms,
            });
        }
        self.mint_until(grant.path(), perms, grant.expiry())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::keys::test_ring;
    use crate::token::test_support::tamperings;
    use std::sync::Arc;

    const BASE: &str = "https://natter.local";

    fn controller(clock: Arc<ManualClock>) -> CapabilityController {
        CapabilityController::new(&test_ring(), BASE, &CapabilityConfig::default(), clock)
    }

    fn token_of<'u>(controller: &CapabilityController, uri: &'u str) -> &'u str {
        controller.parse_uri(uri).unwrap().1
    }

    #[test]
    fn read_capability_for_messages() {
        let clock = ManualClock::starting_now();
        let caps = controller(clock.clone());
        let uri = caps
            .mint("/spaces/42/messages", Permissions::READ, Duration::minutes(10))
            .unwrap();
        assert!(uri.starts_with("https://natter.local/spaces/42/messages?access_token="));

        let grant = caps.verify(token_of(&caps, &uri), "/spaces/42/messages").unwrap();
        assert!(grant.perms().contains(Permissions::READ));
        assert!(!grant.perms().contains(Permissions::WRITE));

        clock.advance(Duration::minutes(10));
        assert_eq!(caps.verify(token_of(&caps, &uri), "/spaces/42/messages"), None);
    }

    #[test]
    fn path_must_match_exactly() {
        let clock = ManualClock::starting_now();
        let caps = controller(clock);
        let uri = caps
            .mint("/spaces/42/messages", Permissions::ALL, Duration::minutes(10))
            .unwrap();
        let token = token_of(&caps, &uri);
        for other in [
            "/spaces/4/messages",
            "/spaces/42/messages/1",
            "/spaces/42",
            "/spaces/42/messages/",
        ] {
            assert_eq!(caps.verify(token, other), None, "{other}");
        }
    }

    #[test]
    fn ttl_is_clamped_to_maximum() {
        let clock = ManualClock::starting_now();
        let caps = controller(clock.clone());
        let uri = caps
            .mint("/spaces/1/messages", Permissions::READ, Duration::days(100_000))
            .unwrap();
        let grant = caps.verify(token_of(&caps, &uri), "/spaces/1/messages").unwrap();
        assert!(grant.expiry() <= clock.now() + Duration::days(30));

        clock.advance(Duration::days(30));
        assert_eq!(caps.verify(token_of(&caps, &uri), "/spaces/1/messages"), None);
    }

    #[test]
    fn mint_refuses_empty_grants_and_bad_paths() {
        let caps = controller(ManualClock::starting_now());
        let ttl = Duration::minutes(1);
        assert_eq!(
            caps.mint("/spaces/1", Permissions::NONE, ttl),
            Err(CapabilityError::NoPermissions)
        );
        assert_eq!(
            caps.mint("spaces/1", Permissions::READ, ttl),
            Err(CapabilityError::InvalidPath)
        );
        assert_eq!(
            caps.mint("/spaces/1", Permissions::READ, Duration::zero()),
            Err(CapabilityError::InvalidTtl)
        );
    }

    #[test]
    fn share_narrows_and_never_outlives() {
        let clock = ManualClock::starting_now();
        let caps = controller(clock.clone());
        let rw_perms = Permissions::READ.union(Permissions::WRITE);
        let rw = caps
            .mint("/spaces/7/messages", rw_perms, Duration::minutes(10))
            .unwrap();

        let r = caps.share(&rw, Permissions::READ).unwrap();
        let original = caps.verify(token_of(&caps, &rw), "/spaces/7/messages").unwrap();
        let shared = caps.verify(token_of(&caps, &r), "/spaces/7/messages").unwrap();
        assert_eq!(shared.perms(), Permissions::READ);
        assert!(shared.expiry() <= original.expiry());

        assert!(matches!(
            caps.share(&r, Permissions::ALL),
            Err(CapabilityError::Widening { .. })
        ));
        assert_eq!(
            caps.share(
                "https://evil.example/spaces/7/messages?access_token=x.y",
                Permissions::READ
            ),
            Err(CapabilityError::ForeignUri)
        );
    }

    #[test]
    fn any_altered_character_is_rejected() {
        let caps = controller(ManualClock::starting_now());
        let uri = caps
            .mint("/spaces/42/messages", Permissions::READ, Duration::minutes(10))
            .unwrap();
        for (i, tampered) in tamperings(token_of(&caps, &uri)) {
            assert_eq!(caps.verify(&tampered, "/spaces/42/messages"), None, "position {i}");
        }
    }
}

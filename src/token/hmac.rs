//! Self-contained tokens authenticated with HMAC-SHA256.
//!
//! Wire form: `{kid}.{base64url(json)}.{base64url(tag)}`, where the tag covers
//! everything before the last dot. Nothing is confidential.

use super::{Payload, Token, TokenError, Validation, b64_decode, b64_encode};
use crate::clock::SharedClock;
use crate::keys::{KeyRing, SecretKey};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub struct HmacTokenStore {
    key_id: String,
    key: SecretKey,
    clock: SharedClock,
}

impl HmacTokenStore {
    pub fn new(keys: &KeyRing, clock: SharedClock) -> Self {
        Self {
            key_id: keys.key_id().to_string(),
            key: keys.token_mac().clone(),
            clock,
        }
    }

    fn mac(&self) -> HmacSha256 {
        HmacSha256::new_from_slice(self.key.as_bytes()).expect("HMAC can take key of any size")
    }

    pub(super) fn create(&self, token: &Token) -> Result<String, TokenError> {
        let json = serde_json::to_vec(&Payload::from_token(token))
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        let signed = format!("{}.{}", self.key_id, b64_encode(&json));

        let mut mac = self.mac();
        mac.update(signed.as_bytes());
        let tag = mac.finalize().into_bytes();

        Ok(format!("{signed}.{}", b64_encode(&tag)))
    }

    pub(super) fn inspect(&self, id: &str) -> Validation {
        match self.decode(id) {
            Some(token) => Validation::check_expiry(token, self.clock.now()),
            None => Validation::Invalid,
        }
    }

    fn decode(&self, id: &str) -> Option<Token> {
        let Some((signed, tag)) = id.rsplit_once('.') else {
            debug!(reason = "malformed", "hmac token rejected");
            return None;
        };
        let tag = b64_decode(tag)?;

        let mut mac = self.mac();
        mac.update(signed.as_bytes());
        if mac.verify_slice(&tag).is_err() {
            debug!(reason = "mac_mismatch", "hmac token rejected");
            return None;
        }

        // Authentic from here on.
        let (kid, payload) = signed.split_once('.')?;
        if kid != self.key_id {
            debug!(kid, reason = "unknown_key", "hmac token rejected");
            return None;
        }
        let payload: Payload = serde_json::from_slice(&b64_decode(payload)?).ok()?;
        payload.into_token()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::keys::{KeyRing, test_ring};
    use crate::token::TokenStore;
    use crate::token::test_support::{ctx, sample_token, tamperings};
    use chrono::Duration;

    #[tokio::test]
    async fn round_trip() {
        let clock = ManualClock::starting_now();
        let store = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
        let token = sample_token(clock.now());

        let id = store.create(&ctx(), &token).await.unwrap();
        assert!(id.starts_with("test."));
        assert_eq!(store.read(&ctx(), &id).await, Some(token));
    }

    #[tokio::test]
    async fn expired_even_with_valid_tag() {
        let clock = ManualClock::starting_now();
        let store = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
        let id = store.create(&ctx(), &sample_token(clock.now())).await.unwrap();

        clock.advance(Duration::minutes(10));
        assert_eq!(store.inspect(&ctx(), &id).await, Validation::Expired);
    }

    #[tokio::test]
    async fn any_altered_character_is_rejected() {
        let clock = ManualClock::starting_now();
        let store = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
        let id = store.create(&ctx(), &sample_token(clock.now())).await.unwrap();

        for (i, tampered) in tamperings(&id) {
            assert_eq!(store.read(&ctx(), &tampered).await, None, "position {i}");
        }
    }

    #[tokio::test]
    async fn other_key_is_rejected() {
        let clock = ManualClock::starting_now();
        let ours = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
        let other_root: Vec<u8> = (64u8..96).collect();
        let theirs = KeyRing::derive(&other_root, "test").unwrap();
        let theirs = TokenStore::Hmac(HmacTokenStore::new(&theirs, clock.clone()));

        let id = theirs.create(&ctx(), &sample_token(clock.now())).await.unwrap();
        assert_eq!(ours.read(&ctx(), &id).await, None);
    }

    #[tokio::test]
    async fn not_revocable() {
        let clock = ManualClock::starting_now();
        let store = TokenStore::Hmac(HmacTokenStore::new(&test_ring(), clock.clone()));
        let id = store.create(&ctx(), &sample_token(clock.now())).await.unwrap();
        assert!(matches!(
            store.revoke(&ctx(), &id).await,
            Err(TokenError::Unsupported("revoke"))
        ));
    }
}

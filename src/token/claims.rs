//! Encrypted JWTs: standard claims in a compact JWE.
//!
//! Header `{"alg":"dir","enc":"A256GCM","kid":...}`, no encrypted key, a
//! 96-bit IV, and the base64url header as associated data (RFC 7516 §5.1).
//! Any holder of the shared key can open and check it with a stock JOSE
//! library.

use super::{Token, TokenError, Validation, b64_decode, b64_encode};
use crate::clock::SharedClock;
use crate::keys::KeyRing;
use aes_gcm::aead::{Aead, KeyInit, Payload as Sealed};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use zeroize::Zeroizing;

const IV_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Claim names the token's own fields occupy.
const REGISTERED: [&str; 7] = ["sub", "exp", "iat", "nbf", "iss", "aud", "jti"];

#[derive(Serialize, Deserialize, PartialEq, Eq)]
struct Header {
    alg: String,
    enc: String,
    kid: String,
}

pub struct ClaimsTokenStore {
    header: String,
    kid: String,
    cipher: Aes256Gcm,
    issuer: String,
    audience: String,
    clock: SharedClock,
}

impl ClaimsTokenStore {
    pub fn new(keys: &KeyRing, issuer: String, audience: String, clock: SharedClock) -> Self {
        let header = Header {
            alg: "dir".to_string(),
            enc: "A256GCM".to_string(),
            kid: keys.key_id().to_string(),
        };
        // A struct of three strings always serializes.
        let header = b64_encode(&serde_json::to_vec(&header).unwrap_or_default());
        Self {
            header,
            kid: keys.key_id().to_string(),
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(
                keys.claims_encryption().as_bytes(),
            )),
            issuer,
            audience,
            clock,
        }
    }

    pub(super) fn create(&self, token: &Token) -> Result<String, TokenError> {
        let mut claims = Map::new();
        for (name, value) in &token.attributes {
            if REGISTERED.contains(&name.as_str()) {
                return Err(TokenError::Encoding(format!(
                    "attribute {name:?} collides with a registered claim"
                )));
            }
            claims.insert(name.clone(), Value::String(value.clone()));
        }
        claims.insert("sub".into(), token.subject.clone().into());
        claims.insert("exp".into(), token.expiry.timestamp().into());
        claims.insert("iat".into(), self.clock.now().timestamp().into());
        claims.insert("iss".into(), self.issuer.clone().into());
        claims.insert("aud".into(), self.audience.clone().into());
        claims.insert("jti".into(), uuid::Uuid::new_v4().to_string().into());

        let plaintext = Zeroizing::new(
            serde_json::to_vec(&claims).map_err(|e| TokenError::Encoding(e.to_string()))?,
        );
        let mut iv = [0u8; IV_LEN];
        rand::thread_rng().fill_bytes(&mut iv);
        let mut sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(&iv),
                Sealed {
                    msg: &plaintext,
                    aad: self.header.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Encoding("encryption failed".to_string()))?;
        let tag = sealed.split_off(sealed.len() - TAG_LEN);

        Ok(format!(
            "{}..{}.{}.{}",
            self.header,
            b64_encode(&iv),
            b64_encode(&sealed),
            b64_encode(&tag)
        ))
    }

    pub(super) fn inspect(&self, id: &str) -> Validation {
        match self.decode(id) {
            Some(token) => Validation::check_expiry(token, self.clock.now()),
            None => Validation::Invalid,
        }
    }

    fn decode(&self, id: &str) -> Option<Token> {
        let parts: Vec<&str> = id.split('.').collect();
        let [header, encrypted_key, iv, ciphertext, tag] = parts.as_slice() else {
            debug!(reason = "malformed", "jwe rejected");
            return None;
        };
        if !encrypted_key.is_empty() {
            debug!(reason = "unexpected_cek", "jwe rejected");
            return None;
        }
        let parsed: Header = serde_json::from_slice(&b64_decode(header)?).ok()?;
        if parsed.alg != "dir" || parsed.enc != "A256GCM" || parsed.kid != self.kid {
            debug!(
                alg = %parsed.alg,
                enc = %parsed.enc,
                reason = "unsupported_header",
                "jwe rejected"
            );
            return None;
        }

        let iv = b64_decode(iv)?;
        if iv.len() != IV_LEN {
            return None;
        }
        let mut sealed = b64_decode(ciphertext)?;
        sealed.extend_from_slice(&b64_decode(tag)?);

        let Ok(plaintext) = self.cipher.decrypt(
            Nonce::from_slice(&iv),
            Sealed {
                msg: &sealed,
                aad: header.as_bytes(),
            },
        ) else {
            debug!(reason = "aead_failure", "jwe rejected");
            return None;
        };
        let plaintext = Zeroizing::new(plaintext);
        let mut claims: Map<String, Value> = serde_json::from_slice(&plaintext).ok()?;

        if claims.get("iss").and_then(Value::as_str) != Some(self.issuer.as_str())
            || claims.get("aud").and_then(Value::as_str) != Some(self.audience.as_str())
        {
            debug!(reason = "wrong_issuer_or_audience", "jwe rejected");
            return None;
        }

        let subject = claims.get("sub")?.as_str()?.to_string();
        let expiry = chrono::DateTime::from_timestamp(claims.get("exp")?.as_i64()?, 0)?;
        for name in REGISTERED {
            claims.remove(name);
        }
        let attributes = claims
            .into_iter()
            .filter_map(|(name, value)| match value {
                Value::String(s) => Some((name, s)),
                _ => None,
            })
            .collect();

        Some(Token {
            subject,
            expiry,
            attributes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::keys::test_ring;
    use crate::token::TokenStore;
    use crate::token::test_support::{ctx, sample_token, tamperings};
    use chrono::Duration;
    use std::sync::Arc;

    fn store(clock: Arc<ManualClock>, audience: &str) -> TokenStore {
        TokenStore::Claims(ClaimsTokenStore::new(
            &test_ring(),
            "https://natter.local".to_string(),
            audience.to_string(),
            clock,
        ))
    }

    #[tokio::test]
    async fn round_trip_through_compact_jwe() {
        let clock = ManualClock::starting_now();
        let store = store(clock.clone(), "https://natter.local");
        let token = sample_token(clock.now());

        let id = store.create(&ctx(), &token).await.unwrap();
        let parts: Vec<&str> = id.split('.').collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[1].is_empty());

        let header: serde_json::Value =
            serde_json::from_slice(&b64_decode(parts[0]).unwrap()).unwrap();
        assert_eq!(header["alg"], "dir");
        assert_eq!(header["enc"], "A256GCM");
        assert_eq!(header["kid"], "test");

        assert_eq!(store.read(&ctx(), &id).await, Some(token));
    }

    #[tokio::test]
    async fn exp_claim_is_enforced() {
        let clock = ManualClock::starting_now();
        let store = store(clock.clone(), "https://natter.local");
        let id = store.create(&ctx(), &sample_token(clock.now())).await.unwrap();

        clock.advance(Duration::minutes(10));
        assert_eq!(store.inspect(&ctx(), &id).await, Validation::Expired);
    }

    #[tokio::test]
    async fn other_audience_is_rejected() {
        let clock = ManualClock::starting_now();
        let ours = store(clock.clone(), "https://natter.local");
        let theirs = store(clock.clone(), "https://elsewhere.example");
        let id = theirs.create(&ctx(), &sample_token(clock.now())).await.unwrap();
        assert_eq!(ours.read(&ctx(), &id).await, None);
    }

    #[tokio::test]
    async fn registered_claim_attributes_are_refused() {
        let clock = ManualClock::starting_now();
        let store = store(clock.clone(), "https://natter.local");
        let token = sample_token(clock.now()).with_attribute("sub", "mallory");
        assert!(matches!(
            store.create(&ctx(), &token).await,
            Err(TokenError::Encoding(_))
        ));
    }

    #[tokio::test]
    async fn any_altered_character_is_rejected() {
        let clock = ManualClock::starting_now();
        let store = store(clock.clone(), "https://natter.local");
        let id = store.create(&ctx(), &sample_token(clock.now())).await.unwrap();
        for (i, tampered) in tamperings(&id) {
            assert_eq!(store.read(&ctx(), &tampered).await, None, "position {i}");
        }
    }
}

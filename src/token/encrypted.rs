//! Self-contained tokens sealed with XChaCha20-Poly1305.
//!
//! Wire form: `{kid}.{base64url(nonce || ciphertext || tag)}`. The key id is
//! bound as associated data, so it cannot be swapped without failing the
//! AEAD check.

use super::{Payload, Token, TokenError, Validation, b64_decode, b64_encode};
use crate::clock::SharedClock;
use crate::keys::KeyRing;
use chacha20poly1305::aead::{Aead, KeyInit, Payload as Sealed};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 24;

pub struct EncryptedTokenStore {
    key_id: String,
    cipher: XChaCha20Poly1305,
    clock: SharedClock,
}

impl EncryptedTokenStore {
    pub fn new(keys: &KeyRing, clock: SharedClock) -> Self {
        Self {
            key_id: keys.key_id().to_string(),
            cipher: XChaCha20Poly1305::new(Key::from_slice(keys.token_encryption().as_bytes())),
            clock,
        }
    }

    pub(super) fn create(&self, token: &Token) -> Result<String, TokenError> {
        let json = Zeroizing::new(
            serde_json::to_vec(&Payload::from_token(token))
                .map_err(|e| TokenError::Encoding(e.to_string()))?,
        );

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);
        let sealed = self
            .cipher
            .encrypt(
                XNonce::from_slice(&nonce),
                Sealed {
                    msg: &json,
                    aad: self.key_id.as_bytes(),
                },
            )
            .map_err(|_| TokenError::Encoding("encryption failed".to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + sealed.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&sealed);
        Ok(format!("{}.{}", self.key_id, b64_encode(&blob)))
    }

    pub(super) fn inspect(&self, id: &str) -> Validation {
        match self.decode(id) {
            Some(token) => Validation::check_expiry(token, self.clock.now()),
            None => Validation::Invalid,
        }
    }

    fn decode(&self, id: &str) -> Option<Token> {
        let (kid, blob) = id.split_once('.')?;
        if kid != self.key_id {
            debug!(reason = "unknown_key", "encrypted token rejected");
            return None;
        }
        let blob = b64_decode(blob)?;
        if blob.len() <= NONCE_LEN {
            debug!(reason = "malformed", "encrypted token rejected");
            return None;
        }
        let (nonce, sealed) = blob.split_at(NONCE_LEN);

        // Authentication happens inside decrypt; no plaintext escapes on failure.
        let Ok(json) = self.cipher.decrypt(
            XNonce::from_slice(nonce),
            Sealed {
                msg: sealed,
                aad: kid.as_bytes(),
            },
        ) else {
            debug!(reason = "aead_failure", "encrypted token rejected");
            return None;
        };
        let json = Zeroizing::new(json);

        let payload: Payload = serde_json::from_slice(&json).ok()?;
        payload.into_token()
    }
}

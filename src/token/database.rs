//! Opaque tokens backed by the `tokens` table.
//!
//! The bearer string is 160 random bits; only its SHA-256 hash is stored.

use super::{Token, TokenError, Validation, b64_encode};
use crate::clock::SharedClock;
use crate::db::{Database, TokenRecord};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

const ID_BYTES: usize = 20;

pub struct DatabaseTokenStore {
    db: Database,
    clock: SharedClock,
}

impl DatabaseTokenStore {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub(super) async fn create(&self, token: &Token) -> Result<String, TokenError> {
        let mut raw = [0u8; ID_BYTES];
        rand::thread_rng().fill_bytes(&mut raw);
        let id = b64_encode(&raw);

        let record = TokenRecord {
            user_id: token.subject.clone(),
            expiry: token.expiry,
            attributes: token.attributes.clone(),
        };
        self.db.tokens().insert(&hash_id(&id), &record).await?;
        Ok(id)
    }

    pub(super) async fn inspect(&self, id: &str) -> Validation {
        match self.db.tokens().find(&hash_id(id)).await {
            Ok(Some(record)) => {
                let token = Token {
                    subject: record.user_id,
                    expiry: record.expiry,
                    attributes: record.attributes,
                };
                Validation::check_expiry(token, self.clock.now())
            }
            Ok(None) => {
                debug!(reason = "unknown_id", "database token rejected");
                Validation::Invalid
            }
            Err(e) => {
                warn!(error = %e, "token lookup failed");
                Validation::Invalid
            }
        }
    }

    pub(super) async fn revoke(&self, id: &str) -> Result<(), TokenError> {
        self.db.tokens().delete(&hash_id(id)).await?;
        Ok(())
    }

    /// Delete rows that expired before now.
    pub async fn delete_expired(&self) -> Result<u64, TokenError> {
        Ok(self.db.tokens().delete_expired(self.clock.now()).await?)
    }
}

/// Storage key for a bearer id.
fn hash_id(id: &str) -> String {
    b64_encode(&Sha256::digest(id.as_bytes()))
}

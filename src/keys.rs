//! Process-wide key material.
//!
//! A single root secret is expanded with HKDF-SHA256 into one independent key
//! per purpose. The labels are fixed; changing one invalidates every
//! credential minted under it.

use crate::config::KeysConfig;
use hkdf::Hkdf;
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Minimum decoded root secret length.
pub const MIN_ROOT_SECRET_LEN: usize = 32;

const TOKEN_MAC_LABEL: &[u8] = b"natter/v1/token-mac";
const TOKEN_ENCRYPTION_LABEL: &[u8] = b"natter/v1/token-encryption";
const CLAIMS_ENCRYPTION_LABEL: &[u8] = b"natter/v1/claims-encryption";
const MACAROON_LABEL: &[u8] = b"natter/v1/macaroon-root";
const CAPABILITY_LABEL: &[u8] = b"natter/v1/capability-signing";

/// Key loading errors.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read root secret file: {0}")]
    Io(#[from] std::io::Error),
    #[error("root secret is not valid hex")]
    NotHex,
    #[error("root secret must be at least 32 bytes, got {0}")]
    TooShort(usize),
    #[error("root secret has too little variety to be a real secret")]
    Weak,
    #[error("no root secret configured")]
    Missing,
}

/// A 32-byte symmetric key, wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey([u8; 32]);

impl SecretKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey([REDACTED])")
    }
}

/// The set of derived keys, built once at startup.
#[derive(Clone, Debug)]
pub struct KeyRing {
    key_id: String,
    token_mac: SecretKey,
    token_encryption: SecretKey,
    claims_encryption: SecretKey,
    macaroon: SecretKey,
    capability: SecretKey,
}

impl KeyRing {
    /// Load the root secret named by the config and derive the ring.
    pub fn from_config(config: &KeysConfig) -> Result<Self, KeyError> {
        let hex_text = match (&config.root_secret, &config.root_secret_file) {
            (Some(inline), _) => Zeroizing::new(inline.clone()),
            (None, Some(path)) => Zeroizing::new(std::fs::read_to_string(path)?),
            (None, None) => return Err(KeyError::Missing),
        };
        let root = Zeroizing::new(hex::decode(hex_text.trim()).map_err(|_| KeyError::NotHex)?);
        Self::derive(&root, &config.key_id)
    }

    /// Derive every purpose key from `root`.
    pub fn derive(root: &[u8], key_id: &str) -> Result<Self, KeyError> {
        check_root_secret(root)?;
        let hkdf = Hkdf::<Sha256>::new(Some(key_id.as_bytes()), root);
        let expand = |label: &[u8]| {
            let mut out = [0u8; 32];
            hkdf.expand(label, &mut out)
                .expect("32 bytes is a valid HKDF-SHA256 output length");
            SecretKey(out)
        };

        Ok(Self {
            key_id: key_id.to_string(),
            token_mac: expand(TOKEN_MAC_LABEL),
            token_encryption: expand(TOKEN_ENCRYPTION_LABEL),
            claims_encryption: expand(CLAIMS_ENCRYPTION_LABEL),
            macaroon: expand(MACAROON_LABEL),
            capability: expand(CAPABILITY_LABEL),
        })
    }

    /// Identifier embedded in self-contained credentials.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// HMAC key for self-contained signed tokens.
    pub fn token_mac(&self) -> &SecretKey {
        &self.token_mac
    }

    /// AEAD key for self-contained encrypted tokens.
    pub fn token_encryption(&self) -> &SecretKey {
        &self.token_encryption
    }

    /// AEAD key for the JWE claims envelope.
    pub fn claims_encryption(&self) -> &SecretKey {
        &self.claims_encryption
    }

    /// Root key for macaroon chains.
    pub fn macaroon(&self) -> &SecretKey {
        &self.macaroon
    }

    /// HMAC key for capability URIs.
    pub fn capability(&self) -> &SecretKey {
        &self.capability
    }
}

/// Refuse secrets that are short or obviously not random.
fn check_root_secret(root: &[u8]) -> Result<(), KeyError> {
    if root.len() < MIN_ROOT_SECRET_LEN {
        return Err(KeyError::TooShort(root.len()));
    }
    let mut seen = [false; 256];
    let distinct = root
        .iter()
        .filter(|b| !std::mem::replace(&mut seen[**b as usize], true))
        .count();
    if distinct < 8 {
        return Err(KeyError::Weak);
    }
    Ok(())
}

/// A ring derived from a fixed, well-varied secret. Test support only.
#[cfg(test)]
pub(crate) fn test_ring() -> KeyRing {
    let root: Vec<u8> = (0u8..32).collect();
    KeyRing::derive(&root, "test").expect("fixed test secret is valid")
}

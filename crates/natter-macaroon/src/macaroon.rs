//! The macaroon value type, its HMAC chain and its wire format.
//!
//! Binary layout (big-endian lengths):
//!
//! ```text
//! [version: u8]
//! [location_len: u16] [location]
//! [identifier_len: u16] [identifier]
//! [caveat_count: u16]
//! for each caveat: [caveat_len: u16] [caveat]
//! [signature: 32 bytes]
//! ```
//!
//! The text form is the binary layout encoded as unpadded base64url, which is
//! safe to place in an `Authorization` header or a query string.

use crate::error::{MacaroonError, Result};
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Current wire format version.
pub const WIRE_VERSION: u8 = 1;

/// Length of an HMAC-SHA256 chain signature.
pub const SIGNATURE_LEN: usize = 32;

/// Upper bound on caveats a macaroon may carry.
pub const MAX_CAVEATS: usize = 64;

/// Longest location, identifier or caveat the u16 length prefix can describe.
pub const MAX_FIELD_LEN: usize = u16::MAX as usize;

/// A chained HMAC signature.
#[derive(Clone, Copy)]
pub struct Signature([u8; SIGNATURE_LEN]);

impl Signature {
    /// Raw signature bytes.
    pub fn as_bytes(&self) -> &[u8; SIGNATURE_LEN] {
        &self.0
    }
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Signature {}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

fn hmac(key: &[u8], message: &[u8]) -> Signature {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC can take key of any size");
    mac.update(message);
    let mut out = [0u8; SIGNATURE_LEN];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Signature(out)
}

/// A first-party macaroon.
///
/// The identifier is opaque to this crate; token stores use it to carry the
/// credential they delegate to. Caveats are UTF-8 predicates whose meaning is
/// defined by whoever registers satisfiers on a [`Verifier`](crate::Verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Macaroon {
    location: String,
    identifier: String,
    caveats: Vec<String>,
    signature: Signature,
}

impl Macaroon {
    /// Mint a macaroon with no caveats under `root_key`.
    pub fn new(location: &str, root_key: &[u8], identifier: &str) -> Result<Self> {
        check_field("location", location)?;
        check_field("identifier", identifier)?;
        Ok(Self {
            location: location.to_string(),
            identifier: identifier.to_string(),
            caveats: Vec::new(),
            signature: hmac(root_key, identifier.as_bytes()),
        })
    }

    /// Append a first-party caveat, extending the signature chain.
    ///
    /// Needs no key: the current signature is the key for the next link.
    /// The macaroon is left unchanged on error.
    pub fn add_caveat(&mut self, caveat: &str) -> Result<()> {
        if self.caveats.len() >= MAX_CAVEATS {
            return Err(MacaroonError::TooManyCaveats);
        }
        check_field("caveat", caveat)?;
        self.signature = hmac(&self.signature.0, caveat.as_bytes());
        self.caveats.push(caveat.to_string());
        Ok(())
    }

    /// Builder form of [`add_caveat`](Self::add_caveat).
    pub fn with_caveat(mut self, caveat: &str) -> Result<Self> {
        self.add_caveat(caveat)?;
        Ok(self)
    }

    /// Location hint.
    pub fn location(&self) -> &str {
        &self.location
    }

    /// The identifier the macaroon was minted for.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Caveats in chain order.
    pub fn caveats(&self) -> &[String] {
        &self.caveats
    }

    /// Final signature of the chain.
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Recompute the chain from `root_key` and compare in constant time.
    pub fn verify_signature(&self, root_key: &[u8]) -> bool {
        let mut sig = hmac(root_key, self.identifier.as_bytes());
        for caveat in &self.caveats {
            sig = hmac(&sig.0, caveat.as_bytes());
        }
        sig == self.signature
    }

    /// Encode to the binary wire layout.
    ///
    /// Every field was bounded by [`MAX_FIELD_LEN`] and the caveat count by
    /// [`MAX_CAVEATS`] when it entered the macaroon, so the prefixes fit.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            1 + 6 + self.location.len() + self.identifier.len() + SIGNATURE_LEN,
        );
        buf.push(WIRE_VERSION);
        put_field(&mut buf, self.location.as_bytes());
        put_field(&mut buf, self.identifier.as_bytes());
        buf.extend_from_slice(&(self.caveats.len() as u16).to_be_bytes());
        for caveat in &self.caveats {
            put_field(&mut buf, caveat.as_bytes());
        }
        buf.extend_from_slice(&self.signature.0);
        buf
    }

    /// Decode the binary wire layout. Trailing bytes are rejected.
    pub fn from_binary(data: &[u8]) -> Result<Self> {
        let mut reader = Reader { data, pos: 0 };

        let version = reader.byte()?;
        if version != WIRE_VERSION {
            return Err(MacaroonError::UnsupportedVersion(version));
        }

        let location = reader.string()?;
        let identifier = reader.string()?;

        let count = reader.u16()? as usize;
        if count > MAX_CAVEATS {
            return Err(MacaroonError::TooManyCaveats);
        }
        let mut caveats = Vec::with_capacity(count);
        for _ in 0..count {
            caveats.push(reader.string()?);
        }

        let sig: [u8; SIGNATURE_LEN] = reader
            .take(SIGNATURE_LEN)?
            .try_into()
            .map_err(|_| MacaroonError::Malformed("signature"))?;

        if reader.pos != data.len() {
            return Err(MacaroonError::Malformed("trailing bytes"));
        }

        Ok(Self {
            location,
            identifier,
            caveats,
            signature: Signature(sig),
        })
    }

    /// Encode to unpadded base64url text.
    pub fn serialize(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_binary())
    }

    /// Decode from unpadded base64url text.
    pub fn deserialize(text: &str) -> Result<Self> {
        let data = URL_SAFE_NO_PAD
            .decode(text.trim())
            .map_err(|_| MacaroonError::Encoding)?;
        Self::from_binary(&data)
    }
}

fn check_field(field: &'static str, value: &str) -> Result<()> {
    if value.len() > MAX_FIELD_LEN {
        return Err(MacaroonError::FieldTooLong(field));
    }
    Ok(())
}

fn put_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(MacaroonError::Malformed("truncated"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn byte(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    }

    fn string(&mut self) -> Result<String> {
        let len = self.u16()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| MacaroonError::Malformed("utf-8"))
    }
}

//! Capability URIs.
//!
//! A capability is a link that carries its own authority:
//!
//! ```text
//! https://api.natter.local/spaces/42/messages?access_token={sig}.{payload}
//! ```
//!
//! `payload` is base64url JSON naming the path, the permissions and the
//! expiry; `sig` is HMAC-SHA256 over the encoded payload under the capability
//! key. Possession of the link is the grant. Nothing is stored server-side,
//! so a capability cannot be revoked; it lapses at its expiry, which every
//! mint clamps to the configured maximum.
//!
//! Only [`CapabilityController`] can produce a [`CapabilityGrant`]: either
//! by minting one or by verifying a presented link against the path actually
//! being accessed.

mod controller;

pub use controller::{CapabilityController, CapabilityError};

use crate::authz::Permissions;
use chrono::{DateTime, Utc};

/// Query parameter carrying a capability.
pub const ACCESS_TOKEN_PARAM: &str = "access_token";

/// A verified capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityGrant {
    path: String,
    perms: Permissions,
    expiry: DateTime<Utc>,
}

impl CapabilityGrant {
    pub(super) fn new(path: String, perms: Permissions, expiry: DateTime<Utc>) -> Self {
        Self {
            path,
            perms,
            expiry,
        }
    }

    /// The exact resource path the capability was minted for.
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn perms(&self) -> Permissions {
        self.perms
    }

    pub fn expiry(&self) -> DateTime<Utc> {
        self.expiry
    }
}

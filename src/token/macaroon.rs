//! Macaroon wrapper around another token store.
//!
//! The inner store's bearer string becomes the macaroon identifier. The
//! client only ever sees the macaroon, which it may narrow with first-party
//! caveats before handing it on:
//!
//! ```text
//! time < 2026-01-01T00:00:00Z
//! time > 2025-12-31T00:00:00Z
//! method = GET
//! path = /spaces/42
//! ```
//!
//! Revocation goes to the inner store, so revoking the identifier kills
//! every macaroon derived from it.

use super::{BoxFuture, Token, TokenContext, TokenError, TokenStore, Validation};
use crate::clock::SharedClock;
use crate::keys::{KeyRing, SecretKey};
use chrono::{DateTime, SecondsFormat, Utc};
use http::Method;
use natter_macaroon::{Macaroon, Verifier};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// A first-party caveat this server knows how to check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caveat {
    /// `time < T`: usable strictly before `T`.
    Before(DateTime<Utc>),
    /// `time > T`: usable strictly after `T`.
    After(DateTime<Utc>),
    /// `method = VERB`
    Method(Method),
    /// `path = /prefix`: the request path is the prefix or below it.
    Path(String),
}

impl Caveat {
    pub fn holds(&self, ctx: &TokenContext, now: DateTime<Utc>) -> bool {
        match self {
            Self::Before(t) => now < *t,
            Self::After(t) => now > *t,
            Self::Method(m) => ctx.method == *m,
            Self::Path(prefix) => path_within(&ctx.path, prefix),
        }
    }
}

fn path_within(path: &str, prefix: &str) -> bool {
    match path.strip_prefix(prefix) {
        Some(rest) => rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/'),
        None => false,
    }
}

impl FromStr for Caveat {
    type Err = TokenError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let invalid = || TokenError::InvalidCaveat(text.to_string());
        let mut parts = text.splitn(3, ' ');
        let (Some(key), Some(op), Some(value)) = (parts.next(), parts.next(), parts.next()) else {
            return Err(invalid());
        };

        let time = |v: &str| {
            DateTime::parse_from_rfc3339(v)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| invalid())
        };
        let verb = !value.is_empty() && value.bytes().all(|b| b.is_ascii_uppercase());
        match (key, op) {
            ("time", "<") => Ok(Self::Before(time(value)?)),
            ("time", ">") => Ok(Self::After(time(value)?)),
            ("method", "=") if verb => {
                Method::from_bytes(value.as_bytes())
                    .map(Self::Method)
                    .map_err(|_| invalid())
            }
            ("path", "=") if value.starts_with('/') && !value.contains(char::is_whitespace) => {
                Ok(Self::Path(value.to_string()))
            }
            _ => Err(invalid()),
        }
    }
}

fn rfc3339(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

impl fmt::Display for Caveat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Before(t) => write!(f, "time < {}", rfc3339(t)),
            Self::After(t) => write!(f, "time > {}", rfc3339(t)),
            Self::Method(m) => write!(f, "method = {m}"),
            Self::Path(p) => write!(f, "path = {p}"),
        }
    }
}

pub struct MacaroonTokenStore {
    inner: Box<TokenStore>,
    key: SecretKey,
    location: String,
    clock: SharedClock,
}

impl MacaroonTokenStore {
    /// Wrap `inner`. Macaroons are minted for, and only accepted at,
    /// `location`.
    pub fn wrap(inner: TokenStore, keys: &KeyRing, location: &str, clock: SharedClock) -> Self {
        Self {
            inner: Box::new(inner),
            key: keys.macaroon().clone(),
            location: location.to_string(),
            clock,
        }
    }

    pub fn inner(&self) -> &TokenStore {
        &self.inner
    }

    pub(super) fn create<'a>(
        &'a self,
        ctx: &'a TokenContext,
        token: &'a Token,
    ) -> BoxFuture<'a, Result<String, TokenError>> {
        Box::pin(async move {
            let id = self.inner.create(ctx, token).await?;
            let macaroon = Macaroon::new(&self.location, self.key.as_bytes(), &id)
                .map_err(|e| TokenError::Encoding(e.to_string()))?;
            Ok(macaroon.serialize())
        })
    }

    pub(super) fn inspect<'a>(
        &'a self,
        ctx: &'a TokenContext,
        id: &'a str,
    ) -> BoxFuture<'a, Validation> {
        Box::pin(async move {
            match self.verify(ctx, id) {
                Some(identifier) => self.inner.inspect(ctx, &identifier).await,
                None => Validation::Invalid,
            }
        })
    }

    fn decode(&self, id: &str) -> Option<Macaroon> {
        let macaroon = match Macaroon::deserialize(id) {
            Ok(m) => m,
            Err(e) => {
                debug!(error = %e, "macaroon rejected");
                return None;
            }
        };
        if macaroon.location() != self.location {
            debug!(reason = "wrong_location", "macaroon rejected");
            return None;
        }
        Some(macaroon)
    }

    /// Signature chain and every caveat. Returns the inner identifier.
    fn verify(&self, ctx: &TokenContext, id: &str) -> Option<String> {
        let macaroon = self.decode(id)?;
        let now = self.clock.now();

        let mut verifier = Verifier::new();
        verifier.satisfy_general(|caveat| {
            caveat
                .parse::<Caveat>()
                .is_ok_and(|caveat| caveat.holds(ctx, now))
        });
        if let Err(e) = verifier.verify(&macaroon, self.key.as_bytes()) {
            debug!(error = %e, "macaroon rejected");
            return None;
        }
        Some(macaroon.identifier().to_string())
    }

    /// Revoke the inner identifier. Caveats are not checked, so a holder can
    /// log out with a copy that is no longer usable. A macaroon whose
    /// signature does not verify is ignored.
    pub(super) fn revoke<'a>(
        &'a self,
        ctx: &'a TokenContext,
        id: &'a str,
    ) -> BoxFuture<'a, Result<(), TokenError>> {
        Box::pin(async move {
            let Some(macaroon) = self.decode(id) else {
                return Ok(());
            };
            if !macaroon.verify_signature(self.key.as_bytes()) {
                debug!(reason = "bad_signature", "macaroon revoke ignored");
                return Ok(());
            }
            self.inner.revoke(ctx, macaroon.identifier()).await
        })
    }

    /// Append `caveat` to a macaroon. Needs no key; anyone holding the
    /// macaroon can do the same.
    pub fn attenuate(&self, token: &str, caveat: &Caveat) -> Result<String, TokenError> {
        let mut macaroon = Macaroon::deserialize(token)
            .map_err(|e| TokenError::Encoding(e.to_string()))?;
        macaroon
            .add_caveat(&caveat.to_string())
            .map_err(|e| TokenError::InvalidCaveat(e.to_string()))?;
        Ok(macaroon.serialize())
    }
}

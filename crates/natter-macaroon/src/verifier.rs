//! Caveat verification.
//!
//! A [`Verifier`] holds the predicates the current request context can vouch
//! for. Every caveat in the macaroon must be matched by at least one of them,
//! and the chain must recompute under the root key. Caveats that nobody
//! recognizes fail verification.

use crate::error::{MacaroonError, Result};
use crate::macaroon::Macaroon;

type GeneralSatisfier<'a> = Box<dyn Fn(&str) -> bool + Send + Sync + 'a>;

/// Collects satisfiers and checks macaroons against them.
#[derive(Default)]
pub struct Verifier<'a> {
    exact: Vec<String>,
    general: Vec<GeneralSatisfier<'a>>,
}

impl<'a> Verifier<'a> {
    /// Create a verifier with no satisfiers. It accepts only macaroons
    /// without caveats.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept a caveat that equals `caveat` exactly.
    pub fn satisfy_exact(&mut self, caveat: impl Into<String>) -> &mut Self {
        self.exact.push(caveat.into());
        self
    }

    /// Accept any caveat for which `predicate` returns `true`.
    pub fn satisfy_general<F>(&mut self, predicate: F) -> &mut Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'a,
    {
        self.general.push(Box::new(predicate));
        self
    }

    fn is_satisfied(&self, caveat: &str) -> bool {
        self.exact.iter().any(|c| c == caveat) || self.general.iter().any(|f| f(caveat))
    }

    /// Verify the signature chain, then every caveat.
    pub fn verify(&self, macaroon: &Macaroon, root_key: &[u8]) -> Result<()> {
        if !macaroon.verify_signature(root_key) {
            return Err(MacaroonError::InvalidSignature);
        }
        for (index, caveat) in macaroon.caveats().iter().enumerate() {
            if !self.is_satisfied(caveat) {
                return Err(MacaroonError::UnsatisfiedCaveat {
                    index,
                    caveat: caveat.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &[u8] = b"an-example-root-key-of-32-bytes!";

    #[test]
    fn unknown_caveat_is_rejected() {
        let m = Macaroon::new("", KEY, "id")
            .and_then(|m| m.with_caveat("account = 42"))
            .unwrap();
        let err = Verifier::new().verify(&m, KEY).unwrap_err();
        assert!(matches!(err, MacaroonError::UnsatisfiedCaveat { index: 0, .. }));
    }

    #[test]
    fn exact_and_general_satisfiers_combine() {
        let m = Macaroon::new("", KEY, "id")
            .and_then(|m| m.with_caveat("method = GET"))
            .and_then(|m| m.with_caveat("count < 10"))
            .unwrap();

        let mut v = Verifier::new();
        v.satisfy_exact("method = GET")
            .satisfy_general(|c| c.strip_prefix("count < ").is_some_and(|n| n == "10"));
        assert!(v.verify(&m, KEY).is_ok());
    }

    #[test]
    fn wrong_key_fails_before_caveats_are_checked() {
        let m = Macaroon::new("", KEY, "id").unwrap();
        assert_eq!(
            Verifier::new().verify(&m, b"some-other-key"),
            Err(MacaroonError::InvalidSignature)
        );
    }
}

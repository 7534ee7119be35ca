//! # natter-macaroon
//!
//! First-party macaroons: bearer credentials whose signature is an HMAC-SHA256
//! chain over an identifier and an ordered list of caveats.
//!
//! ```text
//! sig_0 = HMAC(root_key, identifier)
//! sig_i = HMAC(sig_{i-1}, caveat_i)
//! ```
//!
//! Anyone holding a macaroon can append a caveat (the new signature only needs
//! the old one), but nobody can remove a caveat without the root key. Caveats
//! therefore only ever narrow what a macaroon authorizes.
//!
//! ## Quick Start
//!
//! ```rust
//! use natter_macaroon::{Macaroon, Verifier};
//!
//! let root_key = [7u8; 32];
//! let macaroon = Macaroon::new("https://api.example", &root_key, "token-123")?
//!     .with_caveat("method = GET")?;
//!
//! let encoded = macaroon.serialize();
//! let decoded = Macaroon::deserialize(&encoded)?;
//!
//! let mut verifier = Verifier::new();
//! verifier.satisfy_exact("method = GET");
//! assert!(verifier.verify(&decoded, &root_key).is_ok());
//! # Ok::<(), natter_macaroon::MacaroonError>(())
//! ```
//!
//! This crate has no notion of HTTP requests or clocks; callers register
//! satisfiers for the caveat language they issue.

#![deny(clippy::all)]
#![warn(missing_docs)]

mod error;
mod macaroon;
mod verifier;

pub use error::{MacaroonError, Result};
pub use macaroon::{Macaroon, Signature, MAX_CAVEATS, MAX_FIELD_LEN, SIGNATURE_LEN, WIRE_VERSION};
pub use verifier::Verifier;

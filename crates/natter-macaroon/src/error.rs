//! Error types for macaroon decoding and verification.

use thiserror::Error;

/// Convenience type alias for Results using [`MacaroonError`].
pub type Result<T, E = MacaroonError> = std::result::Result<T, E>;

/// Errors raised while decoding or verifying a macaroon.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum MacaroonError {
    /// The text form is not valid unpadded base64url.
    #[error("macaroon is not valid base64url")]
    Encoding,

    /// The binary form is truncated or has trailing bytes.
    #[error("malformed macaroon: {0}")]
    Malformed(&'static str),

    /// The wire version byte is not one this crate understands.
    #[error("unsupported macaroon version {0}")]
    UnsupportedVersion(u8),

    /// More caveats than [`MAX_CAVEATS`](crate::MAX_CAVEATS).
    #[error("too many caveats")]
    TooManyCaveats,

    /// A location, identifier or caveat is longer than
    /// [`MAX_FIELD_LEN`](crate::MAX_FIELD_LEN).
    #[error("macaroon {0} too long")]
    FieldTooLong(&'static str),

    /// The recomputed HMAC chain does not match the presented signature.
    #[error("macaroon signature mismatch")]
    InvalidSignature,

    /// A caveat was not matched by any registered satisfier.
    #[error("caveat {index} not satisfied: {caveat}")]
    UnsatisfiedCaveat {
        /// Position of the caveat in the chain.
        index: usize,
        /// The caveat text.
        caveat: String,
    },
}

//! Error types for credential verification.

use thiserror::Error;

/// Why a bearer token was not accepted.
///
/// These reasons are for logs and metrics only. Callers must not echo the
/// specific variant back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationError {
    /// The token is not a well-formed signed JWT, or lacks required claims.
    #[error("token is malformed")]
    Malformed,

    /// The signature does not validate against the trusted key.
    #[error("token signature is invalid")]
    BadSignature,

    /// The token's expiry is at or before the current time.
    #[error("token has expired")]
    Expired,

    /// Issuer or audience is missing or does not match configuration.
    #[error("token issuer or audience does not match")]
    WrongIssuerOrAudience,

    /// The token's `nbf` is still in the future.
    #[error("token is not yet valid")]
    NotYetValid,
}

impl VerificationError {
    /// Stable short code for metrics labels.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed => "malformed",
            Self::BadSignature => "bad_signature",
            Self::Expired => "expired",
            Self::WrongIssuerOrAudience => "wrong_issuer_or_audience",
            Self::NotYetValid => "not_yet_valid",
        }
    }
}

//! Bearer token verification.
//!
//! [`CredentialVerifier`] checks a compact JWT against a symmetric key,
//! the expected issuer and audience, and the current time, then extracts
//! [`IdentityClaims`] from the payload.
//!
//! Lifetime rules:
//!
//! - `now >= exp` is expired; there is no clock-skew allowance
//! - `now < nbf` is not yet valid
//!
//! Both checks read the injected [`Clock`] rather than the system time, so
//! the expiry boundary can be tested exactly.

use std::fmt;
use std::sync::Arc;

use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde_json::{Map, Value};

use crate::clock::{Clock, SystemClock};
use crate::error::VerificationError;
use crate::identity::IdentityClaims;

pub use jsonwebtoken::Algorithm;

const SUBJECT_CLAIMS: &[&str] = &[
    "sub",
    "nameid",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/nameidentifier",
];

const EMAIL_CLAIMS: &[&str] = &[
    "email",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress",
];

const NAME_CLAIMS: &[&str] = &[
    "name",
    "unique_name",
    "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name",
];

/// Validates bearer tokens.
///
/// Holds only immutable key material and validation rules, so a single
/// instance is shared by every request task.
///
/// # Example
///
/// ```ignore
/// use vibes_core::CredentialVerifier;
///
/// let verifier = CredentialVerifier::hmac(b"a-32-byte-or-longer-shared-secret", "issuer", "audience");
/// match verifier.verify(token) {
///     Ok(identity) => println!("hello {}", identity.subject),
///     Err(reason) => println!("rejected: {reason}"),
/// }
/// ```
#[derive(Clone)]
pub struct CredentialVerifier {
    key: DecodingKey,
    validation: Validation,
    clock: Arc<dyn Clock>,
}

impl CredentialVerifier {
    /// Creates an HS256 verifier for the given shared secret.
    pub fn hmac(secret: &[u8], issuer: &str, audience: &str) -> Self {
        Self::with_algorithm(secret, Algorithm::HS256, issuer, audience)
    }

    /// Creates a verifier for an HMAC family algorithm.
    pub fn with_algorithm(secret: &[u8], algorithm: Algorithm, issuer: &str, audience: &str) -> Self {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[issuer]);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        // Lifetime is checked against the injected clock in `verify`.
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.leeway = 0;

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Verifies a compact token and extracts its identity claims.
    pub fn verify(&self, token: &str) -> Result<IdentityClaims, VerificationError> {
        let data = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| classify(e.kind()))?;
        let mut payload = data.claims;

        let now = self.clock.unix_seconds();
        let exp = payload
            .get("exp")
            .and_then(as_seconds)
            .ok_or(VerificationError::Malformed)?;
        if now >= exp {
            return Err(VerificationError::Expired);
        }
        if let Some(nbf) = payload.get("nbf").and_then(as_seconds) {
            if now < nbf {
                return Err(VerificationError::NotYetValid);
            }
        }

        let subject = take_text(&mut payload, SUBJECT_CLAIMS).ok_or(VerificationError::Malformed)?;
        let email = take_text(&mut payload, EMAIL_CLAIMS);
        let name = take_text(&mut payload, NAME_CLAIMS);

        Ok(IdentityClaims {
            subject,
            email,
            name,
            extra: payload,
        })
    }
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("algorithms", &self.validation.algorithms)
            .field("issuer", &self.validation.iss)
            .field("audience", &self.validation.aud)
            .field("key", &"<redacted>")
            .finish()
    }
}

fn classify(kind: &ErrorKind) -> VerificationError {
    match kind {
        ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => VerificationError::BadSignature,
        ErrorKind::InvalidIssuer | ErrorKind::InvalidAudience => {
            VerificationError::WrongIssuerOrAudience
        }
        ErrorKind::MissingRequiredClaim(claim) if claim == "iss" || claim == "aud" => {
            VerificationError::WrongIssuerOrAudience
        }
        ErrorKind::ExpiredSignature => VerificationError::Expired,
        ErrorKind::ImmatureSignature => VerificationError::NotYetValid,
        _ => VerificationError::Malformed,
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn as_seconds(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Removes the first present claim from `names` and renders it as text.
///
/// Every alias is removed so it does not reappear in `extra`.
fn take_text(payload: &mut Map<String, Value>, names: &[&str]) -> Option<String> {
    let mut found = None;
    for name in names {
        if let Some(value) = payload.remove(*name) {
            if found.is_none() {
                found = match value {
                    Value::String(s) if !s.is_empty() => Some(s),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                };
            }
        }
    }
    found
}

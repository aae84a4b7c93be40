//! # Vibes Core
//!
//! Core types and request-time decision logic for the UITVibes API gateway.
//!
//! This crate holds the pieces of the gateway that decide things without
//! doing any I/O:
//!
//! - [`CredentialVerifier`] - Validates bearer tokens into [`IdentityClaims`]
//! - [`PathClassifier`] - Decides whether a method + path needs an identity
//! - [`CorrelationId`] - Per-request identifier propagated downstream
//! - [`Clock`] - Time source shared by the verifier and the rate limiter
//!
//! Everything here is `Send + Sync` and safe to share across request tasks.

#![doc(html_root_url = "https://docs.rs/vibes-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod classifier;
pub mod clock;
mod context;
mod error;
mod identity;
pub mod verifier;

pub use classifier::{PathClassifier, PathPattern};
pub use clock::{Clock, ManualClock, SystemClock};
pub use context::CorrelationId;
pub use error::VerificationError;
pub use identity::{Claim, IdentityClaims};
pub use verifier::{Algorithm, CredentialVerifier};

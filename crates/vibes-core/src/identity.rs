//! Identity claims extracted from a verified bearer token.
//!
//! [`IdentityClaims`] only exists for the lifetime of one request. The
//! gateway never persists it; it is used to fill the `X-User-Id` and
//! `X-User-Email` headers and to answer `/gateway/me`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The authenticated caller of a request.
///
/// # Example
///
/// ```
/// use vibes_core::IdentityClaims;
///
/// let identity = IdentityClaims::new("user-123")
///     .with_email("alice@example.com")
///     .with_name("alice");
///
/// assert_eq!(identity.log_id(), "user:user-123");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityClaims {
    /// Opaque unique identifier of the user (`sub` / `nameid`).
    pub subject: String,

    /// Email address, when the token carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    /// Display name (`name` / `unique_name`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Every other claim in the payload, untouched.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub extra: Map<String, Value>,
}

/// A single `{type, value}` pair, as reported by `/gateway/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claim {
    /// Claim name.
    #[serde(rename = "type")]
    pub kind: String,
    /// Claim value rendered as text.
    pub value: String,
}

impl IdentityClaims {
    /// Creates claims for the given subject.
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            email: None,
            name: None,
            extra: Map::new(),
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    /// Sets the display name claim.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Adds an arbitrary claim.
    #[must_use]
    pub fn with_claim(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    /// Returns an identifier suitable for logs. Never contains token material.
    pub fn log_id(&self) -> String {
        format!("user:{}", self.subject)
    }

    /// Flattens the claims into `{type, value}` pairs.
    ///
    /// Array claims (e.g. multiple audiences or roles) produce one pair per
    /// element. Objects and numbers are rendered as JSON text.
    pub fn claims(&self) -> Vec<Claim> {
        let mut out = vec![Claim {
            kind: "sub".to_string(),
            value: self.subject.clone(),
        }];

        if let Some(email) = &self.email {
            out.push(Claim {
                kind: "email".to_string(),
                value: email.clone(),
            });
        }
        if let Some(name) = &self.name {
            out.push(Claim {
                kind: "name".to_string(),
                value: name.clone(),
            });
        }

        for (key, value) in &self.extra {
            match value {
                Value::Array(items) => {
                    out.extend(items.iter().map(|item| Claim {
                        kind: key.clone(),
                        value: render(item),
                    }));
                }
                other => out.push(Claim {
                    kind: key.clone(),
                    value: render(other),
                }),
            }
        }

        out
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

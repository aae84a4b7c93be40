//! Per-request correlation identifier.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A fresh identifier attached to every proxied request.
///
/// The gateway never trusts an inbound value: each request gets a new
/// random UUID which is forwarded as `X-Correlation-ID` and recorded on
/// the request span.
///
/// # Example
///
/// ```
/// use vibes_core::CorrelationId;
///
/// let a = CorrelationId::new();
/// let b = CorrelationId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationId(Uuid);

impl CorrelationId {
    /// Creates a new random correlation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wraps an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CorrelationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for CorrelationId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| CorrelationId::new()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_display_is_hyphenated_uuid() {
        let id = CorrelationId::new();
        let text = id.to_string();
        assert_eq!(text.len(), 36);
        assert_eq!(Uuid::parse_str(&text).unwrap(), *id.as_uuid());
    }

    #[test]
    fn test_serde_transparent() {
        let uuid = Uuid::new_v4();
        let id = CorrelationId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{uuid}\""));
    }
}

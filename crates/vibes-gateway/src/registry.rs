//! Logical service name to base URL resolution.

use std::collections::HashMap;
use std::fmt;

use parking_lot::RwLock;

use crate::config::ServiceSettings;
use crate::error::{GatewayError, GatewayResult};

/// Base URLs used when a known service has no explicit entry and the
/// registry is not strict.
pub const DEVELOPMENT_DEFAULTS: &[(&str, &str)] = &[
    ("authservice", "https://localhost:7233"),
    ("userservice", "https://localhost:7234"),
    ("postservice", "https://localhost:7146"),
];

/// Resolves a logical upstream name to a base URL.
///
/// Implementations must be idempotent: resolving the same name twice
/// without an intervening refresh returns the same URL.
pub trait ServiceLocator: Send + Sync + fmt::Debug {
    /// Returns the base URL for `name`, without a trailing slash.
    fn resolve(&self, name: &str) -> GatewayResult<String>;
}

/// The configured service registry.
///
/// Explicit entries win over the development defaults. Entries are only
/// ever replaced whole.
///
/// # Example
///
/// ```
/// use vibes_gateway::registry::{ServiceLocator, ServiceRegistry};
///
/// let registry = ServiceRegistry::new(false);
/// assert_eq!(registry.resolve("postservice").unwrap(), "https://localhost:7146");
///
/// registry.upsert("postservice", "http://posts:8080/");
/// assert_eq!(registry.resolve("postservice").unwrap(), "http://posts:8080");
/// ```
#[derive(Debug, Default)]
pub struct ServiceRegistry {
    entries: RwLock<HashMap<String, String>>,
    strict: bool,
}

impl ServiceRegistry {
    /// Create an empty registry.
    pub fn new(strict: bool) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            strict,
        }
    }

    /// Build a registry from configuration.
    pub fn from_settings(settings: &ServiceSettings) -> Self {
        let entries = settings
            .entries
            .iter()
            .filter_map(|(name, entry)| Some((name.to_ascii_lowercase(), normalize(entry.url()?))))
            .collect();

        Self {
            entries: RwLock::new(entries),
            strict: settings.strict,
        }
    }

    /// Whether the development defaults are disabled.
    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Replace the entry for `name`.
    pub fn upsert(&self, name: &str, url: &str) {
        self.entries
            .write()
            .insert(name.to_ascii_lowercase(), normalize(url));
    }

    /// Number of explicit entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns `true` if there are no explicit entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl ServiceLocator for ServiceRegistry {
    fn resolve(&self, name: &str) -> GatewayResult<String> {
        let name = name.to_ascii_lowercase();
        if let Some(url) = self.entries.read().get(&name) {
            return Ok(url.clone());
        }

        if !self.strict {
            if let Some((_, url)) = DEVELOPMENT_DEFAULTS.iter().find(|(known, _)| *known == name) {
                return Ok((*url).to_string());
            }
        }

        Err(GatewayError::unknown_service(name))
    }
}

fn normalize(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServiceEntry;

    #[test]
    fn test_development_defaults() {
        let registry = ServiceRegistry::new(false);
        assert_eq!(registry.resolve("authservice").unwrap(), "https://localhost:7233");
        assert_eq!(registry.resolve("userservice").unwrap(), "https://localhost:7234");
        assert_eq!(registry.resolve("PostService").unwrap(), "https://localhost:7146");
    }

    #[test]
    fn test_strict_registry_has_no_defaults() {
        let registry = ServiceRegistry::new(true);
        let err = registry.resolve("authservice").unwrap_err();
        assert!(matches!(err, GatewayError::UnknownService { .. }));
    }

    #[test]
    fn test_unknown_service() {
        let registry = ServiceRegistry::new(false);
        assert!(registry.resolve("mediaservice").is_err());
    }

    #[test]
    fn test_settings_precedence() {
        let mut settings = ServiceSettings::default();
        settings.entries.insert(
            "authservice".to_string(),
            ServiceEntry {
                https: Some("https://auth.internal/".to_string()),
                http: Some("http://auth.internal".to_string()),
            },
        );
        settings.entries.insert(
            "userservice".to_string(),
            ServiceEntry {
                https: None,
                http: Some("http://users:8080".to_string()),
            },
        );

        let registry = ServiceRegistry::from_settings(&settings);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.resolve("authservice").unwrap(), "https://auth.internal");
        assert_eq!(registry.resolve("userservice").unwrap(), "http://users:8080");
        assert_eq!(registry.resolve("postservice").unwrap(), "https://localhost:7146");
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let registry = ServiceRegistry::new(false);
        let first = registry.resolve("postservice").unwrap();
        let second = registry.resolve("postservice").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_upsert_replaces_entry() {
        let registry = ServiceRegistry::new(true);
        assert!(registry.is_empty());

        registry.upsert("postservice", "http://a");
        registry.upsert("postservice", "http://b");
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.resolve("postservice").unwrap(), "http://b");
    }

    #[test]
    fn test_concurrent_resolve_and_upsert() {
        let registry = ServiceRegistry::new(true);
        registry.upsert("postservice", "http://a");

        std::thread::scope(|s| {
            for i in 0..4 {
                let registry = &registry;
                s.spawn(move || {
                    for _ in 0..100 {
                        if i == 0 {
                            registry.upsert("postservice", "http://b");
                        }
                        let url = registry.resolve("postservice").unwrap();
                        assert!(url == "http://a" || url == "http://b");
                    }
                });
            }
        });
    }
}

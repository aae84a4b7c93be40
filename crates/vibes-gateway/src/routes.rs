//! Gateway prefix to upstream path mapping.

use crate::config::RouteEntry;

/// A route resolved for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a> {
    /// The matched gateway prefix, lowercase. Used as the metrics label.
    pub prefix: &'a str,
    /// Logical service name.
    pub service: &'a str,
    /// Path and query to request on the upstream.
    pub upstream_path: String,
}

#[derive(Debug, Clone)]
struct Route {
    prefix: String,
    service: String,
    upstream_prefix: String,
}

/// Immutable route table, built once at startup.
///
/// The longest prefix that matches on a segment boundary wins. Matching is
/// case-insensitive; the remainder of the path keeps its original case.
///
/// # Example
///
/// ```
/// use vibes_gateway::config::RouteEntry;
/// use vibes_gateway::routes::RouteTable;
///
/// let table = RouteTable::new(&RouteEntry::defaults());
/// let route = table.resolve("/Post/42?page=2").unwrap();
///
/// assert_eq!(route.service, "postservice");
/// assert_eq!(route.upstream_path, "/api/post/42?page=2");
/// ```
#[derive(Debug, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
}

impl RouteTable {
    /// Build a table from configuration.
    pub fn new(entries: &[RouteEntry]) -> Self {
        let mut routes: Vec<Route> = entries
            .iter()
            .map(|entry| Route {
                prefix: entry.prefix.trim_end_matches('/').to_ascii_lowercase(),
                service: entry.service.to_ascii_lowercase(),
                upstream_prefix: entry.upstream_prefix.trim_end_matches('/').to_string(),
            })
            .collect();
        routes.sort_by(|a, b| b.prefix.len().cmp(&a.prefix.len()));
        Self { routes }
    }

    /// Resolve a path (with optional query) to its upstream.
    pub fn resolve(&self, path_and_query: &str) -> Option<RouteMatch<'_>> {
        let (path, query) = match path_and_query.split_once('?') {
            Some((path, query)) => (path, Some(query)),
            None => (path_and_query, None),
        };

        let route = self.routes.iter().find(|route| on_boundary(path, &route.prefix))?;

        let rest = &path[route.prefix.len()..];
        let mut upstream_path = format!("{}{}", route.upstream_prefix, rest);
        if upstream_path.is_empty() {
            upstream_path.push('/');
        }
        if let Some(query) = query {
            upstream_path.push('?');
            upstream_path.push_str(query);
        }

        Some(RouteMatch {
            prefix: &route.prefix,
            service: &route.service,
            upstream_path,
        })
    }

    /// Distinct service names, in table order.
    pub fn services(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for route in &self.routes {
            if !names.contains(&route.service.as_str()) {
                names.push(&route.service);
            }
        }
        names
    }

    /// Number of routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns `true` if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn on_boundary(path: &str, prefix: &str) -> bool {
    let Some(head) = path.get(..prefix.len()) else {
        return false;
    };
    head.eq_ignore_ascii_case(prefix)
        && (path.len() == prefix.len() || path.as_bytes()[prefix.len()] == b'/')
}

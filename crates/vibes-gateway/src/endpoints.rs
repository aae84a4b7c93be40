//! Endpoints the gateway answers itself. These are never proxied.

use chrono::Utc;
use http::{header, HeaderValue, Method, StatusCode};
use serde::Serialize;
use serde_json::json;
use vibes_core::IdentityClaims;
use vibes_middleware::stages::access::unauthorized_response;
use vibes_middleware::{Response, ResponseExt};
use vibes_telemetry::render_metrics;

use crate::health::HealthChecker;
use crate::registry::ServiceLocator;
use crate::routes::RouteTable;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// A self-served endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelfEndpoint {
    /// `GET /` gateway information.
    Root,
    /// `GET /health` liveness.
    Health,
    /// `GET /alive` liveness.
    Alive,
    /// `GET /gateway/test` downstream probe.
    Test,
    /// `GET /gateway/routes` route documentation.
    Routes,
    /// `GET /gateway/me` caller identity.
    Me,
    /// `GET /gateway/metrics` Prometheus exposition.
    Metrics,
}

impl SelfEndpoint {
    /// Match a request against the self endpoints. Only `GET` is served.
    pub fn match_request(method: &Method, path: &str) -> Option<Self> {
        if *method != Method::GET {
            return None;
        }
        let path = path.to_ascii_lowercase();
        let endpoint = match path.trim_end_matches('/') {
            "" => Self::Root,
            "/health" => Self::Health,
            "/alive" => Self::Alive,
            "/gateway/test" => Self::Test,
            "/gateway/routes" => Self::Routes,
            "/gateway/me" => Self::Me,
            "/gateway/metrics" => Self::Metrics,
            _ => return None,
        };
        Some(endpoint)
    }

    /// Label used for request metrics.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Root => "/",
            Self::Health => "/health",
            Self::Alive => "/alive",
            Self::Test => "/gateway/test",
            Self::Routes => "/gateway/routes",
            Self::Me => "/gateway/me",
            Self::Metrics => "/gateway/metrics",
        }
    }
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    let value = serde_json::to_value(body).unwrap_or_else(|_| json!({}));
    Response::json(status, &value)
}

/// Gateway information for `GET /`.
pub fn root(locator: &dyn ServiceLocator) -> Response {
    let url = |name: &str| locator.resolve(name).ok();
    json_response(
        StatusCode::OK,
        &json!({
            "service": "UITVibes API Gateway",
            "version": "v1.0",
            "status": "running",
            "authentication": "JWT Bearer",
            "authServiceUrl": url("authservice"),
            "userServiceUrl": url("userservice"),
            "postServiceUrl": url("postservice"),
            "timestamp": Utc::now(),
        }),
    )
}

/// Liveness for `GET /health` and `GET /alive`.
pub fn liveness(health: &HealthChecker) -> Response {
    json_response(StatusCode::OK, &health.liveness())
}

/// Downstream probe for `GET /gateway/test`.
pub async fn downstream(health: &HealthChecker) -> Response {
    json_response(StatusCode::OK, &health.downstream().await)
}

/// The caller's identity for `GET /gateway/me`.
pub fn me(identity: Option<&IdentityClaims>, path: &str) -> Response {
    let Some(identity) = identity else {
        return unauthorized_response(path);
    };

    json_response(
        StatusCode::OK,
        &json!({
            "message": "You are authenticated!",
            "userId": identity.subject,
            "email": identity.email,
            "username": identity.name,
            "claims": identity.claims(),
            "timestamp": Utc::now(),
        }),
    )
}

/// Prometheus text for `GET /gateway/metrics`.
pub fn metrics(enabled: bool) -> Response {
    match render_metrics().filter(|_| enabled) {
        Some(text) => {
            let mut response = Response::text(StatusCode::OK, &text);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static(PROMETHEUS_CONTENT_TYPE),
            );
            response
        }
        None => json_response(
            StatusCode::NOT_FOUND,
            &json!({"error": "Not Found", "message": "Metrics are disabled"}),
        ),
    }
}

/// Access requirement shown for a documented route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessLabel {
    /// No token needed.
    Public,
    /// Token needed for every method.
    Required,
    /// Token needed for `POST`.
    RequiredForPost,
    /// Token needed for `POST` and `DELETE`.
    RequiredForWrites,
    /// `GET` is public, `PUT` and `DELETE` need a token.
    PublicReadRequiredWrite,
}

impl AccessLabel {
    /// Text shown in the route documentation.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Public => "Public",
            Self::Required => "Required",
            Self::RequiredForPost => "Required (POST)",
            Self::RequiredForWrites => "Required (POST/DELETE)",
            Self::PublicReadRequiredWrite => "Public (GET), Required (PUT/DELETE)",
        }
    }
}

/// A documented group of routes served by one upstream.
#[derive(Debug, Clone, Copy)]
pub struct RouteGroup {
    /// Display name.
    pub title: &'static str,
    /// Logical service name.
    pub service: &'static str,
    /// Gateway path templates and their access requirement.
    pub routes: &'static [(&'static str, AccessLabel)],
}

/// The routes listed by `/gateway/routes`.
pub const ROUTE_DOCS: &[RouteGroup] = &[
    RouteGroup {
        title: "AuthService",
        service: "authservice",
        routes: &[
            ("/auth/register", AccessLabel::Public),
            ("/auth/login", AccessLabel::Public),
            ("/auth/refresh-token", AccessLabel::Public),
            ("/auth/validate", AccessLabel::Public),
            ("/auth/revoke", AccessLabel::Public),
        ],
    },
    RouteGroup {
        title: "UserService - UserProfile",
        service: "userservice",
        routes: &[
            ("/user/userprofile/me", AccessLabel::Required),
            ("/user/userprofile/{userId}", AccessLabel::Public),
            ("/user/userprofile/me/avatar", AccessLabel::Required),
            ("/user/userprofile/me/bio", AccessLabel::Required),
        ],
    },
    RouteGroup {
        title: "UserService - Follow",
        service: "userservice",
        routes: &[
            ("/user/follow/{userId}", AccessLabel::RequiredForWrites),
            ("/user/follow/{userId}/stats", AccessLabel::Public),
            ("/user/follow/{userId}/followers", AccessLabel::Public),
            ("/user/follow/{userId}/following", AccessLabel::Public),
        ],
    },
    RouteGroup {
        title: "PostService",
        service: "postservice",
        routes: &[
            ("/post", AccessLabel::RequiredForPost),
            ("/post/{id}", AccessLabel::PublicReadRequiredWrite),
            ("/post/user/{userId}", AccessLabel::Public),
            ("/post/{id}/comments", AccessLabel::Public),
            ("/post/comment/{commentId}/replies", AccessLabel::Public),
            ("/post/hashtag/trending", AccessLabel::Public),
            ("/post/hashtag/search", AccessLabel::Public),
            ("/post/hashtag/{name}/posts", AccessLabel::Public),
            ("/post/feed", AccessLabel::Required),
            ("/post/media", AccessLabel::Required),
        ],
    },
];

/// Route documentation for `GET /gateway/routes`.
///
/// Upstream paths come from the live route table, base URLs from the
/// locator. Groups whose prefix is not routed are omitted.
pub fn routes(table: &RouteTable, locator: &dyn ServiceLocator, gateway_base_url: &str) -> Response {
    let services: Vec<_> = ROUTE_DOCS
        .iter()
        .filter_map(|group| {
            let routes: Vec<_> = group
                .routes
                .iter()
                .filter_map(|(path, label)| {
                    let upstream = table.resolve(path)?;
                    Some(json!({
                        "gateway": path,
                        "proxiedTo": upstream.upstream_path,
                        "auth": label.as_str(),
                    }))
                })
                .collect();
            if routes.is_empty() {
                return None;
            }
            Some(json!({
                "service": group.title,
                "baseUrl": locator.resolve(group.service).ok(),
                "routes": routes,
            }))
        })
        .collect();

    json_response(
        StatusCode::OK,
        &json!({
            "gatewayBaseUrl": gateway_base_url,
            "services": services,
            "note": "JWT token required for endpoints marked as 'Required'",
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RouteEntry;
    use crate::registry::ServiceRegistry;
    use http_body_util::BodyExt;
    use vibes_core::PathClassifier;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[test]
    fn test_match_request() {
        assert_eq!(SelfEndpoint::match_request(&Method::GET, "/"), Some(SelfEndpoint::Root));
        assert_eq!(SelfEndpoint::match_request(&Method::GET, "/HEALTH"), Some(SelfEndpoint::Health));
        assert_eq!(SelfEndpoint::match_request(&Method::GET, "/alive"), Some(SelfEndpoint::Alive));
        assert_eq!(
            SelfEndpoint::match_request(&Method::GET, "/gateway/routes/"),
            Some(SelfEndpoint::Routes)
        );
        assert_eq!(SelfEndpoint::match_request(&Method::POST, "/gateway/me"), None);
        assert_eq!(SelfEndpoint::match_request(&Method::GET, "/post/feed"), None);
        assert_eq!(SelfEndpoint::match_request(&Method::GET, "/gateway/other"), None);
    }

    #[tokio::test]
    async fn test_root() {
        let json = body_json(root(&ServiceRegistry::new(false))).await;
        assert_eq!(json["service"], "UITVibes API Gateway");
        assert_eq!(json["status"], "running");
        assert_eq!(json["authentication"], "JWT Bearer");
        assert_eq!(json["postServiceUrl"], "https://localhost:7146");
        assert!(json["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_me_requires_identity() {
        let response = me(None, "/Gateway/Me");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let json = body_json(response).await;
        assert_eq!(json["path"], "/gateway/me");
    }

    #[tokio::test]
    async fn test_me_reports_claims() {
        let identity = IdentityClaims::new("u1")
            .with_email("u1@uitvibes.dev")
            .with_name("alice")
            .with_claim("role", "admin");
        let json = body_json(me(Some(&identity), "/gateway/me")).await;

        assert_eq!(json["message"], "You are authenticated!");
        assert_eq!(json["userId"], "u1");
        assert_eq!(json["email"], "u1@uitvibes.dev");
        assert_eq!(json["username"], "alice");
        let claims = json["claims"].as_array().unwrap();
        assert!(claims
            .iter()
            .any(|c| c["type"] == "role" && c["value"] == "admin"));
    }

    #[tokio::test]
    async fn test_metrics_disabled_is_not_found() {
        assert_eq!(metrics(false).status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_routes_document() {
        let table = RouteTable::new(&RouteEntry::defaults());
        let json = body_json(routes(&table, &ServiceRegistry::new(false), "http://0.0.0.0:8080")).await;

        assert_eq!(json["note"], "JWT token required for endpoints marked as 'Required'");
        let services = json["services"].as_array().unwrap();
        assert_eq!(services.len(), 4);
        assert_eq!(services[0]["service"], "AuthService");
        assert_eq!(services[0]["baseUrl"], "https://localhost:7233");
        assert_eq!(services[0]["routes"][1]["proxiedTo"], "/api/auth/login");
        assert_eq!(services[3]["routes"][1]["auth"], "Public (GET), Required (PUT/DELETE)");
    }

    #[tokio::test]
    async fn test_routes_document_skips_unrouted_groups() {
        let table = RouteTable::new(&[RouteEntry::new("/post", "postservice", "/api/post")]);
        let json = body_json(routes(&table, &ServiceRegistry::new(false), "")).await;
        assert_eq!(json["services"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_access_labels_agree_with_classifier() {
        let classifier = PathClassifier::default();
        let concrete = |template: &str| {
            template
                .split('/')
                .map(|s| if s.starts_with('{') { "abc123" } else { s })
                .collect::<Vec<_>>()
                .join("/")
        };

        for group in ROUTE_DOCS {
            for (template, label) in group.routes {
                let path = concrete(*template);
                let needs = |method: Method| classifier.requires_auth(&method, &path);
                match label {
                    AccessLabel::Public => assert!(!needs(Method::GET), "{path}"),
                    AccessLabel::Required => {
                        assert!(needs(Method::GET), "{path}");
                        assert!(needs(Method::PUT), "{path}");
                    }
                    AccessLabel::RequiredForPost => assert!(needs(Method::POST), "{path}"),
                    AccessLabel::RequiredForWrites => {
                        assert!(needs(Method::POST), "{path}");
                        assert!(needs(Method::DELETE), "{path}");
                    }
                    AccessLabel::PublicReadRequiredWrite => {
                        assert!(!needs(Method::GET), "{path}");
                        assert!(needs(Method::PUT), "{path}");
                        assert!(needs(Method::DELETE), "{path}");
                    }
                }
            }
        }
    }
}

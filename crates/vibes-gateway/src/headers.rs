//! Header rewriting between the client, the gateway and the upstream.
//!
//! Downstream services trust `X-User-Id` and `X-User-Email` as the caller's
//! identity. The gateway is the only component allowed to set them, so any
//! inbound copy is removed before the verified values are added.

use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use vibes_core::{CorrelationId, IdentityClaims};

/// Verified subject of the caller.
pub const X_USER_ID: HeaderName = HeaderName::from_static("x-user-id");
/// Verified email of the caller.
pub const X_USER_EMAIL: HeaderName = HeaderName::from_static("x-user-email");
/// Fresh per-request identifier.
pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
/// Name of the gateway that forwarded the request.
pub const X_GATEWAY: HeaderName = HeaderName::from_static("x-gateway");

/// Connection-scoped headers that never cross the proxy.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Check if a header is hop-by-hop (should not be forwarded).
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Headers listed in `Connection` are hop-by-hop for this message only.
fn connection_tokens(headers: &HeaderMap) -> Vec<HeaderName> {
    headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect()
}

fn is_gateway_owned(name: &HeaderName) -> bool {
    *name == X_USER_ID || *name == X_USER_EMAIL || *name == X_CORRELATION_ID || *name == X_GATEWAY
}

/// Builds the header set for the upstream request.
///
/// `Authorization` passes through untouched. `Host` and `Content-Length`
/// are recomputed by the client.
pub fn forward_headers(
    inbound: &HeaderMap,
    identity: Option<&IdentityClaims>,
    correlation_id: CorrelationId,
    gateway_name: &HeaderValue,
) -> HeaderMap {
    let listed = connection_tokens(inbound);
    let mut headers = HeaderMap::with_capacity(inbound.len() + 4);

    for (name, value) in inbound {
        if is_hop_by_hop(name)
            || listed.contains(name)
            || *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || is_gateway_owned(name)
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if let Some(identity) = identity {
        match HeaderValue::from_str(&identity.subject) {
            Ok(value) => {
                headers.insert(X_USER_ID, value);
            }
            Err(_) => tracing::warn!(user = %identity.log_id(), "Subject is not a valid header value"),
        }
        if let Some(email) = &identity.email {
            if let Ok(value) = HeaderValue::from_str(email) {
                headers.insert(X_USER_EMAIL, value);
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        headers.insert(X_CORRELATION_ID, value);
    }
    headers.insert(X_GATEWAY, gateway_name.clone());

    headers
}

/// Builds the header set relayed back to the client.
///
/// Everything the upstream sent is kept except connection-scoped headers.
pub fn relay_headers(upstream: &HeaderMap) -> HeaderMap {
    let listed = connection_tokens(upstream);
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if is_hop_by_hop(name) || listed.contains(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers
}

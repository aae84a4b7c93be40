//! Request and response types used by the pipeline.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use http_body_util::Full;

/// The HTTP request type used in the pipeline.
///
/// Bodies are buffered before the pipeline runs so the forwarder can
/// replay them upstream.
pub type Request = http::Request<Full<Bytes>>;

/// The HTTP response type used in the pipeline.
pub type Response = http::Response<Full<Bytes>>;

/// Shorthand constructors for gateway-originated responses.
pub trait ResponseExt {
    /// Creates a `text/plain` response.
    fn text(status: StatusCode, body: &str) -> Response;

    /// Creates an `application/json` response.
    fn json(status: StatusCode, body: &serde_json::Value) -> Response;
}

impl ResponseExt for Response {
    fn text(status: StatusCode, body: &str) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_owned())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; charset=utf-8"),
        );
        response
    }

    fn json(status: StatusCode, body: &serde_json::Value) -> Response {
        let mut response = http::Response::new(Full::new(Bytes::from(body.to_string())));
        *response.status_mut() = status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json; charset=utf-8"),
        );
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn test_text_response() {
        let response = Response::text(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain; charset=utf-8"
        );
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "slow down");
    }

    #[test]
    fn test_json_response() {
        let response = Response::json(StatusCode::UNAUTHORIZED, &serde_json::json!({"error": "x"}));
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json; charset=utf-8"
        );
    }
}

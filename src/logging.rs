//! Middleware for logging requests and responses.

use axum::{
    body::{Body, Bytes},
    extract::Request,
    http::{
        HeaderMap, HeaderValue, StatusCode,
        header::{AUTHORIZATION, COOKIE, SET_COOKIE},
    },
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Bodies longer than this many characters are truncated in `info` logs.
pub const LOG_BODY_LENGTH_LIMIT: usize = 64;

const REDACTED_HEADERS: [axum::http::HeaderName; 3] = [AUTHORIZATION, COOKIE, SET_COOKIE];

/// Log the request and response for each request.
///
/// Both the request and response are logged at the `info` level.
/// If a body is longer than [LOG_BODY_LENGTH_LIMIT] characters, it is
/// truncated and the full body is logged at the `debug` level.
/// Session cookies and credentials are never logged.
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let (parts, body) = request.into_parts();
    let body_bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!("Could not read request body: {error}");
            return StatusCode::BAD_REQUEST.into_response();
        }
    };

    log_request(&parts, &String::from_utf8_lossy(&body_bytes));

    let request = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(request).await;

    let (parts, body) = response.into_parts();
    let body_bytes = match read_body(body).await {
        Ok(bytes) => bytes,
        Err(error) => {
            tracing::error!("Could not read response body: {error}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    log_response(&parts, &String::from_utf8_lossy(&body_bytes));

    Response::from_parts(parts, Body::from(body_bytes))
}

async fn read_body(body: Body) -> Result<Bytes, axum::Error> {
    axum::body::to_bytes(body, usize::MAX).await
}

fn redact_headers(headers: &HeaderMap) -> HeaderMap {
    let mut headers = headers.clone();

    for name in REDACTED_HEADERS {
        if headers.contains_key(&name) {
            headers.insert(name, HeaderValue::from_static("********"));
        }
    }

    headers
}

/// The first [LOG_BODY_LENGTH_LIMIT] characters of `body`, or `None` if it
/// is short enough to log in full.
fn truncate_body(body: &str) -> Option<&str> {
    body.char_indices()
        .nth(LOG_BODY_LENGTH_LIMIT)
        .map(|(end, _)| &body[..end])
}

fn log_request(parts: &axum::http::request::Parts, body: &str) {
    let headers = redact_headers(&parts.headers);

    match truncate_body(body) {
        Some(truncated) => {
            tracing::info!(
                "Received request: {} {}\nheaders: {headers:#?}\nbody: {truncated}...",
                parts.method,
                parts.uri
            );
            tracing::debug!("Full request body: {body:?}");
        }
        None => tracing::info!(
            "Received request: {} {}\nheaders: {headers:#?}\nbody: {body:?}",
            parts.method,
            parts.uri
        ),
    }
}

fn log_response(parts: &axum::http::response::Parts, body: &str) {
    let headers = redact_headers(&parts.headers);

    match truncate_body(body) {
        Some(truncated) => {
            tracing::info!(
                "Sending response: {}\nheaders: {headers:#?}\nbody: {truncated}...",
                parts.status
            );
            tracing::debug!("Full response body: {body:?}");
        }
        None => tracing::info!(
            "Sending response: {}\nheaders: {headers:#?}\nbody: {body:?}",
            parts.status
        ),
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{
            HeaderMap, HeaderValue,
            header::{CONTENT_TYPE, COOKIE, SET_COOKIE},
        },
        middleware,
        routing::post,
    };
    use axum_test::TestServer;

    use super::{LOG_BODY_LENGTH_LIMIT, logging_middleware, redact_headers, truncate_body};

    #[test]
    fn redacts_session_cookies() {
        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, HeaderValue::from_static("token=secret"));
        headers.append(SET_COOKIE, HeaderValue::from_static("token=secret"));
        headers.append(SET_COOKIE, HeaderValue::from_static("other=secret"));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let redacted = redact_headers(&headers);

        assert_eq!(redacted.get(COOKIE).unwrap(), "********");
        assert_eq!(redacted.get_all(SET_COOKIE).iter().count(), 1);
        assert_eq!(redacted.get(SET_COOKIE).unwrap(), "********");
        assert_eq!(redacted.get(CONTENT_TYPE).unwrap(), "application/json");
    }

    #[test]
    fn truncates_long_bodies_on_char_boundary() {
        let body = "é".repeat(LOG_BODY_LENGTH_LIMIT + 1);

        let truncated = truncate_body(&body).unwrap();

        assert_eq!(truncated.chars().count(), LOG_BODY_LENGTH_LIMIT);
        assert_eq!(truncate_body("short"), None);
    }

    #[tokio::test]
    async fn passes_bodies_through_unchanged() {
        let app = Router::new()
            .route("/echo", post(|body: String| async move { body }))
            .layer(middleware::from_fn(logging_middleware));
        let server = TestServer::new(app).expect("Could not create test server.");
        let body = "x".repeat(LOG_BODY_LENGTH_LIMIT * 2);

        let response = server.post("/echo").text(body.clone()).await;

        response.assert_status_ok();
        response.assert_text(body);
    }
}

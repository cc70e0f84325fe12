//! HTTP security headers middleware
//!
//! The API only serves JSON, so the content policy forbids loading anything.

use axum::{extract::Request, middleware::Next, response::Response};
use http::{header, HeaderValue};

const SECURITY_HEADERS: &[(&str, &str)] = &[
    ("x-frame-options", "DENY"),
    ("x-content-type-options", "nosniff"),
    ("referrer-policy", "no-referrer"),
    (
        "content-security-policy",
        "default-src 'none'; frame-ancestors 'none'",
    ),
];

/// Middleware that injects HTTP security headers into every response.
///
/// Responses without an explicit `Cache-Control` also get `no-store`, since
/// most carry inventory or identity data.
pub async fn security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    for &(name, value) in SECURITY_HEADERS {
        headers.insert(name, HeaderValue::from_static(value));
    }
    headers
        .entry(header::CACHE_CONTROL)
        .or_insert(HeaderValue::from_static("no-store"));

    response
}

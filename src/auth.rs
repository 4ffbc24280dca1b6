use crate::config::BasicCredentials;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine as _;
use std::sync::Arc;
use subtle::ConstantTimeEq;

const CHALLENGE: &str = r#"Basic realm="Secure Area""#;

/// Decode an `Authorization: Basic` value into `(user, pass)`.
/// The password may contain colons; the user may not.
pub fn parse_basic(header_value: &str) -> Option<(String, String)> {
    let (scheme, encoded) = header_value.trim().split_once(' ')?;
    if scheme != "Basic" {
        return None;
    }
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

pub fn is_authorized(expected: Option<&BasicCredentials>, headers: &HeaderMap) -> bool {
    let Some(expected) = expected else {
        return false;
    };
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_basic)
        .is_some_and(|(user, pass)| credentials_match(expected, &user, &pass))
}

/// Both fields are always compared, in constant time.
fn credentials_match(expected: &BasicCredentials, user: &str, pass: &str) -> bool {
    let user_ok = user.as_bytes().ct_eq(expected.user.as_bytes());
    let pass_ok = pass.as_bytes().ct_eq(expected.pass.as_bytes());
    bool::from(user_ok & pass_ok)
}

/// Middleware guarding the viewer routes with HTTP Basic auth.
pub async fn basic_auth(
    State(expected): State<Arc<Option<BasicCredentials>>>,
    request: Request,
    next: Next,
) -> Response {
    if is_authorized((*expected).as_ref(), request.headers()) {
        return next.run(request).await;
    }

    tracing::debug!(path = %request.uri().path(), "basic auth required");
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, HeaderValue::from_static(CHALLENGE))],
        "Auth required",
    )
        .into_response()
}

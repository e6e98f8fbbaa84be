//! Caller identity resolution. The gateway treats authentication as a
//! narrow collaborator: `authenticate(username, password)` either resolves
//! an identity or rejects. The shipped implementation is a static user
//! table from the gateway config.

use crate::config::UserConfig;
use crate::response::ApiResponse;
use axum::Json;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::collections::HashMap;

pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: &str, password: &str) -> Option<String>;
}

pub struct StaticAuthenticator {
    users: HashMap<String, String>,
}

impl StaticAuthenticator {
    pub fn new(users: &[UserConfig]) -> Self {
        Self {
            users: users
                .iter()
                .map(|user| (user.username.clone(), user.password.clone()))
                .collect(),
        }
    }
}

impl Authenticator for StaticAuthenticator {
    fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        match self.users.get(username) {
            Some(expected) if expected == password => Some(username.to_string()),
            _ => None,
        }
    }
}

/// Resolve the caller from a Basic Authorization header.
pub fn identity_from_headers(auth: &dyn Authenticator, headers: &HeaderMap) -> Option<String> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = value.strip_prefix("Basic ")?;
    let decoded = BASE64.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (username, password) = decoded.split_once(':')?;
    auth.authenticate(username, password)
}

pub fn unauthorized() -> Response {
    let body = ApiResponse::<()> {
        success: false,
        data: None,
        error: Some("Incorrect username or password".to_string()),
    };
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Basic")],
        Json(body),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn authenticator() -> StaticAuthenticator {
        StaticAuthenticator::new(&[UserConfig {
            username: "alice".to_string(),
            password: "secret".to_string(),
        }])
    }

    #[test]
    fn test_authenticate() {
        let auth = authenticator();
        assert_eq!(auth.authenticate("alice", "secret").as_deref(), Some("alice"));
        assert!(auth.authenticate("alice", "wrong").is_none());
        assert!(auth.authenticate("mallory", "secret").is_none());
    }

    #[test]
    fn test_identity_from_headers() {
        let auth = authenticator();
        let mut headers = HeaderMap::new();
        let token = BASE64.encode("alice:secret");
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&format!("Basic {}", token)).unwrap(),
        );
        assert_eq!(
            identity_from_headers(&auth, &headers).as_deref(),
            Some("alice")
        );
    }

    #[test]
    fn test_missing_or_malformed_header_is_rejected() {
        let auth = authenticator();
        assert!(identity_from_headers(&auth, &HeaderMap::new()).is_none());

        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer whatever"),
        );
        assert!(identity_from_headers(&auth, &headers).is_none());
    }
}

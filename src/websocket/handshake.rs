//! Authentication and scoping handshake.
//!
//! A connection is only admitted to the hub once both the bearer credential
//! and the project scope have been validated. Project membership is not
//! checked here: the client learned the project id from the REST API, which
//! already enforced access when it handed it out.

use axum::{
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::TokenVerifier;
use crate::hub::{Identity, ProjectId};

/// Query parameters accepted by the upgrade endpoint.
///
/// Both are kept as raw strings so a malformed project id is reported as a
/// handshake failure rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    pub token: Option<String>,
    pub project_id: Option<String>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("Missing authentication token")]
    MissingToken,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Missing project_id parameter")]
    MissingProjectId,

    #[error("Invalid project_id: {0}")]
    InvalidProjectId(String),
}

impl HandshakeError {
    /// Metrics label
    pub fn reason(&self) -> &'static str {
        match self {
            HandshakeError::MissingToken => "missing_token",
            HandshakeError::InvalidToken => "invalid_token",
            HandshakeError::MissingProjectId => "missing_project_id",
            HandshakeError::InvalidProjectId(_) => "invalid_project_id",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            HandshakeError::MissingToken | HandshakeError::InvalidToken => StatusCode::UNAUTHORIZED,
            HandshakeError::MissingProjectId | HandshakeError::InvalidProjectId(_) => {
                StatusCode::BAD_REQUEST
            }
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Credential and requested scope of a connection attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeRequest {
    pub token: Option<String>,
    pub project_id: Option<String>,
}

impl HandshakeRequest {
    /// Build from the upgrade request. The `token` query parameter wins over
    /// an `Authorization: Bearer` header.
    pub fn from_parts(query: HandshakeQuery, headers: &HeaderMap) -> Self {
        let token = query
            .token
            .filter(|t| !t.is_empty())
            .or_else(|| bearer_token(headers));

        Self {
            token,
            project_id: query.project_id,
        }
    }

    /// Resolve identity and scope, or refuse the connection
    pub fn authenticate(&self, verifier: &dyn TokenVerifier) -> Result<Identity, HandshakeError> {
        let token = self
            .token
            .as_deref()
            .filter(|t| !t.is_empty())
            .ok_or(HandshakeError::MissingToken)?;

        let user_id = verifier.verify(token).map_err(|e| {
            tracing::warn!(error = %e, "Token verification failed");
            HandshakeError::InvalidToken
        })?;

        let project_id = parse_project_id(self.project_id.as_deref())?;

        Ok(Identity {
            user_id,
            project_id,
        })
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

fn parse_project_id(raw: Option<&str>) -> Result<ProjectId, HandshakeError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(HandshakeError::MissingProjectId)?;

    // Digits only: `u64::from_str` would also take a leading '+'
    if !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(HandshakeError::InvalidProjectId(raw.to_string()));
    }

    raw.parse::<ProjectId>()
        .map_err(|_| HandshakeError::InvalidProjectId(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::hub::UserId;
    use axum::http::HeaderValue;

    /// Accepts exactly one token
    struct StaticVerifier;

    impl TokenVerifier for StaticVerifier {
        fn verify(&self, token: &str) -> Result<UserId, AppError> {
            match token {
                "valid-token" => Ok(42),
                _ => Err(AppError::Auth("unknown token".to_string())),
            }
        }
    }

    fn request(token: Option<&str>, project_id: Option<&str>) -> HandshakeRequest {
        HandshakeRequest {
            token: token.map(str::to_string),
            project_id: project_id.map(str::to_string),
        }
    }

    #[test]
    fn test_valid_handshake() {
        let identity = request(Some("valid-token"), Some("7"))
            .authenticate(&StaticVerifier)
            .unwrap();

        assert_eq!(
            identity,
            Identity {
                user_id: 42,
                project_id: 7
            }
        );
    }

    #[test]
    fn test_missing_token() {
        assert_eq!(
            request(None, Some("7")).authenticate(&StaticVerifier),
            Err(HandshakeError::MissingToken)
        );
        assert_eq!(
            request(Some(""), Some("7")).authenticate(&StaticVerifier),
            Err(HandshakeError::MissingToken)
        );
    }

    #[test]
    fn test_garbage_token() {
        assert_eq!(
            request(Some("garbage"), Some("7")).authenticate(&StaticVerifier),
            Err(HandshakeError::InvalidToken)
        );
    }

    #[test]
    fn test_missing_or_invalid_project_id() {
        assert_eq!(
            request(Some("valid-token"), None).authenticate(&StaticVerifier),
            Err(HandshakeError::MissingProjectId)
        );
        assert_eq!(
            request(Some("valid-token"), Some("  ")).authenticate(&StaticVerifier),
            Err(HandshakeError::MissingProjectId)
        );
        for bad in ["abc", "-3", "+7", "12abc", "1.5", "99999999999999999999999"] {
            assert_eq!(
                request(Some("valid-token"), Some(bad)).authenticate(&StaticVerifier),
                Err(HandshakeError::InvalidProjectId(bad.to_string()))
            );
        }
    }

    #[test]
    fn test_token_checked_before_scope() {
        assert_eq!(
            request(Some("garbage"), Some("abc")).authenticate(&StaticVerifier),
            Err(HandshakeError::InvalidToken)
        );
    }

    #[test]
    fn test_token_from_authorization_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer valid-token"),
        );
        let query = HandshakeQuery {
            token: None,
            project_id: Some("3".to_string()),
        };

        let request = HandshakeRequest::from_parts(query, &headers);

        assert_eq!(request.token.as_deref(), Some("valid-token"));
        assert_eq!(request.authenticate(&StaticVerifier).unwrap().project_id, 3);
    }

    #[test]
    fn test_query_token_takes_precedence() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer other"));
        let query = HandshakeQuery {
            token: Some("valid-token".to_string()),
            project_id: None,
        };

        let request = HandshakeRequest::from_parts(query, &headers);

        assert_eq!(request.token.as_deref(), Some("valid-token"));
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(HandshakeError::InvalidToken.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            HandshakeError::InvalidProjectId("x".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }
}

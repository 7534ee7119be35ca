//! Unified error handling for the HTTP API.
//!
//! Every layer's error converts into [`ApiError`], which renders as a JSON
//! body `{"error": "..."}` with the narrowest status code. Authentication
//! failures carry a `WWW-Authenticate` challenge (RFC 6750 §3).

use crate::authz::{Denied, Rejection};
use crate::caps::CapabilityError;
use crate::db::DbError;
use crate::token::TokenError;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Errors returned by request handlers.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("authentication required")]
    Unauthenticated,

    #[error("invalid token")]
    InvalidToken,

    #[error("token expired")]
    Expired,

    #[error("insufficient scope: {0} required")]
    InsufficientScope(&'static str),

    #[error("{0}")]
    Forbidden(String),

    #[error("not found")]
    NotFound,

    #[error("{0}")]
    Conflict(String),

    #[error("request body must be application/json")]
    UnsupportedMediaType,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    /// Get a static error code string for logs.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidToken => "invalid_token",
            Self::Expired => "expired",
            Self::InsufficientScope(_) => "insufficient_scope",
            Self::Forbidden(_) => "forbidden",
            Self::NotFound => "not_found",
            Self::Conflict(_) => "conflict",
            Self::UnsupportedMediaType => "unsupported_media_type",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthenticated | Self::InvalidToken | Self::Expired => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope(_) | Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The `WWW-Authenticate` challenge, if this error has one.
    fn challenge(&self) -> Option<String> {
        match self {
            Self::Unauthenticated => Some("Bearer".to_string()),
            Self::InvalidToken => Some(r#"Bearer error="invalid_token""#.to_string()),
            Self::Expired => {
                Some(r#"Bearer error="invalid_token",error_description="Expired""#.to_string())
            }
            Self::InsufficientScope(scope) => {
                Some(format!(r#"Bearer error="insufficient_scope",scope="{scope}""#))
            }
            _ => None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Internal(detail) => {
                tracing::error!(error = %detail, "request failed");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };

        let mut response = (status, Json(json!({ "error": message }))).into_response();
        if let Some(challenge) = self.challenge()
            && let Ok(value) = HeaderValue::from_str(&challenge)
        {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        response
    }
}

impl From<Denied> for ApiError {
    fn from(denied: Denied) -> Self {
        match denied.reason {
            Rejection::Unauthenticated => Self::Unauthenticated,
            Rejection::InvalidToken | Rejection::InvalidCapability => Self::InvalidToken,
            Rejection::Expired => Self::Expired,
            Rejection::InsufficientScope(scope) => Self::InsufficientScope(scope),
            Rejection::InsufficientPermission(missing) => {
                Self::Forbidden(format!("missing permission {missing}"))
            }
            Rejection::Lookup(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<DbError> for ApiError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::UserExists(name) => Self::Conflict(format!("username {name} is taken")),
            DbError::SpaceNotFound(_) => Self::NotFound,
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<TokenError> for ApiError {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Db(e) => e.into(),
            TokenError::InvalidCaveat(c) => Self::BadRequest(format!("invalid caveat: {c}")),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<CapabilityError> for ApiError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::InvalidCapability => Self::InvalidToken,
            CapabilityError::Widening { .. } => Self::Forbidden(err.to_string()),
            _ => Self::BadRequest(err.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::MissingJsonContentType(_) => Self::UnsupportedMediaType,
            other => Self::BadRequest(other.body_text()),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

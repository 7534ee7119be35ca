//! Credential extraction.

use crate::authz::{AuthContext, Credentials, Requirement};
use crate::caps::ACCESS_TOKEN_PARAM;
use crate::error::ApiError;
use crate::token::TokenContext;
use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, header};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use zeroize::Zeroizing;

use super::AppState;

/// The request line and whatever credentials came with it.
#[derive(Debug, Clone)]
pub struct Presented {
    pub ctx: TokenContext,
    pub credentials: Credentials,
}

impl Presented {
    /// Run the evaluator for `requirement`.
    pub async fn authorize(
        &self,
        state: &AppState,
        requirement: Requirement,
    ) -> Result<AuthContext, ApiError> {
        Ok(state
            .evaluator()
            .evaluate(&self.ctx, &self.credentials, &requirement)
            .await?)
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Presented {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let bearer = extract_bearer(&parts.headers).map(str::to_string);
        let capability = parts
            .uri
            .query()
            .and_then(|q| query_param(q, ACCESS_TOKEN_PARAM))
            .map(str::to_string);

        Ok(Self {
            ctx: TokenContext::new(parts.method.clone(), parts.uri.path()),
            credentials: Credentials { bearer, capability },
        })
    }
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    let h = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    h.strip_prefix("Bearer ").map(str::trim).filter(|t| !t.is_empty())
}

fn query_param<'q>(query: &'q str, name: &str) -> Option<&'q str> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find_map(|(key, value)| (key == name && !value.is_empty()).then_some(value))
}

/// `Authorization: Basic` username and password, if present and well formed.
pub(super) fn basic_credentials(headers: &HeaderMap) -> Option<(String, Zeroizing<String>)> {
    let h = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let encoded = h.strip_prefix("Basic ")?;
    let decoded = Zeroizing::new(STANDARD.decode(encoded.trim()).ok()?);
    let text = std::str::from_utf8(&decoded).ok()?;
    let (user, password) = text.split_once(':')?;
    Some((user.to_string(), Zeroizing::new(password.to_string())))
}

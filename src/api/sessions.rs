//! Login and logout.

use crate::authz::{Requirement, ScopeSet, scope};
use crate::error::ApiError;
use crate::token::{SCOPE_ATTRIBUTE, Token, TokenError};
use axum::Json;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use super::extract::basic_credentials;
use super::{AppState, Presented};

#[derive(Deserialize)]
pub struct LoginParams {
    scope: Option<String>,
}

/// `POST /sessions`
///
/// Accepts Basic credentials, or a bearer token carrying `full_access`.
pub async fn login(
    State(state): State<AppState>,
    presented: Presented,
    headers: HeaderMap,
    params: Result<Query<LoginParams>, QueryRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let Query(params) = params?;
    let scopes = match params.scope.as_deref() {
        Some(requested) => {
            let set = ScopeSet::parse_known(requested)
                .map_err(|name| ApiError::BadRequest(format!("unknown scope {name:?}")))?;
            if set.is_empty() {
                return Err(ApiError::BadRequest("scope must not be empty".to_string()));
            }
            set.to_string()
        }
        None => state.default_scopes.clone(),
    };

    let subject = if let Some((username, password)) = basic_credentials(&headers) {
        if !state.db.users().authenticate(&username, &password).await? {
            debug!(username = %username, "login rejected: bad credentials");
            return Err(ApiError::Unauthenticated);
        }
        username
    } else {
        let auth = presented
            .authorize(&state, Requirement::scope(scope::FULL_ACCESS))
            .await?;
        auth.subject.ok_or(ApiError::Unauthenticated)?
    };

    let expiry = state.clock.now() + state.token_ttl;
    let token = Token::new(&subject, expiry).with_attribute(SCOPE_ATTRIBUTE, &scopes);
    let id = state.tokens.create(&presented.ctx, &token).await?;

    info!(
        subject = %subject,
        scope = %scopes,
        backend = state.tokens.kind(),
        "session created"
    );
    Ok((StatusCode::CREATED, Json(json!({ "token": id }))))
}

/// `DELETE /sessions`
///
/// Revokes the presented bearer token. The token goes to the store without
/// being authorized: a macaroon copy whose caveats no longer hold still
/// revokes its identifier. Self-contained tokens cannot be revoked and simply
/// run to expiry.
pub async fn logout(
    State(state): State<AppState>,
    presented: Presented,
) -> Result<Json<Value>, ApiError> {
    let Some(bearer) = presented.credentials.bearer.as_deref() else {
        return Err(ApiError::Unauthenticated);
    };

    match state.tokens.revoke(&presented.ctx, bearer).await {
        Ok(()) => info!(backend = state.tokens.kind(), "session revoked"),
        Err(TokenError::Unsupported(op)) => {
            debug!(
                backend = state.tokens.kind(),
                op,
                "token store cannot revoke; token runs to expiry"
            );
        }
        Err(e) => return Err(e.into()),
    }
    Ok(Json(json!({})))
}

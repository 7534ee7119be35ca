//! Capability sharing.

use crate::authz::Permissions;
use crate::error::ApiError;
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::AppState;

#[derive(Deserialize)]
pub struct ShareRequest {
    uri: String,
    perms: Permissions,
}

/// `POST /capabilities`
///
/// The capability in `uri` is the credential: whoever holds a link may derive
/// a narrower one for the same resource.
pub async fn share(
    State(state): State<AppState>,
    body: Result<Json<ShareRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(req) = body?;
    let uri = state.caps.share(&req.uri, req.perms)?;
    info!(perms = %req.perms, "capability shared");
    Ok(Json(json!({ "uri": uri })))
}

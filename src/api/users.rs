//! User registration.

use crate::error::ApiError;
use crate::security::password::{MIN_PASSWORD_LEN, meets_policy};
use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::OnceLock;
use tracing::info;
use zeroize::Zeroizing;

use super::AppState;

static USERNAME: OnceLock<Regex> = OnceLock::new();

/// Whether `name` is a well-formed username.
pub(super) fn valid_username(name: &str) -> bool {
    USERNAME
        .get_or_init(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9]{1,29}$").expect("static pattern"))
        .is_match(name)
}

#[derive(Deserialize)]
pub struct RegisterRequest {
    username: String,
    password: Zeroizing<String>,
}

/// `POST /users`
pub async fn register(
    State(state): State<AppState>,
    body: Result<Json<RegisterRequest>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let Json(req) = body?;
    if !valid_username(&req.username) {
        return Err(ApiError::BadRequest("invalid username".to_string()));
    }
    if !meets_policy(&req.password) {
        return Err(ApiError::BadRequest(format!(
            "password must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }

    state.db.users().register(&req.username, &req.password).await?;
    info!(username = %req.username, "user registered");

    let path = format!("/users/{}", req.username);
    let mut headers = HeaderMap::new();
    if let Ok(location) = HeaderValue::from_str(&path) {
        headers.insert(header::LOCATION, location);
    }
    Ok((
        StatusCode::CREATED,
        headers,
        Json(json!({ "username": req.username, "uri": state.uri(&path) })),
    ))
}

//! Spaces, messages and members.
//!
//! Requests authorized by a capability get capability links back: a message
//! URI returned to a capability holder carries its own `access_token`,
//! minted with no more than the presented link's permissions and expiry.
//!
//! Request bodies and query strings are checked before any credential is
//! looked at, so malformed input gets 400/415 whatever the caller presents.

use crate::authz::{AuthContext, Permissions, Requirement, Role, scope};
use crate::config::PermissionModel;
use crate::error::ApiError;
use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use super::users::valid_username;
use super::{AppState, Presented};

const MAX_SPACE_NAME_LEN: usize = 255;
const MAX_MESSAGE_LEN: usize = 1024;

fn messages_path(space_id: i64) -> String {
    format!("/spaces/{space_id}/messages")
}

fn message_path(space_id: i64, msg_id: i64) -> String {
    format!("/spaces/{space_id}/messages/{msg_id}")
}

fn location(path: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(path) {
        headers.insert(header::LOCATION, value);
    }
    headers
}

/// Link to `path` for whoever made the request.
fn link(state: &AppState, auth: &AuthContext, path: &str) -> Result<String, ApiError> {
    match &auth.capability {
        Some(grant) => Ok(state.caps.mint_until(path, auth.perms, grant.expiry())?),
        None => Ok(state.uri(path)),
    }
}

fn require_subject(auth: AuthContext) -> Result<String, ApiError> {
    auth.subject.ok_or(ApiError::Unauthenticated)
}

#[derive(Deserialize)]
pub struct NewSpace {
    name: String,
    owner: String,
}

/// `POST /spaces`
pub async fn create_space(
    State(state): State<AppState>,
    presented: Presented,
    body: Result<Json<NewSpace>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let Json(req) = body?;
    let name_len = req.name.chars().count();
    if name_len == 0 || name_len > MAX_SPACE_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "space name must be 1 to {MAX_SPACE_NAME_LEN} characters"
        )));
    }
    if !valid_username(&req.owner) {
        return Err(ApiError::BadRequest("invalid owner".to_string()));
    }

    let auth = presented
        .authorize(&state, Requirement::scope(scope::CREATE_SPACE))
        .await?;
    let subject = require_subject(auth)?;
    if req.owner != subject {
        return Err(ApiError::BadRequest(
            "owner must match authenticated user".to_string(),
        ));
    }

    let space = state.db.spaces().create(&req.name, &req.owner, state.model).await?;
    let owned = state
        .db
        .permissions()
        .lookup(state.model, space.space_id, &req.owner)
        .await?;

    let messages = messages_path(space.space_id);
    let ttl = state.caps.default_ttl();
    let rw = state.caps.mint(
        &messages,
        owned.intersect(Permissions::READ.union(Permissions::WRITE)),
        ttl,
    )?;
    let r = state
        .caps
        .mint(&messages, owned.intersect(Permissions::READ), ttl)?;

    info!(space_id = space.space_id, owner = %space.owner, "space created");
    let path = format!("/spaces/{}", space.space_id);
    Ok((
        StatusCode::CREATED,
        location(&path),
        Json(json!({
            "name": space.name,
            "uri": state.uri(&path),
            "messages-rw": rw,
            "messages-r": r,
        })),
    ))
}

#[derive(Deserialize)]
pub struct NewMessage {
    author: String,
    message: String,
}

/// `POST /spaces/:space_id/messages`
pub async fn post_message(
    State(state): State<AppState>,
    presented: Presented,
    space_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<NewMessage>, JsonRejection>,
) -> Result<(StatusCode, HeaderMap, Json<Value>), ApiError> {
    let Path(space_id) = space_id?;
    let Json(req) = body?;
    if req.message.chars().count() > MAX_MESSAGE_LEN {
        return Err(ApiError::BadRequest(format!(
            "message must be at most {MAX_MESSAGE_LEN} characters"
        )));
    }

    let auth = presented
        .authorize(
            &state,
            Requirement::scope(scope::POST_MESSAGE).on_space(space_id, Permissions::WRITE),
        )
        .await?;
    let Some(subject) = auth.subject.as_deref() else {
        return Err(ApiError::Unauthenticated);
    };
    if req.author != subject {
        return Err(ApiError::BadRequest(
            "author must match authenticated user".to_string(),
        ));
    }

    let record = state
        .db
        .spaces()
        .post_message(space_id, &req.author, &req.message, state.clock.now())
        .await?;

    let path = message_path(space_id, record.msg_id);
    let uri = link(&state, &auth, &path)?;
    Ok((StatusCode::CREATED, location(&path), Json(json!({ "uri": uri }))))
}

/// `GET /spaces/:space_id/messages/:msg_id`
pub async fn read_message(
    State(state): State<AppState>,
    presented: Presented,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path((space_id, msg_id)) = ids?;
    let auth = presented
        .authorize(
            &state,
            Requirement::scope(scope::READ_MESSAGE).on_space(space_id, Permissions::READ),
        )
        .await?;

    let record = state
        .db
        .spaces()
        .read_message(space_id, msg_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(json!({
        "uri": link(&state, &auth, &message_path(space_id, msg_id))?,
        "author": record.author,
        "time": record.time.to_rfc3339_opts(SecondsFormat::Millis, true),
        "message": record.text,
    })))
}

#[derive(Deserialize)]
pub struct ListParams {
    since: Option<String>,
}

/// `GET /spaces/:space_id/messages?since=`
pub async fn list_messages(
    State(state): State<AppState>,
    presented: Presented,
    space_id: Result<Path<i64>, PathRejection>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<String>>, ApiError> {
    let Path(space_id) = space_id?;
    let Query(params) = params?;
    let since = match params.since.as_deref() {
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map_err(|_| ApiError::BadRequest("since must be an RFC 3339 timestamp".to_string()))?
            .with_timezone(&Utc),
        None => state.clock.now() - Duration::days(1),
    };

    let auth = presented
        .authorize(
            &state,
            Requirement::scope(scope::LIST_MESSAGES).on_space(space_id, Permissions::READ),
        )
        .await?;

    let ids = state.db.spaces().list_messages(space_id, since).await?;
    let uris = ids
        .into_iter()
        .map(|msg_id| link(&state, &auth, &message_path(space_id, msg_id)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(uris))
}

/// `DELETE /spaces/:space_id/messages/:msg_id`
pub async fn delete_message(
    State(state): State<AppState>,
    presented: Presented,
    ids: Result<Path<(i64, i64)>, PathRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path((space_id, msg_id)) = ids?;
    let auth = presented
        .authorize(
            &state,
            Requirement::scope(scope::DELETE_MESSAGE).on_space(space_id, Permissions::DELETE),
        )
        .await?;

    if !state.db.spaces().delete_message(space_id, msg_id).await? {
        return Err(ApiError::NotFound);
    }
    info!(space_id, msg_id, %auth, "message deleted");
    Ok(Json(json!({})))
}

#[derive(Deserialize)]
pub struct NewMember {
    username: String,
    permissions: Option<Permissions>,
    role: Option<Role>,
}

/// `POST /spaces/:space_id/members`
pub async fn add_member(
    State(state): State<AppState>,
    presented: Presented,
    space_id: Result<Path<i64>, PathRejection>,
    body: Result<Json<NewMember>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Path(space_id) = space_id?;
    let Json(req) = body?;
    if !valid_username(&req.username) {
        return Err(ApiError::BadRequest("invalid username".to_string()));
    }
    let (granted, role) = match (req.permissions, req.role, state.model) {
        (Some(perms), None, PermissionModel::Acl) => (perms, None),
        (None, Some(role), _) => (role.permissions(), Some(role)),
        (Some(_), None, PermissionModel::Roles) => {
            return Err(ApiError::BadRequest(
                "this server assigns roles; send a role".to_string(),
            ));
        }
        _ => {
            return Err(ApiError::BadRequest(
                "exactly one of permissions or role is required".to_string(),
            ));
        }
    };

    let auth = presented
        .authorize(
            &state,
            Requirement::scope(scope::ADD_MEMBER).on_space(space_id, Permissions::ALL),
        )
        .await?;
    if !state.db.users().exists(&req.username).await? {
        return Err(ApiError::BadRequest(format!("unknown user {}", req.username)));
    }
    if !auth.perms.contains(granted) {
        return Err(ApiError::Forbidden(format!(
            "cannot grant {granted} while holding {}",
            auth.perms
        )));
    }

    let grants = state.db.permissions();
    match (state.model, role) {
        (PermissionModel::Roles, Some(role)) => {
            grants.assign_role(space_id, &req.username, role).await?
        }
        _ => grants.grant(space_id, &req.username, granted).await?,
    }

    info!(space_id, member = %req.username, perms = %granted, %auth, "member added");
    Ok(Json(json!({
        "username": req.username,
        "permissions": granted.to_string(),
    })))
}

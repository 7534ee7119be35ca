//! The oauth2 backend against a mock authorization server.

mod common;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Form, Json, Router};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use common::{TestServer, challenge};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpListener;

const CLIENT_ID: &str = "natter";
const CLIENT_SECRET: &str = "s3cret";

#[derive(Clone, Default)]
struct AuthServer {
    revoked: Arc<Mutex<HashSet<String>>>,
}

#[derive(Deserialize)]
struct TokenForm {
    token: String,
}

fn client_authenticated(headers: &HeaderMap) -> bool {
    let expected = format!("Basic {}", STANDARD.encode(format!("{CLIENT_ID}:{CLIENT_SECRET}")));
    headers
        .get(header::AUTHORIZATION)
        .is_some_and(|v| v.as_bytes() == expected.as_bytes())
}

async fn introspect(
    State(server): State<AuthServer>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> Response {
    if !client_authenticated(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    if server.revoked.lock().contains(&form.token) {
        return Json(json!({ "active": false })).into_response();
    }
    let now = Utc::now().timestamp();
    let body = match form.token.as_str() {
        "good" => json!({
            "active": true,
            "sub": "alice",
            "exp": now + 600,
            "scope": "create_space post_message read_message list_messages",
            "client_id": "mobile-app",
            "token_type": "access_token",
        }),
        "stale" => json!({ "active": true, "sub": "alice", "exp": now - 60 }),
        "refresh" => json!({
            "active": true,
            "sub": "alice",
            "exp": now + 600,
            "token_type": "refresh_token",
        }),
        _ => json!({ "active": false }),
    };
    Json(body).into_response()
}

async fn revoke(
    State(server): State<AuthServer>,
    headers: HeaderMap,
    Form(form): Form<TokenForm>,
) -> StatusCode {
    if !client_authenticated(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    server.revoked.lock().insert(form.token);
    StatusCode::OK
}

/// Start the mock server, returning its base URL.
async fn spawn_auth_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let app = Router::new()
        .route("/introspect", post(introspect))
        .route("/revoke", post(revoke))
        .with_state(AuthServer::default());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    base
}

async fn natter(auth_server: &str, secret: &str) -> TestServer {
    TestServer::with_config(&format!(
        r#"
[tokens]
backend = "oauth2"

[introspection]
endpoint = "{auth_server}/introspect"
revocation_endpoint = "{auth_server}/revoke"
client_id = "{CLIENT_ID}"
client_secret = "{secret}"
require_https = false
"#
    ))
    .await
}

async fn create_space(server: &TestServer, token: &str) -> reqwest::Response {
    server
        .post("/spaces")
        .bearer_auth(token)
        .json(&json!({ "name": "general", "owner": "alice" }))
        .send()
        .await
        .unwrap()
}

#[tokio::test]
async fn active_token_is_accepted_with_its_scope() {
    let auth = spawn_auth_server().await;
    let server = natter(&auth, CLIENT_SECRET).await;

    let created = create_space(&server, "good").await;
    assert_eq!(created.status(), 201);

    // delete_message was not in the introspected scope
    let body: serde_json::Value = created.json().await.unwrap();
    let uri = body["uri"].as_str().unwrap();
    let response = server
        .client
        .delete(format!("{uri}/messages/1"))
        .bearer_auth("good")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(challenge(&response).contains(r#"scope="delete_message""#));
}

#[tokio::test]
async fn inactive_expired_and_wrong_type_tokens_fail() {
    let auth = spawn_auth_server().await;
    let server = natter(&auth, CLIENT_SECRET).await;

    let unknown = create_space(&server, "nope").await;
    assert_eq!(unknown.status(), 401);
    assert_eq!(challenge(&unknown), r#"Bearer error="invalid_token""#);

    let stale = create_space(&server, "stale").await;
    assert_eq!(stale.status(), 401);
    assert!(challenge(&stale).contains("Expired"));

    let refresh = create_space(&server, "refresh").await;
    assert_eq!(refresh.status(), 401);
}

#[tokio::test]
async fn rejected_client_credentials_fail_closed() {
    let auth = spawn_auth_server().await;
    let server = natter(&auth, "wrong").await;

    let response = create_space(&server, "good").await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn unreachable_server_fails_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);
    let server = natter(&dead, CLIENT_SECRET).await;

    let response = create_space(&server, "good").await;
    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn login_route_is_not_mounted() {
    let auth = spawn_auth_server().await;
    let server = natter(&auth, CLIENT_SECRET).await;

    let response = server
        .post("/sessions")
        .basic_auth("alice", Some(common::PASSWORD))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 405);
}

#[tokio::test]
async fn logout_revokes_upstream() {
    let auth = spawn_auth_server().await;
    let server = natter(&auth, CLIENT_SECRET).await;

    let logout = server.delete("/sessions").bearer_auth("good").send().await.unwrap();
    assert_eq!(logout.status(), 200);

    let response = create_space(&server, "good").await;
    assert_eq!(response.status(), 401);
}

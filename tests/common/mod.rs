//! Integration test common infrastructure.
//!
//! Boots the real API on an ephemeral port with an in-memory database and a
//! manual clock, and drives it over HTTP with reqwest.

#![allow(dead_code)]

use natter::api::{self, AppState};
use natter::clock::{ManualClock, SharedClock};
use natter::config::Config;
use natter::db::Database;
use natter::keys::KeyRing;
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

pub const PASSWORD: &str = "correct horse";

const ROOT_SECRET: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

/// A running natter API.
pub struct TestServer {
    pub base: String,
    pub clock: Arc<ManualClock>,
    pub client: Client,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Start with default settings (database tokens wrapped in macaroons).
    pub async fn spawn() -> Self {
        Self::with_config("").await
    }

    /// Start with `extra` TOML sections appended to the base configuration.
    pub async fn with_config(extra: &str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let base = format!("http://{}", listener.local_addr().expect("local addr"));

        let toml = format!(
            r#"
[server]
base_url = "{base}"

[database]
path = ":memory:"

[keys]
root_secret = "{ROOT_SECRET}"
key_id = "it"

{extra}
"#
        );
        let config = Config::from_toml(&toml).expect("test config is valid");
        let keys = KeyRing::from_config(&config.keys).expect("test key ring");
        let db = Database::new(&config.database.path).await.expect("database");
        let clock = ManualClock::starting_now();
        let shared: SharedClock = clock.clone();

        let state = AppState::from_config(&config, &keys, db, shared).expect("app state");
        let app = api::router(state);
        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            base,
            clock,
            client: Client::new(),
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path))
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.client.post(self.url(path))
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path))
    }

    pub async fn register(&self, username: &str) {
        let response = self
            .post("/users")
            .json(&json!({ "username": username, "password": PASSWORD }))
            .send()
            .await
            .expect("register");
        assert_eq!(response.status(), 201, "registering {username}");
    }

    /// Log in with Basic credentials, optionally asking for `scope`.
    pub async fn login(&self, username: &str, scope: Option<&str>) -> String {
        let mut request = self.post("/sessions").basic_auth(username, Some(PASSWORD));
        if let Some(scope) = scope {
            request = request.query(&[("scope", scope)]);
        }
        let response = request.send().await.expect("login");
        assert_eq!(response.status(), 201, "logging in {username}");
        let body: Value = response.json().await.expect("login body");
        body["token"].as_str().expect("token string").to_string()
    }

    /// Create a space owned by `owner`, returning the response body.
    pub async fn create_space(&self, token: &str, owner: &str, name: &str) -> Value {
        let response = self
            .post("/spaces")
            .bearer_auth(token)
            .json(&json!({ "name": name, "owner": owner }))
            .send()
            .await
            .expect("create space");
        assert_eq!(response.status(), 201);
        response.json().await.expect("space body")
    }

    pub async fn post_message(
        &self,
        token: &str,
        space: &str,
        author: &str,
        text: &str,
    ) -> Response {
        self.post(&format!("{space}/messages"))
            .bearer_auth(token)
            .json(&json!({ "author": author, "message": text }))
            .send()
            .await
            .expect("post message")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Path part of a space URI returned by the API.
pub fn path_of<'a>(server: &TestServer, uri: &'a str) -> &'a str {
    uri.strip_prefix(&server.base).expect("uri on this server")
}

/// The `WWW-Authenticate` header, or empty.
pub fn challenge(response: &Response) -> String {
    response
        .headers()
        .get("www-authenticate")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

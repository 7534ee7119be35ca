//! Capability URIs over HTTP.

mod common;

use chrono::Duration;
use common::{TestServer, challenge, path_of};
use serde_json::{Value, json};

struct Space {
    path: String,
    rw: String,
    r: String,
    token: String,
}

async fn setup(server: &TestServer) -> Space {
    server.register("alice").await;
    let token = server.login("alice", None).await;
    let space = server.create_space(&token, "alice", "general").await;
    let posted = server
        .post_message(&token, path_of(server, space["uri"].as_str().unwrap()), "alice", "hello")
        .await;
    assert_eq!(posted.status(), 201);
    Space {
        path: path_of(server, space["uri"].as_str().unwrap()).to_string(),
        rw: space["messages-rw"].as_str().unwrap().to_string(),
        r: space["messages-r"].as_str().unwrap().to_string(),
        token,
    }
}

fn without_token(link: &str) -> &str {
    link.split_once('?').map_or(link, |(base, _)| base)
}

#[tokio::test]
async fn read_link_lists_and_reads_without_a_token() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;
    assert!(space.r.starts_with(&server.url(&format!("{}/messages?access_token=", space.path))));

    let listed: Vec<String> = server
        .client
        .get(&space.r)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    // Links handed to a capability holder are capabilities themselves.
    assert!(listed[0].contains("?access_token="));

    let message: Value = server
        .client
        .get(&listed[0])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(message["message"], "hello");
}

#[tokio::test]
async fn read_link_cannot_post() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;

    let response = server
        .client
        .post(&space.r)
        .json(&json!({ "author": "alice", "message": "sneaky" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
}

#[tokio::test]
async fn posting_needs_a_subject_as_well() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;
    let body = json!({ "author": "alice", "message": "again" });

    let anonymous = server.client.post(&space.rw).json(&body).send().await.unwrap();
    assert_eq!(anonymous.status(), 401);

    let both = server
        .client
        .post(&space.rw)
        .bearer_auth(&space.token)
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(both.status(), 201);
    let uri = both.json::<Value>().await.unwrap()["uri"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(uri.contains("?access_token="));
}

#[tokio::test]
async fn token_and_capability_must_both_pass() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;
    let reader = server.login("alice", Some("read_message list_messages")).await;

    // The link allows writing; the token's scope does not.
    let response = server
        .client
        .post(&space.rw)
        .bearer_auth(&reader)
        .json(&json!({ "author": "alice", "message": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(challenge(&response).contains("insufficient_scope"));
}

#[tokio::test]
async fn share_narrows_but_never_widens() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;

    let shared = server
        .post("/capabilities")
        .json(&json!({ "uri": space.rw, "perms": "r" }))
        .send()
        .await
        .unwrap();
    assert_eq!(shared.status(), 200);
    let narrowed = shared.json::<Value>().await.unwrap()["uri"]
        .as_str()
        .unwrap()
        .to_string();
    assert_eq!(server.client.get(&narrowed).send().await.unwrap().status(), 200);
    let post = server
        .client
        .post(&narrowed)
        .bearer_auth(&space.token)
        .json(&json!({ "author": "alice", "message": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(post.status(), 403);

    let widened = server
        .post("/capabilities")
        .json(&json!({ "uri": space.r, "perms": "rw" }))
        .send()
        .await
        .unwrap();
    assert_eq!(widened.status(), 403);
}

#[tokio::test]
async fn share_refuses_foreign_and_forged_links() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;

    let token = space.r.split_once('?').unwrap().1;
    let foreign = server
        .post("/capabilities")
        .json(&json!({
            "uri": format!("https://evil.example{}/messages?{token}", space.path),
            "perms": "r",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(foreign.status(), 400);

    let forged = server
        .post("/capabilities")
        .json(&json!({
            "uri": format!("{}?access_token=x.y", without_token(&space.rw)),
            "perms": "r",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), 401);
}

#[tokio::test]
async fn forged_and_misdirected_capabilities_are_invalid() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;

    let forged = server
        .client
        .get(format!("{}?access_token=x.y", without_token(&space.r)))
        .send()
        .await
        .unwrap();
    assert_eq!(forged.status(), 401);
    assert_eq!(challenge(&forged), r#"Bearer error="invalid_token""#);

    // A link to the list does not open the space's members route.
    let token = space.r.split_once('?').unwrap().1;
    let elsewhere = server
        .post(&format!("{}/members?{token}", space.path))
        .json(&json!({ "username": "alice", "permissions": "r" }))
        .send()
        .await
        .unwrap();
    assert_eq!(elsewhere.status(), 401);
}

#[tokio::test]
async fn capabilities_expire() {
    let server = TestServer::spawn().await;
    let space = setup(&server).await;

    server.clock.advance(Duration::days(2));
    let response = server.client.get(&space.r).send().await.unwrap();
    assert_eq!(response.status(), 401);
}

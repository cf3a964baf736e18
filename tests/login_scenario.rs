//! End-to-end login flows across environments.

use gallery_guard::config::Environment;
use serde_json::{json, Value};

mod common;

#[tokio::test]
async fn test_production_plaintext_login_is_redirected_and_flagged() {
    let server = common::spawn_server(common::config_for(Environment::Production)).await;
    let res = common::client()
        .post(server.url("/user/login"))
        .json(&json!({ "username": "ana", "password": "secret" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 301);
    assert_eq!(
        res.headers()["location"].to_str().unwrap(),
        format!("https://{}/user/login", server.addr)
    );

    let security = server.pipeline.monitor.stats();
    assert_eq!(security.by_type.get("insecure_transmission"), Some(&1));
}

#[tokio::test]
async fn test_injection_in_username_is_neutralized() {
    let server = common::spawn_server(common::test_config()).await;
    let client = common::client();
    let token = common::csrf_token(&client, &server).await;

    let res = client
        .post(server.url("/user/login"))
        .header("x-csrf-token", &token)
        .json(&json!({ "username": "a' OR 1=1 --", "password": "x" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["username"], "a  ");

    let sessions = server.pipeline.sessions.store().len();
    assert_eq!(sessions, 1);
}

#[tokio::test]
async fn test_empty_credentials_rejected() {
    let server = common::spawn_server(common::test_config()).await;
    let client = common::client();
    let token = common::csrf_token(&client, &server).await;

    let res = client
        .post(server.url("/user/login"))
        .header("x-csrf-token", &token)
        .json(&json!({ "username": "", "password": "" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 400);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "E_LOGIN_FIELDS");
    assert_eq!(body["statusCode"], 400);
    assert!(body["errorId"].as_str().is_some());
}

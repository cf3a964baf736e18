//! HTTPS enforcement through the full middleware stack.

use gallery_guard::config::{Environment, GuardConfig};

mod common;

fn enforcing() -> GuardConfig {
    let mut config = common::test_config();
    config.https.enforce_https = true;
    config.https.hsts_max_age_secs = 31_536_000;
    config.https.hsts_include_subdomains = true;
    config.https.secure_cookies = true;
    config
}

#[tokio::test]
async fn test_plain_http_redirects_to_same_path() {
    let server = common::spawn_server(enforcing()).await;
    let res = common::client()
        .get(server.url("/anything?page=2"))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 301);
    assert_eq!(
        res.headers()["location"].to_str().unwrap(),
        format!("https://{}/anything?page=2", server.addr)
    );
    assert_eq!(server.pipeline.transport.stats().redirects, 1);
}

#[tokio::test]
async fn test_health_is_never_redirected() {
    let server = common::spawn_server(enforcing()).await;
    let client = common::client();
    for path in ["/health", "/healthz"] {
        let res = client.get(server.url(path)).send().await.unwrap();
        assert_eq!(res.status(), 200, "{} should not redirect", path);
    }
}

#[tokio::test]
async fn test_forwarded_https_gets_hsts_and_secure_cookies() {
    let server = common::spawn_server(enforcing()).await;
    let res = common::client()
        .get(server.url("/"))
        .header("x-forwarded-proto", "https")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 200);
    let hsts = res.headers()["strict-transport-security"].to_str().unwrap();
    assert!(hsts.contains("max-age=31536000"));
    assert!(hsts.contains("includeSubDomains"));

    let cookie = res.headers()["set-cookie"].to_str().unwrap();
    assert!(cookie.starts_with("gg.sid="));
    assert_eq!(cookie.matches("Secure").count(), 1);
}

#[tokio::test]
async fn test_insecure_login_is_flagged() {
    let server = common::spawn_server(enforcing()).await;
    let res = common::client()
        .post(server.url("/user/login"))
        .json(&serde_json::json!({ "username": "ana", "password": "pw" }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 301);
    let stats = server.pipeline.monitor.stats();
    assert_eq!(stats.by_type.get("insecure_transmission"), Some(&1));
    assert_eq!(server.pipeline.transport.stats().insecure_sensitive_requests, 1);
}

#[tokio::test]
async fn test_no_redirect_when_not_enforced() {
    let server = common::spawn_server(common::test_config()).await;
    let res = common::client().get(server.url("/")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().get("strict-transport-security").is_none());
}

#[tokio::test]
async fn test_redirect_refuses_unlisted_host() {
    let mut config = common::config_for(Environment::Production);
    config.https.enforce_https = true;
    config.headers.allowed_hosts = vec!["gallery.example".to_string()];
    let server = common::spawn_server(config).await;
    let client = common::client();

    let res = client.get(server.url("/art?id=1")).send().await.unwrap();
    assert_eq!(res.status(), 400);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["code"], "INVALID_HOST");
    assert_eq!(server.pipeline.transport.stats().redirects, 0);
    assert_eq!(server.pipeline.monitor.stats().by_type.get("host_rejected"), Some(&1));

    let res = client
        .get(server.url("/art?id=1"))
        .header("host", "gallery.example")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 301);
    assert_eq!(res.headers()["location"], "https://gallery.example/art?id=1");
}

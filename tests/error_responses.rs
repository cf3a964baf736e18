//! Terminal error sink: content negotiation, panics and filtering.

use axum::{routing::get, Router};
use serde_json::Value;

use gallery_guard::AppError;

mod common;

fn failing_app() -> Router {
    Router::new()
        .route(
            "/boom",
            get(|| async {
                let fire = true;
                if fire {
                    panic!("disk on fire");
                }
                "never"
            }),
        )
        .route(
            "/db",
            get(|| async { Err::<String, _>(AppError::internal("connection pool exhausted")) }),
        )
}

#[tokio::test]
async fn test_panic_becomes_json_500() {
    let server = common::spawn_app(common::test_config(), failing_app()).await;
    let res = common::client()
        .get(server.url("/boom"))
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 500);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["statusCode"], 500);
    // Server-side detail stays out of the payload outside development.
    assert!(!body["message"].as_str().unwrap().contains("disk on fire"));
    assert!(body.get("details").is_none());

    // The server keeps serving after a panic.
    let res = common::client().get(server.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
}

#[tokio::test]
async fn test_repeated_errors_share_one_report() {
    let server = common::spawn_app(common::test_config(), failing_app()).await;
    let client = common::client();

    let mut ids = Vec::new();
    for _ in 0..3 {
        let body: Value = client
            .get(server.url("/db"))
            .header("x-requested-with", "XMLHttpRequest")
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        ids.push(body["errorId"].as_str().unwrap().to_string());
    }
    assert!(ids.windows(2).all(|w| w[0] == w[1]));

    let reporter = server.pipeline.errors.reporter();
    let report = reporter.get(&ids[0]).unwrap();
    assert_eq!(report.occurrence_count, 3);
    assert_eq!(reporter.stats().total_errors, 3);
    assert_eq!(reporter.stats().unique_errors, 1);
}

#[tokio::test]
async fn test_unknown_route_renders_html() {
    let server = common::spawn_server(common::test_config()).await;
    let res = common::client()
        .get(server.url("/nowhere"))
        .header("accept", "text/html")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let content_type = res.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/html"));
    let body = res.text().await.unwrap();
    assert!(body.contains("<h1>404"));
    assert!(body.contains("Cannot find /nowhere"));
}

#[tokio::test]
async fn test_bot_errors_are_not_reported() {
    let server = common::spawn_server(common::test_config()).await;
    let res = common::client()
        .get(server.url("/nowhere"))
        .header("user-agent", "Googlebot/2.1")
        .header("accept", "application/json")
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 404);
    let stats = server.pipeline.errors.reporter().stats();
    assert_eq!(stats.total_errors, 0);
    assert_eq!(stats.filtered, 1);
}

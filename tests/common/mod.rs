//! Shared utilities for integration tests.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio::net::TcpListener;

use gallery_guard::config::{Environment, GuardConfig};
use gallery_guard::http::{gallery_router, GuardServer};
use gallery_guard::lifecycle::Shutdown;
use gallery_guard::security::SecurityPipeline;

#[allow(dead_code)]
pub const ADMIN_KEY: &str = "integration-admin-key";

/// A fully wired server on an ephemeral port. Shuts down on drop.
pub struct TestServer {
    pub addr: SocketAddr,
    pub pipeline: Arc<SecurityPipeline>,
    shutdown: Shutdown,
}

#[allow(dead_code)]
impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.trigger();
    }
}

/// Test-environment preset with a known admin key.
#[allow(dead_code)]
pub fn test_config() -> GuardConfig {
    config_for(Environment::Test)
}

#[allow(dead_code)]
pub fn config_for(env: Environment) -> GuardConfig {
    let mut config = GuardConfig::for_environment(env);
    config.admin.api_key = ADMIN_KEY.to_string();
    config
}

/// Serve the gallery application behind the pipeline.
#[allow(dead_code)]
pub async fn spawn_server(config: GuardConfig) -> TestServer {
    spawn_app(config, gallery_router()).await
}

/// Serve `app` behind the pipeline.
pub async fn spawn_app(config: GuardConfig, app: Router) -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let pipeline = Arc::new(SecurityPipeline::new(config));
    let shutdown = Shutdown::new();
    let server = GuardServer::new(pipeline.clone(), app);

    let server_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let _ = server.run(listener, server_shutdown).await;
    });

    TestServer {
        addr,
        pipeline,
        shutdown,
    }
}

/// Client with a cookie jar that never follows redirects.
#[allow(dead_code)]
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .cookie_store(true)
        .redirect(reqwest::redirect::Policy::none())
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Fetch a CSRF token, establishing the session cookie on `client`.
#[allow(dead_code)]
pub async fn csrf_token(client: &reqwest::Client, server: &TestServer) -> String {
    let body: serde_json::Value = client
        .get(server.url("/csrf-token"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    body["token"].as_str().unwrap().to_string()
}

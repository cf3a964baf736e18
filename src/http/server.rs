//! HTTP server setup.
//!
//! # Responsibilities
//! - Merge the application, pipeline and admin routers
//! - Wrap them in the security pipeline
//! - Serve plain HTTP, plus TLS when a certificate is configured
//! - Drain both listeners when the shutdown coordinator fires

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{Extension, Router};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;

use crate::admin::admin_router;
use crate::config::TlsConfig;
use crate::lifecycle::Shutdown;
use crate::security::pipeline::SecurityPipeline;
use crate::security::transport::DirectTls;

/// Time the TLS listener is given to finish in-flight requests.
const TLS_DRAIN: Duration = Duration::from_secs(10);

/// Load TLS configuration from certificate and key files.
pub async fn load_tls_config(cert_path: &Path, key_path: &Path) -> Result<RustlsConfig, std::io::Error> {
    if !cert_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Certificate file not found: {:?}", cert_path),
        ));
    }
    if !key_path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("Private key file not found: {:?}", key_path),
        ));
    }
    RustlsConfig::from_pem_file(cert_path, key_path).await
}

pub struct GuardServer {
    pipeline: Arc<SecurityPipeline>,
    router: Router,
}

impl GuardServer {
    /// Protect `app` with the pipeline. The admin router is mounted when enabled.
    pub fn new(pipeline: Arc<SecurityPipeline>, app: Router) -> Self {
        let app = if pipeline.config.admin.enabled {
            app.merge(admin_router(pipeline.clone()))
        } else {
            app
        };
        let router = pipeline.wrap(app);
        Self { pipeline, router }
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn pipeline(&self) -> &Arc<SecurityPipeline> {
        &self.pipeline
    }

    /// Serve until `shutdown` fires.
    pub async fn run(self, listener: TcpListener, shutdown: Shutdown) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            environment = self.pipeline.config.environment.as_str(),
            "HTTP server starting"
        );

        let tls_task = match self.pipeline.config.listener.tls.clone() {
            Some(tls) => Some(spawn_tls(self.router.clone(), tls, shutdown.clone()).await?),
            None => None,
        };

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.wait().await })
            .await?;

        if let Some(task) = tls_task {
            match task.await {
                Ok(Err(e)) => tracing::error!(error = %e, "TLS listener failed"),
                Err(e) => tracing::error!(error = %e, "TLS listener task panicked"),
                Ok(Ok(())) => {}
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn spawn_tls(
    router: Router,
    tls: TlsConfig,
    shutdown: Shutdown,
) -> Result<tokio::task::JoinHandle<std::io::Result<()>>, std::io::Error> {
    let rustls = load_tls_config(Path::new(&tls.cert_path), Path::new(&tls.key_path)).await?;
    let addr: SocketAddr = tls.bind_address.parse().map_err(|e| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("Invalid TLS bind address {}: {}", tls.bind_address, e),
        )
    })?;

    let handle = axum_server::Handle::new();
    let drain = handle.clone();
    tokio::spawn(async move {
        shutdown.wait().await;
        drain.graceful_shutdown(Some(TLS_DRAIN));
    });

    tracing::info!(address = %addr, "TLS listener starting");
    let app = router
        .layer(Extension(DirectTls))
        .into_make_service_with_connect_info::<SocketAddr>();
    Ok(tokio::spawn(async move {
        axum_server::bind_rustls(addr, rustls)
            .handle(handle)
            .serve(app)
            .await
    }))
}

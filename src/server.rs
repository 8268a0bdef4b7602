//! HTTP server

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{Json, Router, response::IntoResponse, routing::get};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::{Config, ServerConfig};
use crate::issuer::{Issuer, handler::issuer_routes};
use crate::{Error, Result};

/// Build the application router.
///
/// Handlers expect `ConnectInfo<SocketAddr>`, so the router must be served
/// with [`Router::into_make_service_with_connect_info`]. The request deadline
/// is enforced inside the signing handler, not by a layer.
pub fn create_router(issuer: Arc<Issuer>, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .merge(issuer_routes(issuer))
        .layer(RequestBodyLimitLayer::new(config.max_body_size))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
}

/// GET /health
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Certificate signing server
pub struct Server {
    config: Config,
    issuer: Arc<Issuer>,
}

impl Server {
    /// Create a server from configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        let issuer = Arc::new(Issuer::new(&config));
        Self { config, issuer }
    }

    /// Create a server around an already assembled issuer.
    #[must_use]
    pub fn with_issuer(config: Config, issuer: Arc<Issuer>) -> Self {
        Self { config, issuer }
    }

    /// Bind the configured address and serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.config
                .server
                .host
                .parse()
                .map_err(|e| Error::Config(format!("Invalid host: {e}")))?,
            self.config.server.port,
        );
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on an existing listener until `shutdown` completes.
    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let local_addr = listener.local_addr()?;
        self.log_startup(local_addr);

        let app = create_router(Arc::clone(&self.issuer), &self.config.server);

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server shutdown complete");
        Ok(())
    }

    fn log_startup(&self, addr: SocketAddr) {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            address = %addr,
            "Certificate signer listening"
        );
        info!(
            path = %self.config.tokens.path.display(),
            cache_ttl = ?self.config.tokens.cache_ttl,
            "Token store"
        );
        info!(
            program = %self.config.signer.program,
            ca_key = %self.config.signer.ca_key.display(),
            timeout = ?self.config.signer.timeout,
            "Signer"
        );
        info!(
            default_ttl = self.config.policy.default_ttl,
            global_max_ttl = self.config.policy.global_max_ttl,
            "Policy"
        );

        if !addr.ip().is_loopback() {
            warn!(address = %addr, "Listening on a non-loopback address, traffic is plain HTTP");
        }
        if self.config.server.request_timeout <= self.config.signer.timeout {
            warn!(
                request_timeout = ?self.config.server.request_timeout,
                signer_timeout = ?self.config.signer.timeout,
                "Request timeout does not exceed signer timeout; slow signings fail as internal errors"
            );
        }
    }
}

/// Resolves on Ctrl+C or SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_reports_version() {
        let response = health_handler().await.into_response();
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }
}

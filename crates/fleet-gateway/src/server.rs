//! Axum HTTP/WebSocket server wrapper around the composed [`Gateway`].

use std::sync::Arc;
use std::time::Duration;

use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use fleet_common::{Error, Result};

use crate::handlers;
use crate::middleware;
use crate::Gateway;

/// Shared application state threaded through every handler via axum's
/// `State` extractor.
pub type AppState = Arc<Gateway>;

pub struct Server {
    gateway: AppState,
}

impl Server {
    pub fn new(gateway: Gateway) -> Self {
        Self {
            gateway: Arc::new(gateway),
        }
    }

    /// Binds `bind_addr` and serves until a ctrl-c signal is received, at
    /// which point axum stops accepting new connections and drains
    /// in-flight ones before returning.
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let app = self.create_app();

        info!(bind_addr, "starting fleet gateway HTTP server");

        let listener = tokio::net::TcpListener::bind(bind_addr)
            .await
            .map_err(|e| Error::Fatal(format!("failed to bind to {bind_addr}: {e}")))?;

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Fatal(format!("server error: {e}")))?;

        Ok(())
    }

    fn create_app(&self) -> axum::Router {
        let request_timeout = Duration::from_millis(self.gateway.config().gateway.request_timeout_ms);
        let cors = cors_layer(&self.gateway.config().gateway.cors_origins);

        handlers::create_router(self.gateway.clone()).layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors)
                .layer(middleware::RequestIdLayer::new())
                .layer(middleware::RateLimitLayer::new(100, 60))
                .layer(CompressionLayer::new())
                .layer(TimeoutLayer::new(request_timeout)),
        )
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new().allow_origin(parsed).allow_methods(tower_http::cors::Any).allow_headers(tower_http::cors::Any)
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received, draining in-flight requests");
}

//! HTTP server wiring

use crate::routes;
use crate::state::AppState;
use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use shieldscan_engine::Orchestrator;
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};

pub struct ApiServer {
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self {
            state: Arc::new(AppState::new(orchestrator)),
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/scan", post(routes::create_scan))
            .route("/scan/:id", get(routes::get_scan).delete(routes::cancel_scan))
            .route("/scan/:id/findings", get(routes::get_findings))
            .route("/scan/:id/priorities", get(routes::get_priorities))
            .route("/scan/:id/graph", get(routes::get_graph))
            .route("/scans", get(routes::list_scans))
            .route("/history/:target", get(routes::get_history))
            .route("/modules", get(routes::list_modules))
            .route("/health", get(routes::health_check))
            .layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            )
            .layer(
                TraceLayer::new_for_http()
                    .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                    .on_response(DefaultOnResponse::new().level(Level::INFO)),
            )
            .with_state(Arc::clone(&self.state))
    }

    /// Bind `addr` and serve until `shutdown` resolves
    pub async fn run<F>(self, addr: &str, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {}", addr))?;
        self.serve(listener, shutdown).await
    }

    pub async fn serve<F>(self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let addr = listener.local_addr().context("listener has no local address")?;
        let app = self.router();
        info!(%addr, "ShieldScan API listening");
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("API server terminated")?;
        info!("ShieldScan API stopped");
        Ok(())
    }
}

//! Route handlers
//!
//! Handlers are thin: every decision lives in the orchestrator, these only
//! translate between HTTP and engine calls.

use crate::error::ApiError;
use crate::state::AppState;
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use shieldscan_core::{Finding, Scan, ScanStatus, ScoreHistoryEntry};
use shieldscan_engine::{ModuleInfo, ScanRequest};
use shieldscan_vuln::{AttackGraph, PriorityReport};
use std::sync::Arc;
use tracing::info;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// `POST /scan` response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub scan_id: String,
    pub status: ScanStatus,
    /// The scan was already in flight for this target
    pub existing: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub scans_in_flight: usize,
}

pub async fn create_scan(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let Json(request) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    info!(target = %request.target, "scan requested");

    let submission = state.orchestrator.submit(request).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            scan_id: submission.scan.id,
            status: submission.scan.status,
            existing: submission.existing,
        }),
    ))
}

pub async fn get_scan(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> ApiResult<Scan> {
    Ok(Json(state.orchestrator.scan(&id).await?))
}

/// Cancel if still queued/running; otherwise return the scan unchanged
pub async fn cancel_scan(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Scan> {
    Ok(Json(state.orchestrator.cancel(&id).await?))
}

pub async fn get_findings(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<Finding>> {
    Ok(Json(state.orchestrator.findings(&id).await?))
}

pub async fn list_scans(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Scan>> {
    Ok(Json(state.orchestrator.list_scans().await?))
}

/// CIDR targets arrive percent-encoded (`10.0.0.0%2F24`)
pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(target): Path<String>,
) -> ApiResult<Vec<ScoreHistoryEntry>> {
    Ok(Json(state.orchestrator.history(&target).await?))
}

pub async fn list_modules(State(state): State<Arc<AppState>>) -> Json<Vec<ModuleInfo>> {
    Json(state.orchestrator.catalog())
}

pub async fn get_priorities(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<PriorityReport> {
    Ok(Json(state.orchestrator.priorities(&id).await?))
}

pub async fn get_graph(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<AttackGraph> {
    Ok(Json(state.orchestrator.graph(&id).await?))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        scans_in_flight: state.orchestrator.in_flight().await,
    })
}

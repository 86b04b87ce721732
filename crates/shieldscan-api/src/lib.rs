//! ShieldScan API - REST surface over the scan orchestrator
//!
//! Routes:
//! - `POST /scan`, `GET /scans`
//! - `GET|DELETE /scan/:id`, `GET /scan/:id/{findings,priorities,graph}`
//! - `GET /history/:target`, `GET /modules`, `GET /health`

pub mod error;
pub mod routes;
pub mod server;
pub mod state;

pub use error::{ApiError, ApiErrorResponse};
pub use routes::{HealthResponse, SubmitResponse};
pub use server::ApiServer;
pub use state::AppState;

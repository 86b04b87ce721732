//! API error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use shieldscan_core::Error;

/// Body of every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiErrorResponse {
    /// HTTP status code
    pub status: u16,

    /// Stable error code, e.g. `INVALID_TARGET`
    pub error: String,

    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request body could not be decoded
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Engine(#[from] Error),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Engine(e) if e.is_validation() => StatusCode::BAD_REQUEST,
            ApiError::Engine(Error::ScanNotFound { .. }) => StatusCode::NOT_FOUND,
            ApiError::Engine(Error::DuplicateScan { .. }) => StatusCode::CONFLICT,
            ApiError::Engine(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Engine(e) => e.code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = ApiErrorResponse {
            status: status.as_u16(),
            error: self.error_code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ApiError::from(Error::InvalidTarget("x".into())), 400, "INVALID_TARGET"),
            (ApiError::from(Error::UnknownModule { name: "owasp".into() }), 400, "UNKNOWN_MODULE"),
            (ApiError::from(Error::ScanNotFound { scan_id: "s".into() }), 404, "SCAN_NOT_FOUND"),
            (
                ApiError::from(Error::DuplicateScan {
                    target: "10.0.0.1".into(),
                    scan_id: "s".into(),
                }),
                409,
                "DUPLICATE_SCAN",
            ),
            (ApiError::from(Error::Store("disk full".into())), 500, "STORE_ERROR"),
            (ApiError::BadRequest("expected value".into()), 400, "BAD_REQUEST"),
        ];
        for (error, status, code) in cases {
            assert_eq!(error.status_code().as_u16(), status);
            assert_eq!(error.error_code(), code);
        }
    }
}

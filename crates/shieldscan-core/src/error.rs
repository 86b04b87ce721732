//! Error types for the ShieldScan engine

use thiserror::Error;

/// Result type alias using ShieldScan Error
pub type Result<T> = std::result::Result<T, Error>;

/// ShieldScan error types
#[derive(Error, Debug)]
pub enum Error {
    // === Validation Errors (never stored) ===
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Target type mismatch: '{target}' is not a valid {expected}")]
    TargetTypeMismatch { target: String, expected: String },

    #[error("DNS resolution failed for: {hostname}")]
    DnsResolutionFailed { hostname: String },

    #[error("Unknown module: {name}")]
    UnknownModule { name: String },

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Scan already in flight for target {target}: {scan_id}")]
    DuplicateScan { target: String, scan_id: String },

    // === Lifecycle Errors ===
    #[error("Scan not found: {scan_id}")]
    ScanNotFound { scan_id: String },

    #[error("Invalid state transition for scan {scan_id}: {from} -> {to}")]
    InvalidTransition {
        scan_id: String,
        from: String,
        to: String,
    },

    // === Storage Errors ===
    #[error("Store error: {0}")]
    Store(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    // === IO / Serialization ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error was caused by bad client input.
    ///
    /// Validation errors are rejected before any scan record exists.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::InvalidTarget(_)
                | Error::TargetTypeMismatch { .. }
                | Error::DnsResolutionFailed { .. }
                | Error::UnknownModule { .. }
                | Error::Validation(_)
        )
    }

    /// Get an error code for logging and API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidTarget(_) => "INVALID_TARGET",
            Error::TargetTypeMismatch { .. } => "TARGET_TYPE_MISMATCH",
            Error::DnsResolutionFailed { .. } => "DNS_FAILED",
            Error::UnknownModule { .. } => "UNKNOWN_MODULE",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::DuplicateScan { .. } => "DUPLICATE_SCAN",
            Error::ScanNotFound { .. } => "SCAN_NOT_FOUND",
            Error::InvalidTransition { .. } => "INVALID_TRANSITION",
            Error::Store(_) => "STORE_ERROR",
            Error::Configuration(_) => "CONFIG_ERROR",
            Error::InvalidConfig { .. } => "INVALID_CONFIG",
            Error::Io(_) => "IO_ERROR",
            Error::Json(_) => "JSON_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(Error::InvalidTarget("x".into()).is_validation());
        assert!(Error::UnknownModule { name: "foo".into() }.is_validation());
        assert!(!Error::Store("disk full".into()).is_validation());
        assert!(!Error::DuplicateScan {
            target: "10.0.0.10".into(),
            scan_id: "abc".into(),
        }
        .is_validation());
    }

    #[test]
    fn test_error_codes() {
        let err = Error::ScanNotFound {
            scan_id: "abc".into(),
        };
        assert_eq!(err.code(), "SCAN_NOT_FOUND");
        assert_eq!(err.to_string(), "Scan not found: abc");
    }
}

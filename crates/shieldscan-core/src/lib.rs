//! ShieldScan Core - Foundation types, traits, and error handling
//!
//! This crate provides the core abstractions used throughout the ShieldScan engine:
//! - `ScanTarget`: What to scan (IP, domain, CIDR), validated and resolvable
//! - `Scan`: One scan run and its lifecycle state machine
//! - `Finding`: An issue discovered by a probe module
//! - `ProbeModule`: The contract every probe module implements
//! - `Severity`, `Grade`, etc.: Core enums

pub mod cancel;
pub mod error;
pub mod finding;
pub mod module;
pub mod scan;
pub mod severity;
pub mod target;

// Re-export commonly used types at crate root
pub use cancel::{CancelHandle, CancelSignal};
pub use error::{Error, Result};
pub use finding::{Finding, FindingBuilder};
pub use module::{Intrusiveness, ModuleError, ModuleResult, ProbeModule, ScanProfile};
pub use scan::{
    Grade, ModuleScore, Scan, ScanDepth, ScanOutcome, ScanStatus, ScoreHistoryEntry, Sensitivity,
};
pub use severity::Severity;
pub use target::{ScanTarget, TargetType};

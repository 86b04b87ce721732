//! ShieldScan Engine - scan orchestration, scoring and storage
//!
//! Ties the probe modules together:
//! - `ModuleRegistry`: the named modules a scan can enable, with their weights
//! - `Orchestrator`: validates submissions and drives each scan to a terminal state
//! - `scorer`: Shield Score and grade from the per-module results
//! - `ScanStore`: scan, finding and score-history persistence (memory or SQLite)

pub mod feed;
pub mod orchestrator;
pub mod registry;
pub mod scorer;
pub mod sqlite;
pub mod store;

pub use feed::{load_assets, parse_assets, seed_targets, Asset};
pub use orchestrator::{Orchestrator, ScanRequest, Submission, RESTART_REASON};
pub use registry::{default_registry, ModuleInfo, ModuleRegistry};
pub use scorer::{ModuleReport, ScoreCard};
pub use sqlite::SqliteStore;
pub use store::{MemoryStore, ScanStore};

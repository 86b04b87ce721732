//! ShieldScan Common - Shared utilities: configuration and logging
//!
//! This crate provides common functionality used across all ShieldScan crates.

pub mod config;
pub mod logging;

pub use config::{Config, ConfigBuilder, DuplicatePolicy, WeightTable};
pub use logging::{init_logging, init_logging_with_config, LogConfig, LogFormat};

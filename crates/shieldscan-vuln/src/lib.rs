//! ShieldScan Vuln - Known-vulnerability matching and finding prioritization
//!
//! This crate provides:
//! - The `VulnerabilityLookup` contract with static-feed and REST implementations
//! - Version-range matching for feed entries
//! - The `cve` probe module
//! - The Prioritizer (exploitability quadrants, remediation labels)
//! - The attack-surface graph (port → service → CVE)

pub mod cve;
pub mod graph;
pub mod lookup;
pub mod matcher;
pub mod prioritize;

pub use cve::{CveModule, ServiceMatch};
pub use graph::{AttackGraph, GraphEdge, GraphNode, NodeKind};
pub use lookup::{
    FeedEntry, LookupError, RestLookup, ServiceFingerprint, StaticFeed, VulnRecord,
    VulnerabilityLookup,
};
pub use matcher::{compare_versions, VersionRange};
pub use prioritize::{
    prioritize, Effort, ExploitQuadrant, ExploitabilityReport, Impact, PriorityReport,
    RankedFinding, RemediationItem, RemediationLabel,
};

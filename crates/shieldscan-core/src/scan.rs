//! Scan records and the scan lifecycle state machine

use crate::error::{Error, Result};
use crate::module::Intrusiveness;
use crate::target::TargetType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle state of a scan: `queued -> running -> {completed | failed}`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Queued => "queued",
            ScanStatus::Running => "running",
            ScanStatus::Completed => "completed",
            ScanStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(ScanStatus::Queued),
            "running" => Some(ScanStatus::Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" => Some(ScanStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Failed)
    }
}

impl std::fmt::Display for ScanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scan breadth; drives the port set and the per-module time budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanDepth {
    Quick,
    #[default]
    Standard,
    Deep,
}

impl ScanDepth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanDepth::Quick => "quick",
            ScanDepth::Standard => "standard",
            ScanDepth::Deep => "deep",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quick" => Some(ScanDepth::Quick),
            "standard" => Some(ScanDepth::Standard),
            "deep" => Some(ScanDepth::Deep),
            _ => None,
        }
    }
}

/// How careful probes must be with the target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    /// All non-destructive checks
    #[default]
    Safe,
    /// No exploit-adjacent probes
    Cautious,
    /// Passive checks only
    Fragile,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Safe => "safe",
            Sensitivity::Cautious => "cautious",
            Sensitivity::Fragile => "fragile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "safe" => Some(Sensitivity::Safe),
            "cautious" => Some(Sensitivity::Cautious),
            "fragile" => Some(Sensitivity::Fragile),
            _ => None,
        }
    }

    /// Whether a module of the given intrusiveness may run at this sensitivity
    pub fn permits(&self, level: Intrusiveness) -> bool {
        match self {
            Sensitivity::Safe => true,
            Sensitivity::Cautious => level != Intrusiveness::Intrusive,
            Sensitivity::Fragile => level == Intrusiveness::Passive,
        }
    }
}

/// Letter grade derived from the Shield Score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    #[serde(rename = "B+")]
    BPlus,
    B,
    #[serde(rename = "C+")]
    CPlus,
    C,
    D,
    F,
}

impl Grade {
    /// Map a 0-100 score to a grade. Each band includes its lower bound.
    pub fn from_score(score: f64) -> Self {
        match score {
            s if s >= 95.0 => Grade::APlus,
            s if s >= 90.0 => Grade::A,
            s if s >= 85.0 => Grade::BPlus,
            s if s >= 75.0 => Grade::B,
            s if s >= 70.0 => Grade::CPlus,
            s if s >= 60.0 => Grade::C,
            s if s >= 40.0 => Grade::D,
            _ => Grade::F,
        }
    }

    /// Numeric rank, higher is better
    pub fn rank(&self) -> u8 {
        match self {
            Grade::APlus => 7,
            Grade::A => 6,
            Grade::BPlus => 5,
            Grade::B => 4,
            Grade::CPlus => 3,
            Grade::C => 2,
            Grade::D => 1,
            Grade::F => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::BPlus => "B+",
            Grade::B => "B",
            Grade::CPlus => "C+",
            Grade::C => "C",
            Grade::D => "D",
            Grade::F => "F",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A+" => Some(Grade::APlus),
            "A" => Some(Grade::A),
            "B+" => Some(Grade::BPlus),
            "B" => Some(Grade::B),
            "C+" => Some(Grade::CPlus),
            "C" => Some(Grade::C),
            "D" => Some(Grade::D),
            "F" => Some(Grade::F),
            _ => None,
        }
    }
}

impl std::fmt::Display for Grade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Per-module breakdown stored on a scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleScore {
    pub score: f64,
    pub weight: f64,
    pub total_checks: u32,
    pub passed_checks: u32,
    pub findings_count: u32,
    /// Set when the module did not complete
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated results written onto a scan when it reaches a terminal state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    pub total_checks: u32,
    pub passed_checks: u32,
    pub failed_checks: u32,
    pub warning_checks: u32,
    pub module_scores: BTreeMap<String, ModuleScore>,
}

/// One scan run against one target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    pub id: String,
    pub target: String,
    pub target_type: TargetType,
    pub status: ScanStatus,
    pub scan_depth: ScanDepth,
    pub sensitivity: Sensitivity,
    /// Module names in request order
    pub modules_enabled: Vec<String>,
    /// Enabled modules not permitted at this sensitivity
    #[serde(default)]
    pub modules_skipped: Vec<String>,

    pub shield_score: Option<f64>,
    pub grade: Option<Grade>,

    pub total_checks: u32,
    pub passed_checks: u32,
    pub failed_checks: u32,
    pub warning_checks: u32,
    pub module_scores: BTreeMap<String, ModuleScore>,

    /// Human-readable reason, set iff status is failed
    pub failure_reason: Option<String>,
    /// Failed by cancellation rather than by a fault
    #[serde(default)]
    pub cancelled: bool,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Scan {
    /// Create a new queued scan
    pub fn new(
        target: impl Into<String>,
        target_type: TargetType,
        scan_depth: ScanDepth,
        sensitivity: Sensitivity,
        modules_enabled: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            target: target.into(),
            target_type,
            status: ScanStatus::Queued,
            scan_depth,
            sensitivity,
            modules_enabled,
            modules_skipped: Vec::new(),
            shield_score: None,
            grade: None,
            total_checks: 0,
            passed_checks: 0,
            failed_checks: 0,
            warning_checks: 0,
            module_scores: BTreeMap::new(),
            failure_reason: None,
            cancelled: false,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Modules that will actually be dispatched
    pub fn modules_to_run(&self) -> impl Iterator<Item = &String> {
        self.modules_enabled
            .iter()
            .filter(|m| !self.modules_skipped.contains(m))
    }

    /// `queued -> running`
    pub fn mark_running(&mut self) -> Result<()> {
        self.ensure(ScanStatus::Queued, ScanStatus::Running)?;
        self.status = ScanStatus::Running;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// `running -> completed`
    pub fn mark_completed(&mut self, shield_score: f64, outcome: ScanOutcome) -> Result<()> {
        self.ensure(ScanStatus::Running, ScanStatus::Completed)?;
        self.apply_outcome(outcome);
        let score = shield_score.clamp(0.0, 100.0);
        self.shield_score = Some(score);
        self.grade = Some(Grade::from_score(score));
        self.status = ScanStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// `{queued, running} -> failed`, keeping whatever partial results exist
    pub fn mark_failed(&mut self, reason: impl Into<String>, partial: Option<ScanOutcome>) -> Result<()> {
        if self.is_terminal() {
            return Err(self.transition_error(ScanStatus::Failed));
        }
        if let Some(outcome) = partial {
            self.apply_outcome(outcome);
        }
        let now = Utc::now();
        // A scan failed straight out of the queue still passed through "running"
        // as far as timestamps go.
        self.started_at.get_or_insert(now);
        self.status = ScanStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.shield_score = None;
        self.grade = None;
        self.completed_at = Some(now);
        Ok(())
    }

    /// Cancellation is a failed transition with a marker
    pub fn mark_cancelled(&mut self) -> Result<()> {
        self.mark_failed("cancelled by request", None)?;
        self.cancelled = true;
        Ok(())
    }

    fn apply_outcome(&mut self, outcome: ScanOutcome) {
        self.total_checks = outcome.total_checks;
        self.passed_checks = outcome.passed_checks;
        self.failed_checks = outcome.failed_checks;
        self.warning_checks = outcome.warning_checks;
        self.module_scores = outcome.module_scores;
    }

    fn ensure(&self, from: ScanStatus, to: ScanStatus) -> Result<()> {
        if self.status != from {
            return Err(self.transition_error(to));
        }
        Ok(())
    }

    fn transition_error(&self, to: ScanStatus) -> Error {
        Error::InvalidTransition {
            scan_id: self.id.clone(),
            from: self.status.to_string(),
            to: to.to_string(),
        }
    }
}

/// Immutable snapshot appended once per completed scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub target: String,
    pub scan_id: String,
    pub score: f64,
    pub grade: Grade,
    pub module_scores: BTreeMap<String, f64>,
    pub scanned_at: DateTime<Utc>,
}

impl ScoreHistoryEntry {
    /// Snapshot a completed scan; `None` for any other state
    pub fn from_scan(scan: &Scan) -> Option<Self> {
        if scan.status != ScanStatus::Completed {
            return None;
        }
        Some(Self {
            target: scan.target.clone(),
            scan_id: scan.id.clone(),
            score: scan.shield_score?,
            grade: scan.grade?,
            module_scores: scan
                .module_scores
                .iter()
                .map(|(name, m)| (name.clone(), m.score))
                .collect(),
            scanned_at: scan.completed_at?,
        })
    }
}

/// Default per-module time budget for a depth (overridable in config)
pub fn default_module_timeout(depth: ScanDepth) -> Duration {
    match depth {
        ScanDepth::Quick => Duration::from_secs(30),
        ScanDepth::Standard => Duration::from_secs(120),
        ScanDepth::Deep => Duration::from_secs(600),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued() -> Scan {
        Scan::new(
            "10.0.0.10",
            TargetType::Ip,
            ScanDepth::Quick,
            Sensitivity::Safe,
            vec!["tls".into(), "ports".into()],
        )
    }

    #[test]
    fn test_grade_boundaries() {
        let table = [
            (100.0, Grade::APlus),
            (95.0, Grade::APlus),
            (94.999, Grade::A),
            (90.0, Grade::A),
            (89.999, Grade::BPlus),
            (85.0, Grade::BPlus),
            (84.999, Grade::B),
            (75.0, Grade::B),
            (74.999, Grade::CPlus),
            (70.0, Grade::CPlus),
            (69.999, Grade::C),
            (60.0, Grade::C),
            (59.999, Grade::D),
            (40.0, Grade::D),
            (39.999, Grade::F),
            (0.0, Grade::F),
        ];
        for (score, grade) in table {
            assert_eq!(Grade::from_score(score), grade, "score {}", score);
        }
    }

    #[test]
    fn test_grade_serde_names() {
        assert_eq!(serde_json::to_string(&Grade::APlus).unwrap(), "\"A+\"");
        assert_eq!(Grade::parse("C+"), Some(Grade::CPlus));
        assert!(Grade::A.rank() > Grade::BPlus.rank());
    }

    #[test]
    fn test_lifecycle_timestamps() {
        let mut scan = queued();
        assert!(scan.started_at.is_none());
        assert!(scan.shield_score.is_none());

        scan.mark_running().unwrap();
        assert!(scan.started_at.is_some());
        assert!(scan.completed_at.is_none());

        scan.mark_completed(87.5, ScanOutcome::default()).unwrap();
        assert_eq!(scan.status, ScanStatus::Completed);
        assert_eq!(scan.grade, Some(Grade::BPlus));
        assert!(scan.completed_at.is_some());
    }

    #[test]
    fn test_terminal_is_immutable() {
        let mut scan = queued();
        scan.mark_running().unwrap();
        scan.mark_completed(50.0, ScanOutcome::default()).unwrap();
        let completed_at = scan.completed_at;

        assert!(scan.mark_cancelled().is_err());
        assert!(scan.mark_failed("late", None).is_err());
        assert!(scan.mark_running().is_err());
        assert_eq!(scan.completed_at, completed_at);
        assert_eq!(scan.status, ScanStatus::Completed);
    }

    #[test]
    fn test_cancel_from_queue() {
        let mut scan = queued();
        scan.mark_cancelled().unwrap();
        assert_eq!(scan.status, ScanStatus::Failed);
        assert!(scan.cancelled);
        assert!(scan.started_at.is_some());
        assert!(scan.completed_at.is_some());
        assert!(scan.shield_score.is_none());
        assert!(scan.failure_reason.is_some());
    }

    #[test]
    fn test_sensitivity_gating() {
        assert!(Sensitivity::Safe.permits(Intrusiveness::Intrusive));
        assert!(Sensitivity::Cautious.permits(Intrusiveness::Active));
        assert!(!Sensitivity::Cautious.permits(Intrusiveness::Intrusive));
        assert!(Sensitivity::Fragile.permits(Intrusiveness::Passive));
        assert!(!Sensitivity::Fragile.permits(Intrusiveness::Active));
    }

    #[test]
    fn test_history_only_from_completed() {
        let mut scan = queued();
        assert!(ScoreHistoryEntry::from_scan(&scan).is_none());
        scan.mark_running().unwrap();
        scan.mark_completed(99.0, ScanOutcome::default()).unwrap();
        let entry = ScoreHistoryEntry::from_scan(&scan).unwrap();
        assert_eq!(entry.grade, Grade::APlus);
        assert_eq!(entry.scan_id, scan.id);
    }
}

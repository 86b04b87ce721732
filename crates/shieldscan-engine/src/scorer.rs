//! Shield Score aggregation
//!
//! Pure functions: the same module reports always produce the same score
//! and grade.

use serde_json::json;
use shieldscan_core::{Finding, Grade, ModuleResult, ModuleScore, ScanOutcome, Severity};
use std::collections::BTreeMap;

/// What one dispatched module came back with
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub module: String,
    pub weight: f64,
    /// `Err` carries the module error text
    pub result: Result<ModuleResult, String>,
}

impl ModuleReport {
    pub fn completed(module: impl Into<String>, weight: f64, result: ModuleResult) -> Self {
        Self {
            module: module.into(),
            weight,
            result: Ok(result),
        }
    }

    pub fn errored(module: impl Into<String>, weight: f64, error: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            weight,
            result: Err(error.into()),
        }
    }

    pub fn is_error(&self) -> bool {
        self.result.is_err()
    }
}

/// Scorer output
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCard {
    pub shield_score: f64,
    pub grade: Grade,
    pub outcome: ScanOutcome,
}

/// Weighted mean of module scores over the modules present.
///
/// Weights are normalized before multiplying, so a single module comes back
/// with exactly its own score. `None` when there is nothing to weigh.
pub fn weighted_score(scores: &BTreeMap<String, ModuleScore>) -> Option<f64> {
    let total_weight: f64 = scores.values().map(|m| m.weight).sum();
    if scores.is_empty() || total_weight <= 0.0 {
        return None;
    }
    let score = scores
        .values()
        .map(|m| (m.weight / total_weight) * m.score)
        .sum::<f64>();
    Some(score.clamp(0.0, 100.0))
}

/// Per-module breakdown and check totals. An errored module scores 0 and
/// counts as one failed check; its weight stays in the denominator.
pub fn outcome(reports: &[ModuleReport]) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();

    for report in reports {
        let entry = match &report.result {
            Ok(result) => {
                outcome.total_checks += result.checks_total;
                outcome.passed_checks += result.checks_passed;
                outcome.warning_checks += result.checks_warning;
                outcome.failed_checks += result.checks_failed();
                ModuleScore {
                    score: result.score.clamp(0.0, 100.0),
                    weight: report.weight,
                    total_checks: result.checks_total,
                    passed_checks: result.checks_passed,
                    findings_count: result.findings.len() as u32,
                    error: None,
                }
            }
            Err(error) => {
                outcome.total_checks += 1;
                outcome.failed_checks += 1;
                ModuleScore {
                    score: 0.0,
                    weight: report.weight,
                    total_checks: 1,
                    passed_checks: 0,
                    findings_count: 1,
                    error: Some(error.clone()),
                }
            }
        };
        outcome.module_scores.insert(report.module.clone(), entry);
    }

    outcome
}

/// Score a finished set of module reports
pub fn score(reports: &[ModuleReport]) -> ScoreCard {
    let outcome = outcome(reports);
    let shield_score = weighted_score(&outcome.module_scores).unwrap_or(0.0);
    ScoreCard {
        shield_score,
        grade: Grade::from_score(shield_score),
        outcome,
    }
}

/// The single finding recorded for a module that did not complete
pub fn module_error_finding(module: &str, error: &str) -> Finding {
    Finding::builder(module, Severity::High, "Module did not complete")
        .description(format!(
            "The {} module could not run to completion: {}. Its checks were not evaluated and it scores 0.",
            module, error
        ))
        .remediation("Confirm the target is reachable from the scanner and re-run the scan.")
        .evidence(json!({ "module": module, "error": error }))
        .build()
}

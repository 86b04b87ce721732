//! Finding prioritization
//!
//! Two independent, deterministic rankings over a scan's findings:
//! - exploitability quadrants from CVSS × EPSS, with CISA KEV findings
//!   pulled to the front and listed separately
//! - remediation effort/impact labels for every finding with a remediation

use serde::{Deserialize, Serialize};
use shieldscan_core::{Finding, Severity};
use uuid::Uuid;

pub const CVSS_THRESHOLD: f32 = 5.0;
pub const EPSS_THRESHOLD: f32 = 0.5;

const CVSS_BLEND: f64 = 0.6;
const EPSS_BLEND: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExploitQuadrant {
    /// High CVSS, high EPSS
    Urgent,
    /// Low CVSS, high EPSS
    Monitor,
    /// High CVSS, low EPSS
    Plan,
    Low,
}

impl ExploitQuadrant {
    pub fn classify(cvss: f32, epss: f32) -> Self {
        match (cvss >= CVSS_THRESHOLD, epss >= EPSS_THRESHOLD) {
            (true, true) => ExploitQuadrant::Urgent,
            (false, true) => ExploitQuadrant::Monitor,
            (true, false) => ExploitQuadrant::Plan,
            (false, false) => ExploitQuadrant::Low,
        }
    }
}

/// A CVE finding placed in an exploitability quadrant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RankedFinding {
    pub finding_id: Uuid,
    pub cve_id: Option<String>,
    pub title: String,
    pub severity: Severity,
    pub cvss_score: f32,
    pub epss_score: f32,
    pub cisa_kev: bool,
    /// `0.6 × cvss/10 + 0.4 × epss`
    pub priority: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExploitabilityReport {
    pub urgent: Vec<RankedFinding>,
    pub monitor: Vec<RankedFinding>,
    pub plan: Vec<RankedFinding>,
    pub low: Vec<RankedFinding>,
    /// CISA KEV findings, in input order, whatever their quadrant
    pub kev: Vec<Uuid>,
    /// CVE findings left out for lack of a CVSS or EPSS score
    pub excluded: usize,
}

impl ExploitabilityReport {
    pub fn quadrant(&self, quadrant: ExploitQuadrant) -> &[RankedFinding] {
        match quadrant {
            ExploitQuadrant::Urgent => &self.urgent,
            ExploitQuadrant::Monitor => &self.monitor,
            ExploitQuadrant::Plan => &self.plan,
            ExploitQuadrant::Low => &self.low,
        }
    }

    pub fn ranked_count(&self) -> usize {
        self.urgent.len() + self.monitor.len() + self.plan.len() + self.low.len()
    }
}

/// Bucket CVE findings by `(cvss ≥ 5, epss ≥ 0.5)`.
///
/// Within a quadrant KEV findings come first, then blended priority
/// descending; ties keep input order.
pub fn exploitability(findings: &[Finding]) -> ExploitabilityReport {
    let mut report = ExploitabilityReport::default();

    for finding in findings.iter().filter(|f| f.cve_id.is_some()) {
        let kev = finding.is_kev();
        if kev {
            report.kev.push(finding.id);
        }
        let (Some(cvss), Some(epss)) = (finding.cvss_score, finding.epss_score) else {
            report.excluded += 1;
            continue;
        };

        let ranked = RankedFinding {
            finding_id: finding.id,
            cve_id: finding.cve_id.clone(),
            title: finding.title.clone(),
            severity: finding.severity,
            cvss_score: cvss,
            epss_score: epss,
            cisa_kev: kev,
            priority: CVSS_BLEND * f64::from(cvss) / 10.0 + EPSS_BLEND * f64::from(epss),
        };
        match ExploitQuadrant::classify(cvss, epss) {
            ExploitQuadrant::Urgent => report.urgent.push(ranked),
            ExploitQuadrant::Monitor => report.monitor.push(ranked),
            ExploitQuadrant::Plan => report.plan.push(ranked),
            ExploitQuadrant::Low => report.low.push(ranked),
        }
    }

    for bucket in [
        &mut report.urgent,
        &mut report.monitor,
        &mut report.plan,
        &mut report.low,
    ] {
        // sort_by is stable
        bucket.sort_by(|a, b| {
            b.cisa_kev
                .cmp(&a.cisa_kev)
                .then_with(|| b.priority.total_cmp(&a.priority))
        });
    }
    report
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

impl Effort {
    /// Static per-module classification
    pub fn for_module(module: &str) -> Self {
        match module {
            "headers" | "dns" | "tls" => Effort::Low,
            "cve" | "owasp" => Effort::High,
            _ => Effort::Medium,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Impact {
    High,
    Low,
}

impl Impact {
    pub fn for_severity(severity: Severity) -> Self {
        if severity.is_high_impact() {
            Impact::High
        } else {
            Impact::Low
        }
    }
}

/// Declared in output order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RemediationLabel {
    #[serde(rename = "Quick Win")]
    QuickWin,
    #[serde(rename = "Important")]
    Important,
    #[serde(rename = "Nice to Have")]
    NiceToHave,
    #[serde(rename = "Deprioritize")]
    Deprioritize,
}

impl RemediationLabel {
    pub fn classify(impact: Impact, effort: Effort) -> Self {
        match (impact, effort) {
            (Impact::High, Effort::Low) => RemediationLabel::QuickWin,
            (Impact::High, _) => RemediationLabel::Important,
            (Impact::Low, Effort::Low | Effort::Medium) => RemediationLabel::NiceToHave,
            (Impact::Low, Effort::High) => RemediationLabel::Deprioritize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationLabel::QuickWin => "Quick Win",
            RemediationLabel::Important => "Important",
            RemediationLabel::NiceToHave => "Nice to Have",
            RemediationLabel::Deprioritize => "Deprioritize",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemediationItem {
    pub finding_id: Uuid,
    pub module: String,
    pub title: String,
    pub severity: Severity,
    pub remediation: String,
    pub impact: Impact,
    pub effort: Effort,
    pub label: RemediationLabel,
}

/// Label every finding that carries a remediation, ordered Quick Win,
/// Important, Nice to Have, Deprioritize; stable within a label.
pub fn remediation_plan(findings: &[Finding]) -> Vec<RemediationItem> {
    let mut items: Vec<RemediationItem> = findings
        .iter()
        .filter_map(|f| {
            let remediation = f.remediation.as_deref().filter(|r| !r.trim().is_empty())?;
            let impact = Impact::for_severity(f.severity);
            let effort = Effort::for_module(&f.module);
            Some(RemediationItem {
                finding_id: f.id,
                module: f.module.clone(),
                title: f.title.clone(),
                severity: f.severity,
                remediation: remediation.to_string(),
                impact,
                effort,
                label: RemediationLabel::classify(impact, effort),
            })
        })
        .collect();
    items.sort_by_key(|item| item.label);
    items
}

/// Both rankings for one scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriorityReport {
    pub exploitability: ExploitabilityReport,
    pub remediation: Vec<RemediationItem>,
}

pub fn prioritize(findings: &[Finding]) -> PriorityReport {
    PriorityReport {
        exploitability: exploitability(findings),
        remediation: remediation_plan(findings),
    }
}

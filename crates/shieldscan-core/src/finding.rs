//! Finding definitions - issues discovered by probe modules during a scan

use crate::severity::Severity;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One issue discovered by one module during one scan.
///
/// Findings are created once and never mutated after they are stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Unique finding ID
    pub id: Uuid,

    /// Owning scan (stamped by the orchestrator)
    pub scan_id: String,

    /// Module that produced this finding
    pub module: String,

    /// Finding details
    pub severity: Severity,
    pub title: String,
    pub description: String,
    /// Templated remediation text
    pub remediation: Option<String>,

    /// Affected endpoint; port is absent for host-wide findings
    pub target_ip: Option<String>,
    pub target_port: Option<u16>,

    /// Lower-cased fingerprinted service name, when known
    pub service: Option<String>,

    /// Raw probe output, displayed but never interpreted
    #[serde(default)]
    pub evidence: serde_json::Value,

    /// Vulnerability enrichment (populated only for CVE matches)
    pub cve_id: Option<String>,
    pub cvss_score: Option<f32>,
    pub epss_score: Option<f32>,
    pub cisa_kev: Option<bool>,
    pub attack_technique: Option<String>,
    pub attack_tactic: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl Finding {
    /// Create a new finding builder
    pub fn builder(module: impl Into<String>, severity: Severity, title: impl Into<String>) -> FindingBuilder {
        FindingBuilder::new(module, severity, title)
    }

    /// Whether this finding carries both exploitability scores
    pub fn has_exploit_scores(&self) -> bool {
        self.cvss_score.is_some() && self.epss_score.is_some()
    }

    pub fn is_kev(&self) -> bool {
        self.cisa_kev.unwrap_or(false)
    }
}

/// Builder for constructing findings
pub struct FindingBuilder {
    finding: Finding,
}

impl FindingBuilder {
    pub fn new(module: impl Into<String>, severity: Severity, title: impl Into<String>) -> Self {
        Self {
            finding: Finding {
                id: Uuid::new_v4(),
                scan_id: String::new(),
                module: module.into(),
                severity,
                title: title.into(),
                description: String::new(),
                remediation: None,
                target_ip: None,
                target_port: None,
                service: None,
                evidence: serde_json::Value::Null,
                cve_id: None,
                cvss_score: None,
                epss_score: None,
                cisa_kev: None,
                attack_technique: None,
                attack_tactic: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.finding.description = desc.into();
        self
    }

    pub fn remediation(mut self, remediation: impl Into<String>) -> Self {
        self.finding.remediation = Some(remediation.into());
        self
    }

    pub fn target_ip(mut self, ip: impl ToString) -> Self {
        self.finding.target_ip = Some(ip.to_string());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.finding.target_port = Some(port);
        self
    }

    pub fn service(mut self, service: impl AsRef<str>) -> Self {
        self.finding.service = Some(service.as_ref().to_lowercase());
        self
    }

    pub fn evidence(mut self, evidence: serde_json::Value) -> Self {
        self.finding.evidence = evidence;
        self
    }

    pub fn cve(mut self, cve_id: impl Into<String>) -> Self {
        self.finding.cve_id = Some(cve_id.into());
        self
    }

    pub fn cvss(mut self, score: f32) -> Self {
        self.finding.cvss_score = Some(score.clamp(0.0, 10.0));
        self
    }

    pub fn epss(mut self, probability: f32) -> Self {
        self.finding.epss_score = Some(probability.clamp(0.0, 1.0));
        self
    }

    pub fn cisa_kev(mut self, in_kev: bool) -> Self {
        self.finding.cisa_kev = Some(in_kev);
        self
    }

    pub fn attack(mut self, technique: Option<String>, tactic: Option<String>) -> Self {
        self.finding.attack_technique = technique;
        self.finding.attack_tactic = tactic;
        self
    }

    pub fn build(self) -> Finding {
        self.finding
    }
}

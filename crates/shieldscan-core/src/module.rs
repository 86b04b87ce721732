//! ProbeModule trait - the interface every probe module implements

use crate::cancel::CancelSignal;
use crate::finding::Finding;
use crate::scan::{ScanDepth, Sensitivity};
use crate::target::ScanTarget;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// How much a module touches the target beyond plain observation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Intrusiveness {
    /// Only reads what a normal client would see
    Passive,
    /// Opens connections the target did not ask for (port sweeps, fingerprinting)
    Active,
    /// Exploit-adjacent probing (default credentials and the like)
    Intrusive,
}

/// Reasons a module could not run to completion
#[derive(Error, Debug)]
pub enum ModuleError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("target unreachable: {0}")]
    Unreachable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("vulnerability lookup failed: {0}")]
    Lookup(String),

    #[error("{0}")]
    Other(String),
}

/// Immutable per-scan settings handed to every module invocation
#[derive(Debug, Clone)]
pub struct ScanProfile {
    pub scan_id: String,
    pub depth: ScanDepth,
    pub sensitivity: Sensitivity,

    /// Time budget for the whole module run
    pub timeout: Duration,

    /// Per-connection timeouts for modules doing raw socket work
    pub connect_timeout: Duration,
    pub banner_timeout: Duration,

    /// Upper bound on concurrent sub-probes inside one module
    pub concurrency: usize,

    pub cancel: CancelSignal,
}

impl ScanProfile {
    pub fn new(scan_id: impl Into<String>, depth: ScanDepth, sensitivity: Sensitivity) -> Self {
        Self {
            scan_id: scan_id.into(),
            depth,
            sensitivity,
            timeout: crate::scan::default_module_timeout(depth),
            connect_timeout: Duration::from_millis(1500),
            banner_timeout: Duration::from_millis(1500),
            concurrency: 100,
            cancel: CancelSignal::never(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_socket_timeouts(mut self, connect: Duration, banner: Duration) -> Self {
        self.connect_timeout = connect;
        self.banner_timeout = banner;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = cancel;
        self
    }

    /// Bail out with `ModuleError::Cancelled` if the scan was cancelled
    pub fn check_cancelled(&self) -> Result<(), ModuleError> {
        if self.cancel.is_cancelled() {
            Err(ModuleError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// What a module reports when it ran to completion
#[derive(Debug, Clone, Default)]
pub struct ModuleResult {
    /// 0-100
    pub score: f64,
    pub findings: Vec<Finding>,
    pub checks_total: u32,
    pub checks_passed: u32,
    /// Checks that did not pass but only merit a warning
    pub checks_warning: u32,
}

impl ModuleResult {
    pub fn checks_failed(&self) -> u32 {
        self.checks_total
            .saturating_sub(self.checks_passed)
            .saturating_sub(self.checks_warning)
    }
}

/// The contract every probe module implements.
///
/// Modules must not change state on the target beyond the probe traffic
/// itself, and must honour `profile.timeout` and `profile.cancel`. An error
/// return means the module could not run; "ran and found nothing" is an
/// `Ok` result with no findings.
#[async_trait]
pub trait ProbeModule: Send + Sync {
    /// Unique module name (e.g., "tls")
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Names of the checks this module performs
    fn checks(&self) -> Vec<String>;

    fn intrusiveness(&self) -> Intrusiveness;

    async fn run(
        &self,
        target: &ScanTarget,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<ModuleResult, ModuleError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::severity::Severity;

    struct EchoModule;

    #[async_trait]
    impl ProbeModule for EchoModule {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Reports one finding per resolved address"
        }

        fn checks(&self) -> Vec<String> {
            vec!["reachable".into()]
        }

        fn intrusiveness(&self) -> Intrusiveness {
            Intrusiveness::Passive
        }

        async fn run(
            &self,
            _target: &ScanTarget,
            resolved_ips: &[IpAddr],
            profile: &ScanProfile,
        ) -> Result<ModuleResult, ModuleError> {
            profile.check_cancelled()?;
            let findings = resolved_ips
                .iter()
                .map(|ip| Finding::builder("echo", Severity::Info, "Host seen").target_ip(ip).build())
                .collect::<Vec<_>>();
            Ok(ModuleResult {
                score: 100.0,
                checks_total: findings.len() as u32,
                checks_passed: findings.len() as u32,
                findings,
                checks_warning: 0,
            })
        }
    }

    #[tokio::test]
    async fn test_module_contract() {
        let module = EchoModule;
        let target = ScanTarget::parse("10.0.0.1").unwrap();
        let ips = vec!["10.0.0.1".parse().unwrap()];
        let profile = ScanProfile::new("scan-1", ScanDepth::Quick, Sensitivity::Safe);

        let result = module.run(&target, &ips, &profile).await.unwrap();
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.checks_failed(), 0);
        assert_eq!(profile.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_cancelled_profile_short_circuits() {
        let (handle, signal) = crate::cancel::CancelHandle::new();
        let profile =
            ScanProfile::new("scan-2", ScanDepth::Standard, Sensitivity::Safe).with_cancel(signal);
        handle.cancel();

        let target = ScanTarget::parse("10.0.0.1").unwrap();
        let err = EchoModule.run(&target, &[], &profile).await.unwrap_err();
        assert!(matches!(err, ModuleError::Cancelled));
    }

    #[test]
    fn test_failed_count_saturates() {
        let result = ModuleResult {
            score: 50.0,
            checks_total: 4,
            checks_passed: 2,
            checks_warning: 1,
            ..Default::default()
        };
        assert_eq!(result.checks_failed(), 1);
    }
}

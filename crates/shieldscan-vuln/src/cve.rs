//! The `cve` probe module: service fingerprinting plus known-vulnerability lookup

use crate::lookup::{ServiceFingerprint, VulnRecord, VulnerabilityLookup};
use async_trait::async_trait;
use serde_json::json;
use shieldscan_core::{
    Finding, Intrusiveness, ModuleError, ModuleResult, ProbeModule, ScanDepth, ScanProfile,
    ScanTarget, Severity,
};
use shieldscan_network::port_scan::ports;
use shieldscan_network::{PortScanConfig, PortScanner, ServiceDetector};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info};

pub const MODULE_NAME: &str = "cve";

/// Ports whose banners usually carry a product and version
pub const SERVICE_PORTS: &[u16] = &[
    21, 22, 25, 80, 110, 143, 443, 587, 993, 995, 1433, 1521, 2375, 3000, 3306, 3389, 5000, 5432,
    5900, 6379, 8000, 8080, 8081, 8443, 8888, 9200, 11211, 27017,
];

/// Score deducted per matched CVE
pub fn penalty(severity: Severity) -> f64 {
    match severity {
        Severity::Critical => 25.0,
        Severity::High => 15.0,
        Severity::Medium => 8.0,
        Severity::Low => 3.0,
        Severity::Info => 0.0,
    }
}

fn severity_for(cvss: Option<f32>) -> Severity {
    match cvss {
        Some(score) if score > 0.0 => Severity::from_cvss(score).max(Severity::Low),
        _ => Severity::Info,
    }
}

/// A fingerprinted service and the records the lookup returned for it
#[derive(Debug, Clone)]
pub struct ServiceMatch {
    pub ip: IpAddr,
    pub port: u16,
    pub fingerprint: ServiceFingerprint,
    pub records: Vec<VulnRecord>,
}

/// Fingerprints services and reports the CVEs the lookup knows for them
pub struct CveModule {
    lookup: Arc<dyn VulnerabilityLookup>,
    detector: ServiceDetector,
    ports: Option<Vec<u16>>,
}

impl CveModule {
    pub fn new(lookup: Arc<dyn VulnerabilityLookup>) -> Self {
        Self {
            lookup,
            detector: ServiceDetector::new(),
            ports: None,
        }
    }

    /// Probe exactly these ports regardless of depth
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    fn ports_for(&self, depth: ScanDepth) -> Vec<u16> {
        if let Some(ports) = &self.ports {
            return ports.clone();
        }
        match depth {
            ScanDepth::Quick => SERVICE_PORTS.to_vec(),
            ScanDepth::Standard | ScanDepth::Deep => {
                let mut set = ports::for_depth(ScanDepth::Quick);
                set.extend_from_slice(SERVICE_PORTS);
                if depth == ScanDepth::Deep {
                    set.extend_from_slice(ports::COMMON_HIGH);
                }
                set.sort_unstable();
                set.dedup();
                set
            }
        }
    }

    /// Turn lookup results into findings. Pure: no I/O.
    ///
    /// One check per fingerprinted service; it passes when no CVE matched.
    pub fn evaluate(matches: &[ServiceMatch]) -> ModuleResult {
        let mut findings = Vec::new();
        let mut deducted = 0.0;
        let mut clean = 0u32;

        for m in matches {
            if m.records.is_empty() {
                clean += 1;
                continue;
            }
            let product = m
                .fingerprint
                .product
                .clone()
                .unwrap_or_else(|| m.fingerprint.service.clone());
            let version = m.fingerprint.version.as_deref().unwrap_or("unknown version");

            for record in &m.records {
                let severity = severity_for(record.cvss_score);
                deducted += penalty(severity);

                let remediation = match &record.fixed_version {
                    Some(fixed) => format!("Upgrade {} to {} or later.", product, fixed),
                    None => format!(
                        "Upgrade {} to a release that addresses {}.",
                        product, record.cve_id
                    ),
                };
                let description = record.summary.clone().unwrap_or_else(|| {
                    format!("{} {} is affected by {}.", product, version, record.cve_id)
                });

                let mut builder = Finding::builder(
                    MODULE_NAME,
                    severity,
                    format!("{} in {} {}", record.cve_id, product, version),
                )
                .description(description)
                .remediation(remediation)
                .target_ip(m.ip)
                .port(m.port)
                .service(&m.fingerprint.service)
                .evidence(json!({
                    "product": m.fingerprint.product,
                    "version": m.fingerprint.version,
                }))
                .cve(&record.cve_id)
                .cisa_kev(record.cisa_kev)
                .attack(record.attack_technique.clone(), record.attack_tactic.clone());
                if let Some(cvss) = record.cvss_score {
                    builder = builder.cvss(cvss);
                }
                if let Some(epss) = record.epss_score {
                    builder = builder.epss(epss);
                }
                findings.push(builder.build());
            }
        }

        ModuleResult {
            score: (100.0 - deducted).max(0.0),
            findings,
            checks_total: matches.len() as u32,
            checks_passed: clean,
            checks_warning: 0,
        }
    }

    async fn fingerprint(
        &self,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<Vec<(IpAddr, u16, ServiceFingerprint)>, ModuleError> {
        let scanner = PortScanner::with_config(PortScanConfig {
            connect_timeout: profile.connect_timeout,
            concurrency: profile.concurrency,
            grab_banners: true,
            banner_timeout: profile.banner_timeout,
        });
        let ports = self.ports_for(profile.depth);

        let mut services = Vec::new();
        for &ip in resolved_ips {
            profile.check_cancelled()?;
            for open in scanner.scan_open_ports(ip, &ports, &profile.cancel).await? {
                let banner = open.banner.as_ref().map(|b| b.text.as_str());
                let Some(info) = self.detector.detect(banner, open.port) else {
                    continue;
                };
                // A port-number guess carries nothing to look up
                if info.product.is_none() {
                    continue;
                }
                services.push((
                    ip,
                    open.port,
                    ServiceFingerprint {
                        service: info.name,
                        product: info.product,
                        version: info.version,
                    },
                ));
            }
        }
        Ok(services)
    }
}

#[async_trait]
impl ProbeModule for CveModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "Known-vulnerability matching for fingerprinted service versions"
    }

    fn checks(&self) -> Vec<String> {
        vec!["service-fingerprint".into(), "known-cve".into()]
    }

    fn intrusiveness(&self) -> Intrusiveness {
        Intrusiveness::Active
    }

    async fn run(
        &self,
        _target: &ScanTarget,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<ModuleResult, ModuleError> {
        if resolved_ips.is_empty() {
            return Err(ModuleError::Unreachable("no addresses to probe".into()));
        }

        let services = self.fingerprint(resolved_ips, profile).await?;
        debug!(scan_id = %profile.scan_id, services = services.len(), "fingerprinted services");

        // The same product/version on several hosts is looked up once
        let mut cache: HashMap<ServiceFingerprint, Vec<VulnRecord>> = HashMap::new();
        let mut matches = Vec::with_capacity(services.len());
        for (ip, port, fingerprint) in services {
            profile.check_cancelled()?;
            let records = match cache.get(&fingerprint) {
                Some(records) => records.clone(),
                None => {
                    let records = self
                        .lookup
                        .lookup(&fingerprint)
                        .await
                        .map_err(|e| ModuleError::Lookup(format!("{}: {}", self.lookup.source(), e)))?;
                    cache.insert(fingerprint.clone(), records.clone());
                    records
                }
            };
            matches.push(ServiceMatch {
                ip,
                port,
                fingerprint,
                records,
            });
        }

        let result = Self::evaluate(&matches);
        info!(
            scan_id = %profile.scan_id,
            services = matches.len(),
            cves = result.findings.len(),
            score = result.score,
            "cve checks complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{LookupError, StaticFeed};
    use shieldscan_core::Sensitivity;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    fn record(cve: &str, cvss: f32, epss: Option<f32>, kev: bool) -> VulnRecord {
        VulnRecord {
            cve_id: cve.into(),
            cvss_score: Some(cvss),
            epss_score: epss,
            cisa_kev: kev,
            attack_technique: Some("T1190".into()),
            attack_tactic: Some("initial-access".into()),
            summary: None,
            fixed_version: Some("9.3p2".into()),
        }
    }

    fn ssh_match(records: Vec<VulnRecord>) -> ServiceMatch {
        ServiceMatch {
            ip: "10.0.0.10".parse().unwrap(),
            port: 22,
            fingerprint: ServiceFingerprint {
                service: "ssh".into(),
                product: Some("openssh".into()),
                version: Some("8.9p1".into()),
            },
            records,
        }
    }

    #[test]
    fn test_evaluate_penalties() {
        let matches = vec![
            ssh_match(vec![
                record("CVE-2023-38408", 9.8, Some(0.6), false),
                record("CVE-2023-48795", 5.9, Some(0.2), true),
            ]),
            ServiceMatch {
                records: vec![],
                ..ssh_match(vec![])
            },
        ];
        let result = CveModule::evaluate(&matches);

        assert_eq!(result.score, 100.0 - 25.0 - 8.0);
        assert_eq!(result.checks_total, 2);
        assert_eq!(result.checks_passed, 1);
        assert_eq!(result.findings.len(), 2);

        let critical = &result.findings[0];
        assert_eq!(critical.severity, Severity::Critical);
        assert_eq!(critical.cve_id.as_deref(), Some("CVE-2023-38408"));
        assert_eq!(critical.epss_score, Some(0.6));
        assert_eq!(critical.service.as_deref(), Some("ssh"));
        assert_eq!(critical.attack_technique.as_deref(), Some("T1190"));
        assert_eq!(critical.remediation.as_deref(), Some("Upgrade openssh to 9.3p2 or later."));
        assert_eq!(result.findings[1].cisa_kev, Some(true));
    }

    #[test]
    fn test_score_floors_at_zero() {
        let records = (0..5).map(|i| record(&format!("CVE-2024-000{}", i), 9.9, None, false)).collect();
        let result = CveModule::evaluate(&[ssh_match(records)]);
        assert_eq!(result.score, 0.0);
    }

    #[test]
    fn test_nothing_fingerprinted() {
        let result = CveModule::evaluate(&[]);
        assert_eq!(result.score, 100.0);
        assert_eq!(result.checks_total, 0);
    }

    #[test]
    fn test_depth_port_sets() {
        let module = CveModule::new(Arc::new(StaticFeed::default()));
        let quick = module.ports_for(ScanDepth::Quick);
        let deep = module.ports_for(ScanDepth::Deep);
        assert!(quick.contains(&22));
        assert!(deep.len() > quick.len());
        assert!(deep.windows(2).all(|w| w[0] < w[1]));
    }

    async fn ssh_listener() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let _ = sock.write_all(b"SSH-2.0-OpenSSH_7.4\r\n").await;
            }
        });
        port
    }

    #[tokio::test]
    async fn test_run_against_live_banner() {
        let port = ssh_listener().await;
        let feed = StaticFeed::from_json(
            r#"[{"product":"openssh","versions":[{"end":"8.5"}],"cve_id":"CVE-2018-15473","cvss_score":5.3,"epss_score":0.9}]"#,
        )
        .unwrap();
        let module = CveModule::new(Arc::new(feed)).with_ports(vec![port]);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);

        let result = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap();
        assert_eq!(result.checks_total, 1);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].target_port, Some(port));
        assert_eq!(result.findings[0].severity, Severity::Medium);
        assert_eq!(result.score, 92.0);
    }

    struct FailingLookup;

    #[async_trait]
    impl VulnerabilityLookup for FailingLookup {
        fn source(&self) -> &str {
            "failing"
        }

        async fn lookup(&self, _fp: &ServiceFingerprint) -> Result<Vec<VulnRecord>, LookupError> {
            Err(LookupError::Status(500))
        }
    }

    #[tokio::test]
    async fn test_lookup_failure_is_module_error() {
        let port = ssh_listener().await;
        let module = CveModule::new(Arc::new(FailingLookup)).with_ports(vec![port]);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);

        let err = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Lookup(_)));
    }
}

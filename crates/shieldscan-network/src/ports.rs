//! The `ports` probe module: TCP service discovery and dangerous-exposure scoring

use crate::banner::BannerResult;
use crate::port_scan::{ports, PortResult, PortScanConfig, PortScanner, PortState};
use crate::service_detect::ServiceDetector;
use async_trait::async_trait;
use serde_json::json;
use shieldscan_core::{
    Finding, Intrusiveness, ModuleError, ModuleResult, ProbeModule, ScanProfile, ScanTarget,
    Severity,
};
use std::net::IpAddr;
use tracing::{debug, info};

pub const MODULE_NAME: &str = "ports";

/// Score deduction per open dangerous port
pub const DANGEROUS_PENALTY: f64 = 20.0;
/// Score deduction per other open port
pub const OPEN_PENALTY: f64 = 5.0;

/// A service that should never be reachable from an untrusted network
#[derive(Debug, Clone, Copy)]
pub struct DangerousPort {
    pub port: u16,
    pub service: &'static str,
    pub severity: Severity,
    pub remediation: &'static str,
}

const fn dangerous(
    port: u16,
    service: &'static str,
    severity: Severity,
    remediation: &'static str,
) -> DangerousPort {
    DangerousPort {
        port,
        service,
        severity,
        remediation,
    }
}

pub const DANGEROUS_PORTS: &[DangerousPort] = &[
    dangerous(21, "ftp", Severity::Medium, "Disable FTP or replace it with SFTP; block port 21 at the perimeter."),
    dangerous(23, "telnet", Severity::High, "Disable Telnet and use SSH for remote administration."),
    dangerous(135, "msrpc", Severity::Medium, "Block MS-RPC (135) at the perimeter firewall."),
    dangerous(139, "netbios", Severity::Medium, "Block NetBIOS (139) at the perimeter and disable it where unused."),
    dangerous(445, "smb", Severity::High, "Block SMB (445) from untrusted networks and disable SMBv1."),
    dangerous(1433, "mssql", Severity::Medium, "Restrict SQL Server (1433) to application hosts via firewall rules."),
    dangerous(2375, "docker", Severity::Critical, "Never expose the Docker API without TLS; bind it to a local socket."),
    dangerous(3306, "mysql", Severity::Medium, "Bind MySQL to localhost or restrict 3306 to application hosts."),
    dangerous(3389, "rdp", Severity::High, "Put RDP behind a VPN or gateway and enforce NLA."),
    dangerous(5432, "postgresql", Severity::Medium, "Restrict PostgreSQL (5432) with pg_hba.conf and firewall rules."),
    dangerous(5900, "vnc", Severity::High, "Tunnel VNC over SSH or a VPN; never expose 5900 directly."),
    dangerous(6379, "redis", Severity::High, "Enable Redis AUTH/ACLs, enable protected-mode and bind to localhost."),
    dangerous(9200, "elasticsearch", Severity::High, "Enable Elasticsearch security features and restrict 9200."),
    dangerous(11211, "memcached", Severity::High, "Bind memcached to localhost and disable UDP."),
    dangerous(27017, "mongodb", Severity::High, "Enable MongoDB authentication and bind to trusted interfaces."),
];

pub fn dangerous_port(port: u16) -> Option<&'static DangerousPort> {
    DANGEROUS_PORTS.iter().find(|d| d.port == port)
}

/// An open port as observed by the scanner
#[derive(Debug, Clone)]
pub struct OpenPort {
    pub ip: IpAddr,
    pub port: u16,
    pub banner: Option<String>,
}

impl From<&PortResult> for OpenPort {
    fn from(result: &PortResult) -> Self {
        Self {
            ip: result.ip,
            port: result.port,
            banner: result.banner.as_ref().map(|b: &BannerResult| b.text.clone()),
        }
    }
}

/// Everything the port checks are evaluated over
#[derive(Debug, Clone, Default)]
pub struct PortObservation {
    /// Host/port pairs probed
    pub ports_probed: u32,
    /// Connects answered with a reset
    pub refused: u32,
    /// Connects that timed out or failed without a reset
    pub filtered: u32,
    pub open: Vec<OpenPort>,
}

/// Ports served on purpose by a scanned host and inspected by other modules
pub const SERVICE_PORTS: &[u16] = &[80, 443];

/// TCP connect scan over a depth-dependent port set
pub struct PortScanModule {
    detector: ServiceDetector,
    ports: Option<Vec<u16>>,
    service_ports: Vec<u16>,
}

impl PortScanModule {
    pub fn new() -> Self {
        Self {
            detector: ServiceDetector::new(),
            ports: None,
            service_ports: SERVICE_PORTS.to_vec(),
        }
    }

    /// Scan exactly these ports instead of the depth's port set
    pub fn with_ports(mut self, ports: Vec<u16>) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Ports that may be open without penalty
    pub fn with_service_ports(mut self, ports: Vec<u16>) -> Self {
        self.service_ports = ports;
        self
    }

    /// Score an observation. Pure: no I/O.
    ///
    /// Every probed port is one check: closed/filtered ports pass, open
    /// dangerous ports fail and other open ports are warnings. Open service
    /// ports that are not dangerous pass without a finding.
    pub fn evaluate(&self, observation: &PortObservation) -> ModuleResult {
        let mut findings = Vec::new();
        let mut dangerous_open = 0u32;
        let mut other_open = 0u32;

        for open in &observation.open {
            if dangerous_port(open.port).is_none() && self.service_ports.contains(&open.port) {
                continue;
            }
            let service = self.detector.detect(open.banner.as_deref(), open.port);
            let evidence = json!({
                "port": open.port,
                "banner": open.banner,
                "product": service.as_ref().and_then(|s| s.product.clone()),
                "version": service.as_ref().and_then(|s| s.version.clone()),
            });

            match dangerous_port(open.port) {
                Some(danger) => {
                    dangerous_open += 1;
                    let open_redis = danger.port == 6379
                        && open.banner.as_deref().is_some_and(|b| b.starts_with("+PONG"));
                    let (severity, title) = if open_redis {
                        (
                            Severity::Critical,
                            "Redis accepts unauthenticated commands".to_string(),
                        )
                    } else {
                        (
                            danger.severity,
                            format!("Dangerous service exposed: {} on port {}", danger.service, danger.port),
                        )
                    };
                    let name = service
                        .as_ref()
                        .map(|s| s.name.as_str())
                        .unwrap_or(danger.service);

                    findings.push(
                        Finding::builder(MODULE_NAME, severity, title)
                            .description(format!(
                                "Port {} ({}) is reachable. This service is commonly unauthenticated by default and a frequent initial-access vector.",
                                danger.port, danger.service
                            ))
                            .remediation(danger.remediation)
                            .target_ip(open.ip)
                            .port(open.port)
                            .service(name)
                            .evidence(evidence)
                            .attack(Some("T1190".into()), Some("initial-access".into()))
                            .build(),
                    );
                }
                None => {
                    other_open += 1;
                    let name = service
                        .as_ref()
                        .map(|s| s.name.clone())
                        .unwrap_or_else(|| "unknown".to_string());

                    findings.push(
                        Finding::builder(
                            MODULE_NAME,
                            Severity::Info,
                            format!("Open port {}/tcp ({})", open.port, name),
                        )
                        .description(format!("Port {} accepts TCP connections.", open.port))
                        .remediation("Close the port if the service does not need to be reachable.")
                        .target_ip(open.ip)
                        .port(open.port)
                        .service(&name)
                        .evidence(evidence)
                        .build(),
                    );
                }
            }
        }

        let penalty = DANGEROUS_PENALTY * dangerous_open as f64 + OPEN_PENALTY * other_open as f64;
        let open_total = dangerous_open + other_open;

        ModuleResult {
            score: (100.0 - penalty).max(0.0),
            findings,
            checks_total: observation.ports_probed.max(open_total),
            checks_passed: observation.ports_probed.saturating_sub(open_total),
            checks_warning: other_open,
        }
    }
}

impl Default for PortScanModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for PortScanModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "TCP connect scan with banner grabbing and dangerous-service detection"
    }

    fn checks(&self) -> Vec<String> {
        vec![
            "open-ports".into(),
            "dangerous-services".into(),
            "unauthenticated-redis".into(),
        ]
    }

    fn intrusiveness(&self) -> Intrusiveness {
        Intrusiveness::Active
    }

    async fn run(
        &self,
        target: &ScanTarget,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<ModuleResult, ModuleError> {
        if resolved_ips.is_empty() {
            return Err(ModuleError::Unreachable(format!("{} resolved to no addresses", target)));
        }

        let port_set = self
            .ports
            .clone()
            .unwrap_or_else(|| ports::for_depth(profile.depth));
        let scanner = PortScanner::with_config(PortScanConfig {
            connect_timeout: profile.connect_timeout,
            concurrency: profile.concurrency,
            grab_banners: true,
            banner_timeout: profile.banner_timeout,
        });

        let mut observation = PortObservation::default();
        for &ip in resolved_ips {
            profile.check_cancelled()?;
            debug!(scan_id = %profile.scan_id, ip = %ip, ports = port_set.len(), "scanning ports");

            let results = scanner.scan_ports(ip, &port_set, &profile.cancel).await?;
            observation.ports_probed += results.len() as u32;
            for result in &results {
                match result.state {
                    PortState::Open => observation.open.push(OpenPort::from(result)),
                    PortState::Closed => observation.refused += 1,
                    PortState::Filtered => observation.filtered += 1,
                }
            }
        }

        if observation.open.is_empty() {
            return Err(ModuleError::Unreachable(format!(
                "no open port on {} ({} refused, {} filtered)",
                target, observation.refused, observation.filtered
            )));
        }

        let result = self.evaluate(&observation);
        info!(
            scan_id = %profile.scan_id,
            open = observation.open.len(),
            score = result.score,
            "port scan complete"
        );
        Ok(result)
    }
}

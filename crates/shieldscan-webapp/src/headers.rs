//! The `headers` probe module: HTTP security header analysis

use crate::client::{HttpClient, HttpResponse};
use async_trait::async_trait;
use regex::Regex;
use serde_json::json;
use shieldscan_core::{
    Finding, Intrusiveness, ModuleError, ModuleResult, ProbeModule, ScanProfile, ScanTarget,
    Severity,
};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::OnceLock;
use tracing::{debug, info};

pub const MODULE_NAME: &str = "headers";

/// Response headers of the page the checks ran against
#[derive(Debug, Clone)]
pub struct HeaderObservation {
    pub url: String,
    pub ip: IpAddr,
    pub port: u16,
    pub https: bool,
    /// Lower-cased header names
    pub headers: HashMap<String, String>,
}

impl HeaderObservation {
    pub fn from_response(response: &HttpResponse, ip: IpAddr, port: u16, https: bool) -> Self {
        Self {
            url: response.final_url.clone(),
            ip,
            port,
            https,
            headers: response.headers.clone(),
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }
}

/// Status of one security header check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderCheckStatus {
    /// Present and correctly configured
    Present,
    Missing,
    /// Present with an insecure value
    Insecure,
    /// Should not be present (information disclosure)
    ShouldNotBePresent,
}

struct HeaderCheck {
    header: &'static str,
    status: HeaderCheckStatus,
    severity: Severity,
    value: Option<String>,
    title: &'static str,
    remediation: &'static str,
}

impl HeaderCheck {
    fn passed(&self) -> bool {
        self.status == HeaderCheckStatus::Present
    }
}

fn csp_directives(csp: &str) -> impl Iterator<Item = &str> {
    csp.split(';').map(str::trim).filter(|d| !d.is_empty())
}

fn check_csp(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "Content-Security-Policy",
        status: HeaderCheckStatus::Present,
        severity: Severity::Medium,
        value: None,
        title: "Content-Security-Policy missing",
        remediation: "Add a Content-Security-Policy that restricts script sources to prevent XSS.",
    };
    match (
        obs.header("content-security-policy"),
        obs.header("content-security-policy-report-only"),
    ) {
        (Some(v), _) => {
            check.value = Some(v.to_string());
            if v.contains("'unsafe-inline'") || v.contains("'unsafe-eval'") {
                check.status = HeaderCheckStatus::Insecure;
                check.title = "Content-Security-Policy allows unsafe scripts";
                check.remediation = "Remove 'unsafe-inline' and 'unsafe-eval' from the policy; use nonces or hashes.";
            }
        }
        (None, Some(v)) => {
            check.value = Some(v.to_string());
            check.status = HeaderCheckStatus::Insecure;
            check.title = "Content-Security-Policy is report-only";
            check.remediation = "Switch the policy from report-only to enforcing mode.";
        }
        (None, None) => check.status = HeaderCheckStatus::Missing,
    }
    check
}

fn check_frame_options(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "X-Frame-Options",
        status: HeaderCheckStatus::Present,
        severity: Severity::Medium,
        value: None,
        title: "Clickjacking protection missing",
        remediation: "Send X-Frame-Options: DENY (or SAMEORIGIN) or a CSP frame-ancestors directive.",
    };

    let frame_ancestors = obs
        .header("content-security-policy")
        .map(|csp| {
            csp_directives(csp).any(|d| d.to_ascii_lowercase().starts_with("frame-ancestors"))
        })
        .unwrap_or(false);

    match obs.header("x-frame-options") {
        Some(v) => {
            check.value = Some(v.to_string());
            let upper = v.trim().to_ascii_uppercase();
            if upper != "DENY" && upper != "SAMEORIGIN" && !frame_ancestors {
                check.status = HeaderCheckStatus::Insecure;
                check.title = "X-Frame-Options has an ineffective value";
            }
        }
        None if frame_ancestors => {}
        None => check.status = HeaderCheckStatus::Missing,
    }
    check
}

fn check_content_type_options(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "X-Content-Type-Options",
        status: HeaderCheckStatus::Present,
        severity: Severity::Low,
        value: None,
        title: "MIME sniffing not disabled",
        remediation: "Send X-Content-Type-Options: nosniff.",
    };
    match obs.header("x-content-type-options") {
        Some(v) if v.trim().eq_ignore_ascii_case("nosniff") => check.value = Some(v.to_string()),
        Some(v) => {
            check.value = Some(v.to_string());
            check.status = HeaderCheckStatus::Insecure;
        }
        None => check.status = HeaderCheckStatus::Missing,
    }
    check
}

fn check_referrer_policy(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "Referrer-Policy",
        status: HeaderCheckStatus::Present,
        severity: Severity::Low,
        value: None,
        title: "Referrer-Policy missing",
        remediation: "Send Referrer-Policy: strict-origin-when-cross-origin (or stricter).",
    };
    match obs.header("referrer-policy") {
        Some(v) if v.to_ascii_lowercase().contains("unsafe-url") => {
            check.value = Some(v.to_string());
            check.status = HeaderCheckStatus::Insecure;
            check.title = "Referrer-Policy leaks full URLs";
        }
        Some(v) if !v.trim().is_empty() => check.value = Some(v.to_string()),
        _ => check.status = HeaderCheckStatus::Missing,
    }
    check
}

fn version_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\d+\.\d+").ok()).as_ref()
}

fn check_server(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "Server",
        status: HeaderCheckStatus::Present,
        severity: Severity::Low,
        value: None,
        title: "Server header discloses version",
        remediation: "Configure the web server to omit version details from the Server header.",
    };
    if let Some(v) = obs.header("server") {
        check.value = Some(v.to_string());
        if version_pattern().is_some_and(|re| re.is_match(v)) {
            check.status = HeaderCheckStatus::ShouldNotBePresent;
        }
    }
    check
}

fn check_powered_by(obs: &HeaderObservation) -> HeaderCheck {
    let mut check = HeaderCheck {
        header: "X-Powered-By",
        status: HeaderCheckStatus::Present,
        severity: Severity::Low,
        value: None,
        title: "X-Powered-By header discloses technology",
        remediation: "Remove the X-Powered-By header.",
    };
    if let Some(v) = obs.header("x-powered-by") {
        check.value = Some(v.to_string());
        check.status = HeaderCheckStatus::ShouldNotBePresent;
    }
    check
}

/// HTTP security header probe
pub struct HeadersModule {
    https_port: u16,
    http_port: u16,
}

impl HeadersModule {
    pub fn new() -> Self {
        Self {
            https_port: 443,
            http_port: 80,
        }
    }

    pub fn with_ports(mut self, https_port: u16, http_port: u16) -> Self {
        self.https_port = https_port;
        self.http_port = http_port;
        self
    }

    /// Run the six header checks. Low-severity failures count as warnings.
    pub fn evaluate(obs: &HeaderObservation) -> ModuleResult {
        let checks = [
            check_csp(obs),
            check_frame_options(obs),
            check_content_type_options(obs),
            check_referrer_policy(obs),
            check_server(obs),
            check_powered_by(obs),
        ];

        let total = checks.len() as u32;
        let passed = checks.iter().filter(|c| c.passed()).count() as u32;
        let warning = checks
            .iter()
            .filter(|c| !c.passed() && c.severity == Severity::Low)
            .count() as u32;
        let service = if obs.https { "https" } else { "http" };

        let findings = checks
            .into_iter()
            .filter(|c| !c.passed())
            .map(|c| {
                let description = match &c.value {
                    Some(v) => format!("{} at {} is set to '{}'.", c.header, obs.url, v),
                    None => format!("{} is not sent by {}.", c.header, obs.url),
                };
                Finding::builder(MODULE_NAME, c.severity, c.title)
                    .description(description)
                    .remediation(c.remediation)
                    .target_ip(obs.ip)
                    .port(obs.port)
                    .service(service)
                    .evidence(json!({
                        "url": obs.url,
                        "header": c.header,
                        "value": c.value,
                    }))
                    .build()
            })
            .collect();

        ModuleResult {
            score: 100.0 * passed as f64 / total as f64,
            findings,
            checks_total: total,
            checks_passed: passed,
            checks_warning: warning,
        }
    }

    async fn fetch(
        &self,
        target: &ScanTarget,
        ip: IpAddr,
        profile: &ScanProfile,
    ) -> Result<HeaderObservation, ModuleError> {
        let host = match target.host() {
            Some(h) => h.to_string(),
            None => match ip {
                IpAddr::V6(v6) => format!("[{}]", v6),
                IpAddr::V4(v4) => v4.to_string(),
            },
        };
        let client = match target.host() {
            Some(h) => HttpClient::pinned(profile.connect_timeout, h, ip),
            None => HttpClient::new(profile.connect_timeout),
        }
        .map_err(|e| ModuleError::Other(e.to_string()))?;

        let attempts = [("https", self.https_port, true), ("http", self.http_port, false)];
        let mut last_error = String::new();
        for (scheme, port, https) in attempts {
            profile.check_cancelled()?;
            let url = format!("{}://{}:{}/", scheme, host, port);
            match client.get(&url).await {
                Ok(response) => {
                    debug!(scan_id = %profile.scan_id, %url, status = response.status, "fetched page");
                    return Ok(HeaderObservation::from_response(&response, ip, port, https));
                }
                Err(e) => {
                    debug!(scan_id = %profile.scan_id, %url, error = %e, "fetch failed");
                    last_error = format!("{}: {}", url, e);
                }
            }
        }
        Err(ModuleError::Unreachable(last_error))
    }
}

impl Default for HeadersModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for HeadersModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "HTTP security header checks on the landing page"
    }

    fn checks(&self) -> Vec<String> {
        [
            "content-security-policy",
            "x-frame-options",
            "x-content-type-options",
            "referrer-policy",
            "server-version-disclosure",
            "x-powered-by",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    fn intrusiveness(&self) -> Intrusiveness {
        Intrusiveness::Passive
    }

    async fn run(
        &self,
        target: &ScanTarget,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<ModuleResult, ModuleError> {
        let ip = *resolved_ips
            .first()
            .ok_or_else(|| ModuleError::Unreachable("no addresses to probe".into()))?;
        let observation = self.fetch(target, ip, profile).await?;
        let result = Self::evaluate(&observation);
        info!(
            scan_id = %profile.scan_id,
            url = %observation.url,
            score = result.score,
            "header checks complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shieldscan_core::{ScanDepth, Sensitivity};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn observation(headers: &[(&str, &str)]) -> HeaderObservation {
        HeaderObservation {
            url: "https://shop.example.com/".into(),
            ip: "10.0.0.10".parse().unwrap(),
            port: 443,
            https: true,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_hardened_site_passes() {
        let obs = observation(&[
            ("content-security-policy", "default-src 'self'; frame-ancestors 'none'"),
            ("x-content-type-options", "nosniff"),
            ("referrer-policy", "no-referrer"),
            ("server", "nginx"),
        ]);
        let result = HeadersModule::evaluate(&obs);
        assert_eq!(result.checks_total, 6);
        assert_eq!(result.checks_passed, 6);
        assert_eq!(result.score, 100.0);
    }

    #[test]
    fn test_bare_site() {
        let obs = observation(&[("server", "Apache/2.4.49 (Unix)"), ("x-powered-by", "PHP/7.4.3")]);
        let result = HeadersModule::evaluate(&obs);
        assert_eq!(result.checks_passed, 0);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.findings.len(), 6);
        let medium = result.findings.iter().filter(|f| f.severity == Severity::Medium).count();
        assert_eq!(medium, 2);
        assert_eq!(result.checks_warning, 4);
        assert_eq!(result.checks_failed(), 2);
    }

    #[test]
    fn test_unsafe_csp_and_report_only() {
        let unsafe_csp = observation(&[("content-security-policy", "script-src 'self' 'unsafe-inline'")]);
        let result = HeadersModule::evaluate(&unsafe_csp);
        assert!(result
            .findings
            .iter()
            .any(|f| f.title == "Content-Security-Policy allows unsafe scripts"));

        let report_only = observation(&[("content-security-policy-report-only", "default-src 'self'")]);
        let result = HeadersModule::evaluate(&report_only);
        assert!(result
            .findings
            .iter()
            .any(|f| f.title == "Content-Security-Policy is report-only"));
    }

    #[test]
    fn test_frame_options_values() {
        let ok = observation(&[("x-frame-options", "sameorigin")]);
        assert!(check_frame_options(&ok).passed());
        let bad = observation(&[("x-frame-options", "ALLOW-FROM https://a.example")]);
        assert_eq!(check_frame_options(&bad).status, HeaderCheckStatus::Insecure);
        let missing = observation(&[]);
        assert_eq!(check_frame_options(&missing).status, HeaderCheckStatus::Missing);
    }

    #[tokio::test]
    async fn test_falls_back_to_http() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let http_port = listener.local_addr().unwrap().port();
        let https_port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let _ = sock
                    .write_all(b"HTTP/1.1 200 OK\r\nX-Content-Type-Options: nosniff\r\nReferrer-Policy: same-origin\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await;
            }
        });

        let module = HeadersModule::new().with_ports(https_port, http_port);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Fragile);
        let result = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap();

        // nosniff, referrer, no server header, no x-powered-by
        assert_eq!(result.checks_passed, 4);
        assert!(result
            .findings
            .iter()
            .all(|f| f.service.as_deref() == Some("http") && f.target_port == Some(http_port)));
    }

    #[tokio::test]
    async fn test_nothing_listening_is_unreachable() {
        let port = {
            let l = TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let module = HeadersModule::new().with_ports(port, port);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);
        let err = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Unreachable(_)));
    }
}

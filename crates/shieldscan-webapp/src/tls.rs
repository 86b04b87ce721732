//! The `tls` probe module: certificate and TLS configuration checks
//!
//! The handshake runs with an accept-everything verifier so that broken
//! certificates can still be inspected; trust is judged separately against
//! the webpki root store.

use crate::client::HttpClient;
use crate::weak_suites::{check_weak_suites, WeakSuiteVerdict};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::client::WebPkiServerVerifier;
use rustls::crypto::{ring, CryptoProvider};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use reqwest::header::STRICT_TRANSPORT_SECURITY;
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shieldscan_core::{
    Finding, Intrusiveness, ModuleError, ModuleResult, ProbeModule, ScanProfile, ScanTarget,
    Severity,
};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::{debug, info};
use x509_parser::prelude::*;

pub const MODULE_NAME: &str = "tls";

/// Score ceiling when any critical check fails
pub const CRITICAL_CAP: f64 = 40.0;

const NEAR_EXPIRY_DAYS: i64 = 30;
const MIN_RSA_BITS: usize = 2048;
const MIN_EC_BITS: usize = 224;

/// Check names, in the order `evaluate` reports them
pub const CHECKS: [&str; 8] = [
    "certificate-validity",
    "near-expiry",
    "chain-completeness",
    "protocol-version",
    "cipher-strength",
    "hsts-header",
    "key-size",
    "self-signed",
];

/// Negotiated protocol, as far as the probe can tell
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsProtocol {
    /// Server would only complete a pre-TLS 1.2 handshake
    Legacy,
    #[serde(rename = "TLSv1.2")]
    Tls12,
    #[serde(rename = "TLSv1.3")]
    Tls13,
}

/// How the presented chain fares against the public root store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Trusted,
    SelfSigned,
    /// Issuer not reachable from a trusted root with the certificates sent
    Incomplete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
    Ec,
    Other,
}

/// Facts pulled from the leaf certificate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CertificateFacts {
    pub subject: String,
    pub issuer: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub key_algorithm: KeyAlgorithm,
    pub key_bits: Option<usize>,
}

impl CertificateFacts {
    pub fn from_der(der: &[u8]) -> Result<Self, ModuleError> {
        let (_, cert) = X509Certificate::from_der(der)
            .map_err(|e| ModuleError::Other(format!("unparseable certificate: {}", e)))?;

        let validity = cert.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or_else(|| ModuleError::Other("certificate notBefore out of range".into()))?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or_else(|| ModuleError::Other("certificate notAfter out of range".into()))?;

        let (key_algorithm, key_bits) = match cert.public_key().parsed() {
            Ok(x509_parser::public_key::PublicKey::RSA(rsa)) => (KeyAlgorithm::Rsa, Some(rsa.key_size())),
            Ok(x509_parser::public_key::PublicKey::EC(ec)) => (KeyAlgorithm::Ec, Some(ec.key_size())),
            _ => (KeyAlgorithm::Other, None),
        };

        Ok(Self {
            subject: cert.subject().to_string(),
            issuer: cert.issuer().to_string(),
            not_before,
            not_after,
            key_algorithm,
            key_bits,
        })
    }

    pub fn is_self_issued(&self) -> bool {
        self.subject == self.issuer
    }
}

/// Everything the TLS checks are evaluated over
#[derive(Debug, Clone)]
pub struct TlsObservation {
    pub endpoint: SocketAddr,
    pub protocol: TlsProtocol,
    pub cipher_suite: Option<String>,
    /// Answer to a hello offering only legacy suites
    pub weak_suites: WeakSuiteVerdict,
    /// Absent when the handshake never completed
    pub certificate: Option<CertificateFacts>,
    pub chain: ChainStatus,
    /// `None` when no HTTPS response arrived
    pub hsts: Option<bool>,
    pub observed_at: DateTime<Utc>,
}

struct CheckOutcome {
    passed: bool,
    /// False when the observation holds nothing to judge the check by
    evaluated: bool,
    severity: Severity,
    title: String,
    description: String,
    remediation: &'static str,
}

impl CheckOutcome {
    fn pass() -> Self {
        Self {
            passed: true,
            evaluated: true,
            severity: Severity::Info,
            title: String::new(),
            description: String::new(),
            remediation: "",
        }
    }

    fn fail(
        severity: Severity,
        title: impl Into<String>,
        description: impl Into<String>,
        remediation: &'static str,
    ) -> Self {
        Self {
            passed: false,
            evaluated: true,
            severity,
            title: title.into(),
            description: description.into(),
            remediation,
        }
    }

    fn not_evaluated() -> Self {
        Self {
            passed: false,
            evaluated: false,
            ..Self::pass()
        }
    }

    fn is_warning(&self) -> bool {
        !self.passed && (!self.evaluated || self.severity == Severity::Low)
    }
}

fn check_protocol(obs: &TlsObservation) -> CheckOutcome {
    match obs.protocol {
        TlsProtocol::Tls12 | TlsProtocol::Tls13 => CheckOutcome::pass(),
        TlsProtocol::Legacy => CheckOutcome::fail(
            Severity::High,
            "Legacy TLS protocol only",
            "The server did not complete a TLS 1.2 or TLS 1.3 handshake; only deprecated protocol versions appear to be offered.",
            "Enable TLS 1.2 and TLS 1.3 and disable SSLv3, TLS 1.0 and TLS 1.1.",
        ),
    }
}

const CIPHER_REMEDIATION: &str =
    "Restrict cipher suites to AES-GCM or ChaCha20-Poly1305 with ECDHE key exchange.";

fn check_cipher(obs: &TlsObservation) -> CheckOutcome {
    if let Some(suite) = obs.cipher_suite.as_deref() {
        let upper = suite.to_ascii_uppercase();
        let broken = upper.contains("RC4") || upper.contains("DES") || upper.contains("NULL");
        let aead = upper.contains("GCM") || upper.contains("CHACHA20") || upper.contains("CCM");
        if broken || !aead {
            return CheckOutcome::fail(
                Severity::High,
                "Weak cipher suite negotiated",
                format!("The server negotiated {}, which is not an AEAD cipher suite.", suite),
                CIPHER_REMEDIATION,
            );
        }
    }
    match &obs.weak_suites {
        WeakSuiteVerdict::Rejected => CheckOutcome::pass(),
        WeakSuiteVerdict::Accepted(suite) => CheckOutcome::fail(
            Severity::High,
            "Weak cipher suite accepted",
            format!(
                "Offered only RC4, DES, 3DES, export and NULL suites, the server chose {}.",
                suite
            ),
            CIPHER_REMEDIATION,
        ),
        WeakSuiteVerdict::NotEvaluated => CheckOutcome::not_evaluated(),
    }
}

fn check_validity(cert: &CertificateFacts, now: DateTime<Utc>) -> CheckOutcome {
    if now > cert.not_after {
        CheckOutcome::fail(
            Severity::Critical,
            "Certificate expired",
            format!("The certificate expired on {}.", cert.not_after.format("%Y-%m-%d")),
            "Renew the certificate immediately and automate renewal.",
        )
    } else if now < cert.not_before {
        CheckOutcome::fail(
            Severity::Critical,
            "Certificate not yet valid",
            format!("The certificate is not valid before {}.", cert.not_before.format("%Y-%m-%d")),
            "Check the server clock and reissue the certificate with a correct validity period.",
        )
    } else {
        CheckOutcome::pass()
    }
}

fn check_near_expiry(cert: &CertificateFacts, now: DateTime<Utc>) -> CheckOutcome {
    // An expired certificate is already reported by the validity check
    if now > cert.not_after {
        return CheckOutcome::pass();
    }
    let remaining = cert.not_after - now;
    if remaining < ChronoDuration::days(NEAR_EXPIRY_DAYS) {
        CheckOutcome::fail(
            Severity::Medium,
            "Certificate expires soon",
            format!("The certificate expires in {} days.", remaining.num_days()),
            "Renew the certificate before it expires and automate renewal.",
        )
    } else {
        CheckOutcome::pass()
    }
}

fn check_chain(chain: ChainStatus) -> CheckOutcome {
    match chain {
        ChainStatus::Trusted | ChainStatus::SelfSigned => CheckOutcome::pass(),
        ChainStatus::Incomplete => CheckOutcome::fail(
            Severity::High,
            "Incomplete certificate chain",
            "The server does not send the intermediate certificates needed to build a path to a trusted root.",
            "Configure the server to send the full chain (leaf followed by all intermediates).",
        ),
    }
}

fn check_hsts(hsts: Option<bool>) -> CheckOutcome {
    match hsts {
        Some(true) => CheckOutcome::pass(),
        Some(false) => CheckOutcome::fail(
            Severity::Medium,
            "HSTS header missing",
            "The HTTPS origin does not send Strict-Transport-Security.",
            "Send Strict-Transport-Security: max-age=31536000; includeSubDomains.",
        ),
        None => CheckOutcome::not_evaluated(),
    }
}

fn check_key_size(cert: &CertificateFacts) -> CheckOutcome {
    let weak = match (cert.key_algorithm, cert.key_bits) {
        (KeyAlgorithm::Rsa, Some(bits)) => bits < MIN_RSA_BITS,
        (KeyAlgorithm::Ec, Some(bits)) => bits < MIN_EC_BITS,
        _ => false,
    };
    if weak {
        CheckOutcome::fail(
            Severity::Medium,
            "Weak certificate key",
            format!(
                "The certificate uses a {:?} key of {} bits.",
                cert.key_algorithm,
                cert.key_bits.unwrap_or_default()
            ),
            "Reissue the certificate with an RSA 2048+ or ECDSA P-256+ key.",
        )
    } else {
        CheckOutcome::pass()
    }
}

fn check_self_signed(cert: &CertificateFacts, chain: ChainStatus) -> CheckOutcome {
    if chain == ChainStatus::SelfSigned || (cert.is_self_issued() && chain != ChainStatus::Trusted) {
        CheckOutcome::fail(
            Severity::Low,
            "Self-signed certificate",
            format!("The certificate is issued by itself ({}).", cert.issuer),
            "Replace the certificate with one issued by a trusted certificate authority.",
        )
    } else {
        CheckOutcome::pass()
    }
}

/// TLS/certificate probe against port 443 of the first reachable address
pub struct TlsModule {
    port: u16,
}

impl TlsModule {
    pub fn new() -> Self {
        Self { port: 443 }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Run the check table over an observation. Pure: no I/O.
    ///
    /// All eight checks are always counted. Score is 100 x passed/total,
    /// capped at 40 when a critical check fails. Low-severity failures and
    /// checks with nothing to judge them by count as warnings; the latter
    /// produce no finding and are listed under `not_evaluated` in the
    /// evidence.
    pub fn evaluate(obs: &TlsObservation) -> ModuleResult {
        let cert = obs.certificate.as_ref();
        let outcomes = [
            cert.map_or_else(CheckOutcome::not_evaluated, |c| check_validity(c, obs.observed_at)),
            cert.map_or_else(CheckOutcome::not_evaluated, |c| check_near_expiry(c, obs.observed_at)),
            cert.map_or_else(CheckOutcome::not_evaluated, |_| check_chain(obs.chain)),
            check_protocol(obs),
            check_cipher(obs),
            check_hsts(obs.hsts),
            cert.map_or_else(CheckOutcome::not_evaluated, check_key_size),
            cert.map_or_else(CheckOutcome::not_evaluated, |c| check_self_signed(c, obs.chain)),
        ];

        let total = outcomes.len() as u32;
        let passed = outcomes.iter().filter(|o| o.passed).count() as u32;
        let warning = outcomes.iter().filter(|o| o.is_warning()).count() as u32;
        let not_evaluated: Vec<&str> = CHECKS
            .iter()
            .zip(&outcomes)
            .filter(|(_, o)| !o.evaluated)
            .map(|(name, _)| *name)
            .collect();
        let critical = outcomes
            .iter()
            .any(|o| !o.passed && o.severity == Severity::Critical);

        let mut score = 100.0 * passed as f64 / total as f64;
        if critical {
            score = score.min(CRITICAL_CAP);
        }

        let evidence = json!({
            "endpoint": obs.endpoint.to_string(),
            "protocol": obs.protocol,
            "cipher_suite": obs.cipher_suite,
            "weak_suites": obs.weak_suites,
            "chain": obs.chain,
            "certificate": obs.certificate,
            "not_evaluated": not_evaluated,
        });

        let findings = outcomes
            .into_iter()
            .filter(|o| !o.passed && o.evaluated)
            .map(|o| {
                Finding::builder(MODULE_NAME, o.severity, o.title)
                    .description(o.description)
                    .remediation(o.remediation)
                    .target_ip(obs.endpoint.ip())
                    .port(obs.endpoint.port())
                    .service("https")
                    .evidence(evidence.clone())
                    .build()
            })
            .collect();

        ModuleResult {
            score,
            findings,
            checks_total: total,
            checks_passed: passed,
            checks_warning: warning,
        }
    }

    async fn connect_first(
        &self,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<(SocketAddr, TcpStream), ModuleError> {
        let mut last_error = None;
        for &ip in resolved_ips {
            profile.check_cancelled()?;
            let addr = SocketAddr::new(ip, self.port);
            match timeout(profile.connect_timeout, TcpStream::connect(addr)).await {
                Ok(Ok(stream)) => return Ok((addr, stream)),
                Ok(Err(e)) => last_error = Some(format!("{}: {}", addr, e)),
                Err(_) => last_error = Some(format!("{}: connect timed out", addr)),
            }
        }
        Err(ModuleError::Unreachable(
            last_error.unwrap_or_else(|| "no addresses to probe".into()),
        ))
    }

    async fn observe(
        &self,
        target: &ScanTarget,
        resolved_ips: &[IpAddr],
        profile: &ScanProfile,
    ) -> Result<TlsObservation, ModuleError> {
        let (endpoint, stream) = self.connect_first(resolved_ips, profile).await?;
        let server_name = server_name_for(target, endpoint.ip())?;
        let provider = Arc::new(ring::default_provider());

        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()
            .map_err(|e| ModuleError::Other(e.to_string()))?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(AcceptAnyCert(provider.clone())))
            .with_no_client_auth();
        let connector = TlsConnector::from(Arc::new(config));

        let handshake = timeout(
            profile.connect_timeout,
            connector.connect(server_name.clone(), stream),
        )
        .await
        .map_err(|_| ModuleError::Timeout(profile.connect_timeout))?;

        let (protocol, cipher_suite, chain_der) = match handshake {
            Ok(tls) => {
                let (_, conn) = tls.get_ref();
                let protocol = match conn.protocol_version() {
                    Some(rustls::ProtocolVersion::TLSv1_3) => TlsProtocol::Tls13,
                    Some(rustls::ProtocolVersion::TLSv1_2) => TlsProtocol::Tls12,
                    _ => TlsProtocol::Legacy,
                };
                let suite = conn
                    .negotiated_cipher_suite()
                    .map(|s| format!("{:?}", s.suite()));
                let chain: Vec<CertificateDer<'static>> = conn
                    .peer_certificates()
                    .map(|certs| certs.iter().map(|c| c.clone().into_owned()).collect())
                    .unwrap_or_default();
                if chain.is_empty() {
                    return Err(ModuleError::Other("server presented no certificate".into()));
                }
                (protocol, suite, chain)
            }
            Err(e) if is_protocol_rejection(&e) => {
                debug!(scan_id = %profile.scan_id, %endpoint, error = %e, "modern handshake rejected");
                (TlsProtocol::Legacy, None, Vec::new())
            }
            Err(e) => return Err(ModuleError::Io(e)),
        };

        profile.check_cancelled()?;
        let host = target.host();
        let weak_suites =
            check_weak_suites(endpoint, host, profile.connect_timeout, profile.banner_timeout).await;

        let Some(leaf) = chain_der.first() else {
            return Ok(TlsObservation {
                endpoint,
                protocol,
                cipher_suite,
                weak_suites,
                certificate: None,
                chain: ChainStatus::Incomplete,
                hsts: None,
                observed_at: Utc::now(),
            });
        };
        let certificate = CertificateFacts::from_der(leaf.as_ref())?;
        let chain = classify_chain(&chain_der, &certificate, &server_name, provider)?;

        profile.check_cancelled()?;
        let hsts = fetch_hsts(host, endpoint, profile.connect_timeout + profile.banner_timeout).await;

        Ok(TlsObservation {
            endpoint,
            protocol,
            cipher_suite,
            weak_suites,
            certificate: Some(certificate),
            chain,
            hsts,
            observed_at: Utc::now(),
        })
    }
}

impl Default for TlsModule {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProbeModule for TlsModule {
    fn name(&self) -> &str {
        MODULE_NAME
    }

    fn description(&self) -> &str {
        "TLS protocol, cipher, certificate and HSTS checks"
    }

    fn checks(&self) -> Vec<String> {
        CHECKS.into_iter().map(String::from).collect()
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
        let observation = self.observe(target, resolved_ips, profile).await?;
        let result = Self::evaluate(&observation);
        info!(
            scan_id = %profile.scan_id,
            endpoint = %observation.endpoint,
            protocol = ?observation.protocol,
            chain = ?observation.chain,
            score = result.score,
            "tls checks complete"
        );
        Ok(result)
    }
}

fn server_name_for(target: &ScanTarget, ip: IpAddr) -> Result<ServerName<'static>, ModuleError> {
    match target.host() {
        Some(host) => ServerName::try_from(host.to_string())
            .map_err(|e| ModuleError::Other(format!("invalid server name {}: {}", host, e))),
        None => Ok(ServerName::IpAddress(ip.into())),
    }
}

/// True when the server refused every protocol version rustls offers
fn is_protocol_rejection(err: &std::io::Error) -> bool {
    let Some(inner) = err.get_ref().and_then(|e| e.downcast_ref::<rustls::Error>()) else {
        return false;
    };
    matches!(
        inner,
        rustls::Error::PeerIncompatible(_)
            | rustls::Error::AlertReceived(rustls::AlertDescription::ProtocolVersion)
            | rustls::Error::AlertReceived(rustls::AlertDescription::HandshakeFailure)
            | rustls::Error::AlertReceived(rustls::AlertDescription::InsufficientSecurity)
    )
}

/// Judge the presented chain against the webpki roots.
///
/// Expired leaves are verified at the midpoint of their validity so the
/// verdict reflects the chain rather than the date.
fn classify_chain(
    chain: &[CertificateDer<'static>],
    leaf: &CertificateFacts,
    server_name: &ServerName<'static>,
    provider: Arc<CryptoProvider>,
) -> Result<ChainStatus, ModuleError> {
    let Some((end_entity, intermediates)) = chain.split_first() else {
        return Ok(ChainStatus::Incomplete);
    };

    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let verifier = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
        .build()
        .map_err(|e| ModuleError::Other(format!("verifier setup failed: {}", e)))?;

    let now = Utc::now();
    let at = if now > leaf.not_after || now < leaf.not_before {
        leaf.not_before + (leaf.not_after - leaf.not_before) / 2
    } else {
        now
    };
    let at = UnixTime::since_unix_epoch(Duration::from_secs(at.timestamp().max(0) as u64));

    let verdict = verifier.verify_server_cert(end_entity, intermediates, server_name, &[], at);
    Ok(match verdict {
        Ok(_) => ChainStatus::Trusted,
        // Hostname mismatch says nothing about the chain itself
        Err(rustls::Error::InvalidCertificate(ref e)) if is_name_mismatch(e) => ChainStatus::Trusted,
        Err(_) if leaf.is_self_issued() => ChainStatus::SelfSigned,
        Err(_) => ChainStatus::Incomplete,
    })
}

fn is_name_mismatch(err: &CertificateError) -> bool {
    // Newer rustls releases report the mismatch with context attached
    matches!(err, CertificateError::NotValidForName)
        || format!("{:?}", err).starts_with("NotValidForName")
}

/// GET the HTTPS origin and read Strict-Transport-Security. `None` when
/// the request produced no response.
async fn fetch_hsts(host: Option<&str>, endpoint: SocketAddr, request_timeout: Duration) -> Option<bool> {
    let (client, url) = match host {
        Some(host) => (
            HttpClient::pinned(request_timeout, host, endpoint.ip()),
            format!("https://{}:{}/", host, endpoint.port()),
        ),
        None => (HttpClient::new(request_timeout), format!("https://{}/", endpoint)),
    };
    let client = match client {
        Ok(client) => client,
        Err(e) => {
            debug!(error = %e, "could not build HSTS client");
            return None;
        }
    };

    match client.get(&url).await {
        Ok(response) => Some(hsts_enabled(response.header(STRICT_TRANSPORT_SECURITY.as_str()))),
        Err(e) => {
            debug!(%url, error = %e, "HSTS request failed");
            None
        }
    }
}

/// A policy without max-age is ignored by browsers
fn hsts_enabled(value: Option<&str>) -> bool {
    value.is_some_and(|v| v.to_ascii_lowercase().contains("max-age"))
}

/// Completes every handshake so broken certificates can still be inspected
#[derive(Debug)]
struct AcceptAnyCert(Arc<CryptoProvider>);

impl ServerCertVerifier for AcceptAnyCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rustls::pki_types::{PrivateKeyDer, PrivatePkcs8KeyDer};
    use rustls::ServerConfig;
    use shieldscan_core::{ScanDepth, Sensitivity};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use tokio_rustls::TlsAcceptor;

    fn cert(days_left: i64, self_issued: bool, key: (KeyAlgorithm, usize)) -> CertificateFacts {
        let now = Utc::now();
        CertificateFacts {
            subject: "CN=shop.example.com".into(),
            issuer: if self_issued {
                "CN=shop.example.com".into()
            } else {
                "CN=Example Issuing CA".into()
            },
            not_before: now - ChronoDuration::days(365),
            not_after: now + ChronoDuration::days(days_left),
            key_algorithm: key.0,
            key_bits: Some(key.1),
        }
    }

    fn observation(certificate: CertificateFacts, chain: ChainStatus) -> TlsObservation {
        TlsObservation {
            endpoint: "10.0.0.10:443".parse().unwrap(),
            protocol: TlsProtocol::Tls13,
            cipher_suite: Some("TLS13_AES_256_GCM_SHA384".into()),
            weak_suites: WeakSuiteVerdict::Rejected,
            certificate: Some(certificate),
            chain,
            hsts: Some(true),
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_all_checks_pass() {
        let obs = observation(cert(200, false, (KeyAlgorithm::Rsa, 2048)), ChainStatus::Trusted);
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_total, 8);
        assert_eq!(result.checks_passed, 8);
        assert_eq!(result.score, 100.0);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_expired_self_signed_is_capped() {
        let obs = observation(cert(-10, true, (KeyAlgorithm::Rsa, 2048)), ChainStatus::SelfSigned);
        let result = TlsModule::evaluate(&obs);

        assert!(result.score <= CRITICAL_CAP);
        let severities: Vec<_> = result.findings.iter().map(|f| (f.severity, f.title.as_str())).collect();
        assert!(severities.contains(&(Severity::Critical, "Certificate expired")));
        assert!(severities.contains(&(Severity::Low, "Self-signed certificate")));
        // Expiry is not double counted as "expires soon"
        assert!(!severities.iter().any(|(_, t)| *t == "Certificate expires soon"));
        assert_eq!(result.checks_warning, 1);
        assert_eq!(result.checks_failed(), 1);
    }

    #[test]
    fn test_near_expiry_and_weak_key() {
        let obs = observation(cert(12, false, (KeyAlgorithm::Rsa, 1024)), ChainStatus::Trusted);
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_passed, 6);
        assert_eq!(result.score, 75.0);
        assert!(result.findings.iter().all(|f| f.severity == Severity::Medium));
    }

    #[test]
    fn test_ec_key_threshold() {
        let ok = observation(cert(200, false, (KeyAlgorithm::Ec, 256)), ChainStatus::Trusted);
        assert_eq!(TlsModule::evaluate(&ok).checks_passed, 8);
        let weak = observation(cert(200, false, (KeyAlgorithm::Ec, 192)), ChainStatus::Trusted);
        assert_eq!(TlsModule::evaluate(&weak).checks_passed, 7);
    }

    #[test]
    fn test_incomplete_chain_and_weak_cipher() {
        let mut obs = observation(cert(200, false, (KeyAlgorithm::Rsa, 4096)), ChainStatus::Incomplete);
        obs.cipher_suite = Some("TLS_RSA_WITH_3DES_EDE_CBC_SHA".into());
        obs.hsts = Some(false);
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_passed, 5);
        let high = result.findings.iter().filter(|f| f.severity == Severity::High).count();
        assert_eq!(high, 2);
    }

    #[test]
    fn test_weak_suite_acceptance_fails_cipher_check() {
        let mut obs = observation(cert(200, false, (KeyAlgorithm::Rsa, 2048)), ChainStatus::Trusted);
        obs.weak_suites = WeakSuiteVerdict::Accepted("TLS_RSA_WITH_RC4_128_SHA".into());
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_passed, 7);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].severity, Severity::High);
        assert_eq!(result.findings[0].title, "Weak cipher suite accepted");
        assert!(result.findings[0].description.contains("RC4_128_SHA"));
    }

    #[test]
    fn test_unanswered_checks_are_warnings_not_passes() {
        let mut obs = observation(cert(200, false, (KeyAlgorithm::Rsa, 2048)), ChainStatus::Trusted);
        obs.weak_suites = WeakSuiteVerdict::NotEvaluated;
        obs.hsts = None;
        let result = TlsModule::evaluate(&obs);

        assert_eq!(result.checks_total, 8);
        assert_eq!(result.checks_passed, 6);
        assert_eq!(result.checks_warning, 2);
        assert_eq!(result.checks_failed(), 0);
        assert_eq!(result.score, 75.0);
        assert!(result.findings.is_empty());
    }

    #[test]
    fn test_legacy_handshake_reports_every_check() {
        let obs = TlsObservation {
            endpoint: "10.0.0.10:443".parse().unwrap(),
            protocol: TlsProtocol::Legacy,
            cipher_suite: None,
            weak_suites: WeakSuiteVerdict::Accepted("TLS_RSA_WITH_3DES_EDE_CBC_SHA".into()),
            certificate: None,
            chain: ChainStatus::Incomplete,
            hsts: None,
            observed_at: Utc::now(),
        };
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_total, CHECKS.len() as u32);
        assert_eq!(result.checks_passed, 0);
        assert_eq!(result.checks_warning, 6);
        assert_eq!(result.checks_failed(), 2);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.findings.len(), 2);
        assert!(result.findings.iter().all(|f| f.severity == Severity::High));

        let skipped = result.findings[0].evidence["not_evaluated"].as_array().unwrap();
        assert_eq!(skipped.len(), 6);
        assert!(skipped.contains(&serde_json::json!("hsts-header")));

        // Same totals when the legacy hello is refused too
        let obs = TlsObservation {
            weak_suites: WeakSuiteVerdict::Rejected,
            ..obs
        };
        let result = TlsModule::evaluate(&obs);
        assert_eq!(result.checks_total, 8);
        assert_eq!(result.checks_passed, 1);
        assert_eq!(result.score, 12.5);
    }

    #[test]
    fn test_hsts_value() {
        assert!(hsts_enabled(Some("max-age=63072000; includeSubDomains")));
        assert!(hsts_enabled(Some("Max-Age=1")));
        assert!(!hsts_enabled(Some("includeSubDomains")));
        assert!(!hsts_enabled(None));
    }

    #[tokio::test]
    async fn test_unreachable_port_is_module_error() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let module = TlsModule::new().with_port(port);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);
        let err = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap_err();
        assert!(matches!(err, ModuleError::Unreachable(_)));
    }

    /// HTTPS origin on loopback answering each request with `response`
    async fn https_server(
        cert: rustls::pki_types::CertificateDer<'static>,
        key: PrivateKeyDer<'static>,
        response: &'static [u8],
    ) -> u16 {
        let server_config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
            .with_safe_default_protocol_versions()
            .unwrap()
            .with_no_client_auth()
            .with_single_cert(vec![cert], key)
            .unwrap();
        let acceptor = TlsAcceptor::from(Arc::new(server_config));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let acceptor = acceptor.clone();
                tokio::spawn(async move {
                    let Ok(mut tls) = acceptor.accept(sock).await else {
                        return;
                    };
                    let mut buf = [0u8; 4096];
                    if matches!(tls.read(&mut buf).await, Ok(n) if n > 0) {
                        let _ = tls.write_all(response).await;
                    }
                    let _ = tls.shutdown().await;
                });
            }
        });
        port
    }

    #[tokio::test]
    async fn test_live_self_signed_server() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let port = https_server(
            cert.der().clone(),
            key,
            b"HTTP/1.1 200 OK\r\nStrict-Transport-Security: max-age=31536000\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;

        let module = TlsModule::new().with_port(port);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);
        let result = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap();

        // rustls refuses every legacy suite, and HSTS comes back over reqwest
        assert_eq!(result.checks_total, 8);
        assert_eq!(result.checks_passed, 7);
        assert_eq!(result.findings.len(), 1);
        assert_eq!(result.findings[0].title, "Self-signed certificate");
        assert_eq!(result.findings[0].target_port, Some(port));
        assert_eq!(result.findings[0].evidence["weak_suites"]["verdict"], "rejected");
    }

    #[tokio::test]
    async fn test_live_server_without_hsts() {
        let rcgen::CertifiedKey { cert, key_pair } =
            rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));
        let port = https_server(
            cert.der().clone(),
            key,
            b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\nConnection: close\r\n\r\nok",
        )
        .await;

        let module = TlsModule::new().with_port(port);
        let target = ScanTarget::parse("127.0.0.1").unwrap();
        let profile = ScanProfile::new("s", ScanDepth::Quick, Sensitivity::Safe);
        let result = module
            .run(&target, &["127.0.0.1".parse().unwrap()], &profile)
            .await
            .unwrap();

        assert!(result
            .findings
            .iter()
            .any(|f| f.title == "HSTS header missing" && f.severity == Severity::Medium));
        assert_eq!(result.checks_passed, 6);
    }
}

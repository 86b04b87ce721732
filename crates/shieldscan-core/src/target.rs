//! Scan target definitions, syntax validation and resolution

use crate::error::{Error, Result};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::str::FromStr;
use tracing::debug;

/// Kind of target a scan runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Ip,
    Domain,
    Cidr,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TargetType::Ip => "ip",
            TargetType::Domain => "domain",
            TargetType::Cidr => "cidr",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ip" => Some(TargetType::Ip),
            "domain" => Some(TargetType::Domain),
            "cidr" => Some(TargetType::Cidr),
            _ => None,
        }
    }
}

impl std::fmt::Display for TargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A syntactically valid scan target
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "lowercase")]
pub enum ScanTarget {
    /// Single IP address
    Ip(IpAddr),

    /// CIDR notation (e.g., "192.168.1.0/24")
    Cidr(IpNetwork),

    /// Domain name (e.g., "server.example.com")
    Domain(String),
}

impl ScanTarget {
    /// Parse a target from a string, auto-detecting the type
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::InvalidTarget("empty target".into()));
        }

        if s.contains('/') {
            let network = IpNetwork::from_str(s)
                .map_err(|e| Error::InvalidTarget(format!("invalid CIDR '{}': {}", s, e)))?;
            return Ok(ScanTarget::Cidr(network));
        }

        if let Ok(ip) = s.parse::<IpAddr>() {
            return Ok(ScanTarget::Ip(ip));
        }

        if is_valid_domain(s) {
            return Ok(ScanTarget::Domain(s.trim_end_matches('.').to_ascii_lowercase()));
        }

        Err(Error::InvalidTarget(format!(
            "'{}' is not an IP address, CIDR block or domain name",
            s
        )))
    }

    /// Parse a target and check it against an explicitly declared type
    pub fn parse_as(s: &str, expected: TargetType) -> Result<Self> {
        let target = Self::parse(s).map_err(|_| Error::TargetTypeMismatch {
            target: s.to_string(),
            expected: expected.to_string(),
        })?;
        if target.target_type() != expected {
            return Err(Error::TargetTypeMismatch {
                target: s.to_string(),
                expected: expected.to_string(),
            });
        }
        Ok(target)
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            ScanTarget::Ip(_) => TargetType::Ip,
            ScanTarget::Cidr(_) => TargetType::Cidr,
            ScanTarget::Domain(_) => TargetType::Domain,
        }
    }

    /// Host name to present to services (SNI, Host header)
    pub fn host(&self) -> Option<&str> {
        match self {
            ScanTarget::Domain(name) => Some(name),
            _ => None,
        }
    }

    /// Number of host addresses the target expands to
    pub fn host_count(&self) -> u128 {
        match self {
            ScanTarget::Ip(_) | ScanTarget::Domain(_) => 1,
            ScanTarget::Cidr(IpNetwork::V4(net)) => {
                let size = net.size() as u128;
                if net.prefix() < 31 {
                    size.saturating_sub(2)
                } else {
                    size
                }
            }
            ScanTarget::Cidr(IpNetwork::V6(net)) => net.size(),
        }
    }

    /// Resolve the target to the concrete addresses modules will probe.
    ///
    /// CIDR blocks are expanded to their host addresses (network and
    /// broadcast excluded for IPv4 prefixes shorter than /31) and must not
    /// exceed `max_hosts`.
    pub async fn resolve(&self, max_hosts: usize) -> Result<Vec<IpAddr>> {
        match self {
            ScanTarget::Ip(ip) => Ok(vec![*ip]),
            ScanTarget::Domain(name) => {
                let addrs = tokio::net::lookup_host((name.as_str(), 0))
                    .await
                    .map_err(|e| {
                        debug!(hostname = %name, error = %e, "DNS lookup failed");
                        Error::DnsResolutionFailed {
                            hostname: name.clone(),
                        }
                    })?;

                let unique: BTreeSet<IpAddr> = addrs.map(|a| a.ip()).collect();
                if unique.is_empty() {
                    return Err(Error::DnsResolutionFailed {
                        hostname: name.clone(),
                    });
                }
                Ok(unique.into_iter().collect())
            }
            ScanTarget::Cidr(network) => {
                if self.host_count() > max_hosts as u128 {
                    return Err(Error::InvalidTarget(format!(
                        "CIDR {} expands to {} hosts, limit is {}",
                        network,
                        self.host_count(),
                        max_hosts
                    )));
                }
                Ok(cidr_hosts(network))
            }
        }
    }

    /// Get a display string for the target
    pub fn display(&self) -> String {
        match self {
            ScanTarget::Ip(ip) => ip.to_string(),
            ScanTarget::Cidr(net) => net.to_string(),
            ScanTarget::Domain(name) => name.clone(),
        }
    }
}

impl std::fmt::Display for ScanTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

fn cidr_hosts(network: &IpNetwork) -> Vec<IpAddr> {
    match network {
        IpNetwork::V4(net) if net.prefix() < 31 => {
            let network_addr = net.network();
            let broadcast = net.broadcast();
            net.iter()
                .filter(|ip| *ip != network_addr && *ip != broadcast)
                .map(IpAddr::V4)
                .collect()
        }
        IpNetwork::V4(net) => net.iter().map(IpAddr::V4).collect(),
        IpNetwork::V6(net) => net.iter().map(IpAddr::V6).collect(),
    }
}

/// RFC 1123 host name syntax: dot-separated labels of letters, digits and
/// hyphens, no label starting or ending with a hyphen.
fn is_valid_domain(s: &str) -> bool {
    let s = s.trim_end_matches('.');
    if s.is_empty() || s.len() > 253 {
        return false;
    }
    // An all-numeric dotted string that failed IP parsing is a typo, not a host
    if s.split('.').all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }
    s.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

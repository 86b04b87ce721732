//! Service detection - identify services from banners, falling back to the port number

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Information about a detected service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Lower-cased service name (e.g., "ssh", "http", "redis")
    pub name: String,
    /// Product name (e.g., "openssh", "apache", "nginx")
    pub product: Option<String>,
    pub version: Option<String>,
    /// 0-100; banner matches are high, port guesses low
    pub confidence: u8,
}

impl ServiceInfo {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_lowercase(),
            product: None,
            version: None,
            confidence: 50,
        }
    }

    pub fn with_product(mut self, product: &str) -> Self {
        self.product = Some(product.to_lowercase());
        self
    }

    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    pub fn with_confidence(mut self, confidence: u8) -> Self {
        self.confidence = confidence.min(100);
        self
    }

    /// "product/version" when both are known
    pub fn product_version(&self) -> Option<String> {
        Some(format!("{}/{}", self.product.as_ref()?, self.version.as_ref()?))
    }
}

/// Service detector using banner matching
pub struct ServiceDetector {
    patterns: Vec<ServicePattern>,
}

struct ServicePattern {
    regex: Regex,
    service: &'static str,
    /// Fixed product name, used when the regex has no product group
    product: Option<&'static str>,
    product_group: Option<usize>,
    version_group: Option<usize>,
}

impl ServicePattern {
    fn new(pattern: &str, service: &'static str) -> Option<Self> {
        Regex::new(pattern).ok().map(|regex| Self {
            regex,
            service,
            product: None,
            product_group: None,
            version_group: None,
        })
    }

    fn product(mut self, product: &'static str) -> Self {
        self.product = Some(product);
        self
    }

    fn groups(mut self, product: Option<usize>, version: Option<usize>) -> Self {
        self.product_group = product;
        self.version_group = version;
        self
    }
}

impl ServiceDetector {
    /// Create a new service detector with default patterns
    pub fn new() -> Self {
        Self {
            patterns: default_patterns(),
        }
    }

    /// Detect service from a banner string, falling back to the port map
    pub fn detect(&self, banner: Option<&str>, port: u16) -> Option<ServiceInfo> {
        banner
            .and_then(|b| self.detect_from_banner(b))
            .or_else(|| self.detect_from_port(port))
    }

    /// Match a banner against the pattern table, first match wins
    pub fn detect_from_banner(&self, banner: &str) -> Option<ServiceInfo> {
        for pattern in &self.patterns {
            let Some(caps) = pattern.regex.captures(banner) else {
                continue;
            };

            let mut info = ServiceInfo::new(pattern.service).with_confidence(90);

            let product = pattern
                .product_group
                .and_then(|g| caps.get(g))
                .map(|m| m.as_str().trim())
                .or(pattern.product);
            if let Some(product) = product {
                info = info.with_product(product);
            }

            if let Some(version) = pattern.version_group.and_then(|g| caps.get(g)) {
                info = info.with_version(version.as_str());
            }

            debug!(
                service = %info.name,
                product = ?info.product,
                version = ?info.version,
                "detected service from banner"
            );
            return Some(info);
        }
        None
    }

    /// Detect service based on port number (low confidence)
    pub fn detect_from_port(&self, port: u16) -> Option<ServiceInfo> {
        let service = match port {
            21 => "ftp",
            22 => "ssh",
            23 => "telnet",
            25 | 465 | 587 => "smtp",
            53 => "dns",
            80 | 81 | 8000 | 8008 | 8080 | 8081 | 8888 => "http",
            110 | 995 => "pop3",
            111 => "rpcbind",
            135 => "msrpc",
            137..=139 => "netbios",
            143 | 993 => "imap",
            389 | 636 => "ldap",
            443 | 4443 | 8443 | 9443 => "https",
            445 => "smb",
            1433 => "mssql",
            1521 => "oracle",
            2049 => "nfs",
            2375 | 2376 => "docker",
            3306 => "mysql",
            3389 => "rdp",
            5432 => "postgresql",
            5672 => "amqp",
            5900..=5999 => "vnc",
            6379 => "redis",
            9200 | 9300 => "elasticsearch",
            11211 => "memcached",
            27017 | 27018 => "mongodb",
            _ => return None,
        };

        Some(ServiceInfo::new(service).with_confidence(30))
    }
}

impl Default for ServiceDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Build default service detection patterns. Specific products come before
/// the generic `Server:` header pattern.
fn default_patterns() -> Vec<ServicePattern> {
    [
        ServicePattern::new(r"SSH-[\d.]+-OpenSSH[_-](\d+\.\d+(?:p\d+)?)", "ssh")
            .map(|p| p.product("openssh").groups(None, Some(1))),
        ServicePattern::new(r"SSH-[\d.]+-([A-Za-z][\w.-]*?)(?:[_-](\d+[\d.]*))?(?:\s|$)", "ssh")
            .map(|p| p.groups(Some(1), Some(2))),
        ServicePattern::new(r"Apache(?:/(\d+\.\d+(?:\.\d+)?))?", "http")
            .map(|p| p.product("apache").groups(None, Some(1))),
        ServicePattern::new(r"nginx(?:/(\d+\.\d+(?:\.\d+)?))?", "http")
            .map(|p| p.product("nginx").groups(None, Some(1))),
        ServicePattern::new(r"Microsoft-IIS(?:/(\d+\.\d+))?", "http")
            .map(|p| p.product("iis").groups(None, Some(1))),
        ServicePattern::new(r"(?i)server:\s*([^\r\n/ ]+)(?:/(\d+[\d.]*))?", "http")
            .map(|p| p.groups(Some(1), Some(2))),
        ServicePattern::new(r"^HTTP/\d", "http"),
        ServicePattern::new(r"220[- ].*\b(vsftpd|ProFTPD|Pure-FTPd|FileZilla)\s*(\d+[\d.]*)?", "ftp")
            .map(|p| p.groups(Some(1), Some(2))),
        ServicePattern::new(r"220[- ].*\b(Postfix|Sendmail|Exim|Exchange)\b", "smtp")
            .map(|p| p.groups(Some(1), None)),
        ServicePattern::new(r"(\d+\.\d+\.\d+)-MariaDB", "mysql")
            .map(|p| p.product("mariadb").groups(None, Some(1))),
        ServicePattern::new(r"(\d+\.\d+\.\d+)[\x00-\x7f]*?mysql_native_password", "mysql")
            .map(|p| p.product("mysql").groups(None, Some(1))),
        ServicePattern::new(r"PostgreSQL\s*(\d+(?:\.\d+)*)", "postgresql")
            .map(|p| p.product("postgresql").groups(None, Some(1))),
        ServicePattern::new(r"redis_version:(\d+\.\d+\.\d+)", "redis")
            .map(|p| p.product("redis").groups(None, Some(1))),
        ServicePattern::new(r"^\+PONG|^-NOAUTH|^-DENIED", "redis").map(|p| p.product("redis")),
        ServicePattern::new(r"^VERSION (\d+\.\d+\.\d+)", "memcached")
            .map(|p| p.product("memcached").groups(None, Some(1))),
        ServicePattern::new(r"MongoDB|mongod", "mongodb"),
        ServicePattern::new(r"^RFB \d{3}\.\d{3}", "vnc"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

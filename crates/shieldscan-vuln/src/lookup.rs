//! External vulnerability lookup
//!
//! The CVE module treats vulnerability intelligence (CVSS, EPSS, CISA KEV,
//! ATT&CK mapping) as a black box behind [`VulnerabilityLookup`]. Two
//! implementations ship here: a static JSON feed and a REST client.

use crate::matcher::{canonical_product, VersionRange};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum LookupError {
    #[error("failed to read feed: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed feed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("lookup request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("lookup service returned HTTP {0}")]
    Status(u16),
}

/// What the CVE module knows about a service it fingerprinted
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceFingerprint {
    pub service: String,
    pub product: Option<String>,
    pub version: Option<String>,
}

/// One known vulnerability affecting a fingerprint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VulnRecord {
    pub cve_id: String,
    #[serde(default)]
    pub cvss_score: Option<f32>,
    #[serde(default)]
    pub epss_score: Option<f32>,
    #[serde(default)]
    pub cisa_kev: bool,
    #[serde(default)]
    pub attack_technique: Option<String>,
    #[serde(default)]
    pub attack_tactic: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    /// First release that is no longer affected
    #[serde(default)]
    pub fixed_version: Option<String>,
}

#[async_trait]
pub trait VulnerabilityLookup: Send + Sync {
    /// Short name for logs ("static-feed", "rest")
    fn source(&self) -> &str;

    async fn lookup(&self, fingerprint: &ServiceFingerprint) -> Result<Vec<VulnRecord>, LookupError>;
}

/// Feed entry: a record plus the product versions it applies to
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedEntry {
    pub product: String,
    /// Empty means every version of the product
    #[serde(default)]
    pub versions: Vec<VersionRange>,
    #[serde(flatten)]
    pub record: VulnRecord,
}

impl FeedEntry {
    fn matches(&self, product: &str, version: Option<&str>) -> bool {
        if canonical_product(&self.product) != product {
            return false;
        }
        if self.versions.is_empty() {
            return true;
        }
        version.is_some_and(|v| self.versions.iter().any(|r| r.contains(v)))
    }
}

/// Vulnerability records loaded from a JSON array of [`FeedEntry`]
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    entries: Vec<FeedEntry>,
}

impl StaticFeed {
    pub fn new(entries: Vec<FeedEntry>) -> Self {
        Self { entries }
    }

    pub fn from_json(json: &str) -> Result<Self, LookupError> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LookupError> {
        let path = path.as_ref();
        let feed = Self::from_json(&std::fs::read_to_string(path)?)?;
        info!(path = %path.display(), entries = feed.len(), "loaded vulnerability feed");
        Ok(feed)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl VulnerabilityLookup for StaticFeed {
    fn source(&self) -> &str {
        "static-feed"
    }

    async fn lookup(&self, fingerprint: &ServiceFingerprint) -> Result<Vec<VulnRecord>, LookupError> {
        let Some(product) = fingerprint.product.as_deref().map(canonical_product) else {
            return Ok(Vec::new());
        };
        Ok(self
            .entries
            .iter()
            .filter(|e| e.matches(&product, fingerprint.version.as_deref()))
            .map(|e| e.record.clone())
            .collect())
    }
}

/// Client for a remote lookup service exposing
/// `GET {endpoint}/lookup?service=&product=&version=` → `[VulnRecord]`
pub struct RestLookup {
    client: reqwest::Client,
    endpoint: String,
}

impl RestLookup {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, LookupError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent("ShieldScan/0.1")
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl VulnerabilityLookup for RestLookup {
    fn source(&self) -> &str {
        "rest"
    }

    async fn lookup(&self, fingerprint: &ServiceFingerprint) -> Result<Vec<VulnRecord>, LookupError> {
        let url = format!("{}/lookup", self.endpoint);
        let mut query = vec![("service", fingerprint.service.as_str())];
        if let Some(product) = &fingerprint.product {
            query.push(("product", product.as_str()));
        }
        if let Some(version) = &fingerprint.version {
            query.push(("version", version.as_str()));
        }

        debug!(%url, service = %fingerprint.service, "querying lookup service");
        let response = self.client.get(&url).query(&query).send().await?;
        if !response.status().is_success() {
            return Err(LookupError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

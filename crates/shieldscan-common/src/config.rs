//! Configuration management for ShieldScan components

use serde::{Deserialize, Serialize};
use shieldscan_core::{Error, Result, ScanDepth};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// HTTP API settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Scanner settings
    #[serde(default)]
    pub scanner: ScannerConfig,

    /// Scan store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Module weights used by the scorer
    #[serde(default)]
    pub weights: WeightTable,

    /// External vulnerability data
    #[serde(default)]
    pub vuln: VulnConfig,

    /// Asset-discovery feed
    #[serde(default)]
    pub assets: AssetsConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| Error::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Create a configuration builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Merge with environment variables (SHIELDSCAN_ prefix)
    pub fn merge_env(self) -> Self {
        self.merge_from(|key| std::env::var(key).ok())
    }

    fn merge_from(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        // Server settings
        if let Some(val) = var("SHIELDSCAN_HOST") {
            self.server.host = val;
        }
        if let Some(n) = var("SHIELDSCAN_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = n;
        }

        // Scanner settings
        if let Some(n) = var("SHIELDSCAN_MAX_CONCURRENT_SCANS").and_then(|v| v.parse().ok()) {
            self.scanner.max_concurrent_scans = n;
        }

        // Store
        if let Some(val) = var("SHIELDSCAN_DB_PATH") {
            self.store.path = val;
        }

        // Vulnerability lookup
        if let Some(val) = var("SHIELDSCAN_VULN_ENDPOINT") {
            self.vuln.endpoint = Some(val);
        }

        // Logging
        if let Some(val) = var("SHIELDSCAN_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = var("SHIELDSCAN_LOG_FORMAT") {
            self.logging.format = val;
        }

        self
    }

    /// Reject values that would make the engine misbehave
    pub fn validate(&self) -> Result<()> {
        if self.scanner.max_concurrent_scans == 0 {
            return Err(Error::InvalidConfig {
                key: "scanner.max_concurrent_scans".into(),
                message: "must be at least 1".into(),
            });
        }
        if self.scanner.module_workers == 0 {
            return Err(Error::InvalidConfig {
                key: "scanner.module_workers".into(),
                message: "must be at least 1".into(),
            });
        }
        for (module, weight) in &self.weights.0 {
            if !weight.is_finite() || *weight <= 0.0 {
                return Err(Error::InvalidConfig {
                    key: format!("weights.{}", module),
                    message: format!("weight must be positive, got {}", weight),
                });
            }
        }
        Ok(())
    }
}

/// HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    String::from("127.0.0.1")
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// What to do when a scan is submitted for a target that already has one in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Hand back the in-flight scan id
    #[default]
    ReturnExisting,
    /// Refuse the submission
    Reject,
}

/// Scanner-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    /// Maximum scans executing at once
    #[serde(default = "default_max_scans")]
    pub max_concurrent_scans: usize,

    /// Modules run concurrently within one scan
    #[serde(default = "default_module_workers")]
    pub module_workers: usize,

    /// Largest CIDR block (in hosts) accepted as a target
    #[serde(default = "default_max_cidr_hosts")]
    pub max_cidr_hosts: usize,

    /// Concurrent connect attempts inside the port scanner
    #[serde(default = "default_port_concurrency")]
    pub port_concurrency: usize,

    #[serde(default = "default_socket_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_socket_timeout_ms")]
    pub banner_timeout_ms: u64,

    /// Per-module time budget by scan depth
    #[serde(default)]
    pub timeouts: DepthTimeouts,

    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,
}

fn default_max_scans() -> usize {
    4
}

fn default_module_workers() -> usize {
    4
}

fn default_max_cidr_hosts() -> usize {
    256
}

fn default_port_concurrency() -> usize {
    100
}

fn default_socket_timeout_ms() -> u64 {
    1500
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_scans: default_max_scans(),
            module_workers: default_module_workers(),
            max_cidr_hosts: default_max_cidr_hosts(),
            port_concurrency: default_port_concurrency(),
            connect_timeout_ms: default_socket_timeout_ms(),
            banner_timeout_ms: default_socket_timeout_ms(),
            timeouts: DepthTimeouts::default(),
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

impl ScannerConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.banner_timeout_ms)
    }
}

/// Module time budget in seconds for each scan depth
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthTimeouts {
    #[serde(default = "default_quick_secs")]
    pub quick: u64,
    #[serde(default = "default_standard_secs")]
    pub standard: u64,
    #[serde(default = "default_deep_secs")]
    pub deep: u64,
}

fn default_quick_secs() -> u64 {
    30
}

fn default_standard_secs() -> u64 {
    120
}

fn default_deep_secs() -> u64 {
    600
}

impl Default for DepthTimeouts {
    fn default() -> Self {
        Self {
            quick: default_quick_secs(),
            standard: default_standard_secs(),
            deep: default_deep_secs(),
        }
    }
}

impl DepthTimeouts {
    pub fn for_depth(&self, depth: ScanDepth) -> Duration {
        let secs = match depth {
            ScanDepth::Quick => self.quick,
            ScanDepth::Standard => self.standard,
            ScanDepth::Deep => self.deep,
        };
        Duration::from_secs(secs)
    }
}

/// Scan store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path (":memory:" for an ephemeral store)
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    String::from("shieldscan.db")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Weight used for modules with no entry in the table
pub const DEFAULT_MODULE_WEIGHT: f64 = 10.0;

/// Per-module scoring weights, injectable from configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeightTable(pub BTreeMap<String, f64>);

impl Default for WeightTable {
    fn default() -> Self {
        let weights = [("tls", 30.0), ("ports", 25.0), ("headers", 15.0), ("cve", 30.0)];
        Self(
            weights
                .into_iter()
                .map(|(name, weight)| (name.to_string(), weight))
                .collect(),
        )
    }
}

impl WeightTable {
    pub fn weight(&self, module: &str) -> f64 {
        self.0.get(module).copied().unwrap_or(DEFAULT_MODULE_WEIGHT)
    }

    pub fn set(&mut self, module: impl Into<String>, weight: f64) {
        self.0.insert(module.into(), weight);
    }
}

/// External vulnerability data sources for the CVE module
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VulnConfig {
    /// JSON file of vulnerability records
    pub feed_path: Option<String>,

    /// Base URL of a REST lookup service
    pub endpoint: Option<String>,

    #[serde(default = "default_lookup_timeout")]
    pub request_timeout_seconds: u64,
}

fn default_lookup_timeout() -> u64 {
    10
}

/// Asset-discovery feed used to seed scans
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssetsConfig {
    pub feed_path: Option<String>,

    #[serde(default)]
    pub seed_on_start: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json, compact)
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    String::from("info")
}

fn default_log_format() -> String {
    String::from("pretty")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

/// Builder for constructing Config
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.config.server.host = host.into();
        self.config.server.port = port;
        self
    }

    pub fn store_path(mut self, path: impl Into<String>) -> Self {
        self.config.store.path = path.into();
        self
    }

    pub fn duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.config.scanner.duplicate_policy = policy;
        self
    }

    pub fn weight(mut self, module: impl Into<String>, weight: f64) -> Self {
        self.config.weights.set(module, weight);
        self
    }

    pub fn vuln_feed(mut self, path: impl Into<String>) -> Self {
        self.config.vuln.feed_path = Some(path.into());
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [server]
            host = "0.0.0.0"
            port = 9090

            [scanner]
            max_concurrent_scans = 10
            duplicate_policy = "reject"

            [scanner.timeouts]
            quick = 5

            [weights]
            tls = 40
            dns = 12.5

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.server.bind_addr(), "0.0.0.0:9090");
        assert_eq!(config.scanner.max_concurrent_scans, 10);
        assert_eq!(config.scanner.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.scanner.timeouts.for_depth(ScanDepth::Quick), Duration::from_secs(5));
        assert_eq!(
            config.scanner.timeouts.for_depth(ScanDepth::Deep),
            Duration::from_secs(600)
        );
        assert_eq!(config.weights.weight("tls"), 40.0);
        assert_eq!(config.weights.weight("dns"), 12.5);
        // A user-supplied table replaces the defaults wholesale
        assert_eq!(config.weights.weight("ports"), DEFAULT_MODULE_WEIGHT);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.weights.weight("tls"), 30.0);
        assert_eq!(config.weights.weight("ports"), 25.0);
        assert_eq!(config.weights.weight("owasp"), DEFAULT_MODULE_WEIGHT);
        assert_eq!(config.scanner.duplicate_policy, DuplicatePolicy::ReturnExisting);
        assert_eq!(config.scanner.max_cidr_hosts, 256);
    }

    #[test]
    fn test_rejects_non_positive_weight() {
        let err = Config::from_toml("[weights]\ntls = 0\n").unwrap_err();
        assert!(matches!(err, Error::InvalidConfig { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SHIELDSCAN_PORT", "7000"),
            ("SHIELDSCAN_DB_PATH", ":memory:"),
            ("SHIELDSCAN_MAX_CONCURRENT_SCANS", "not-a-number"),
            ("SHIELDSCAN_VULN_ENDPOINT", "http://vuln.internal"),
        ]
        .into_iter()
        .collect();

        let config = Config::default().merge_from(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.server.port, 7000);
        assert_eq!(config.store.path, ":memory:");
        assert_eq!(config.scanner.max_concurrent_scans, 4);
        assert_eq!(config.vuln.endpoint.as_deref(), Some("http://vuln.internal"));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shieldscan.toml");
        std::fs::write(&path, "[store]\npath = \"/tmp/x.db\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.store.path, "/tmp/x.db");

        assert!(Config::from_file(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn test_config_builder() {
        let config = Config::builder()
            .bind("0.0.0.0", 1234)
            .weight("dns", 7.0)
            .duplicate_policy(DuplicatePolicy::Reject)
            .log_level("warn")
            .build();

        assert_eq!(config.server.port, 1234);
        assert_eq!(config.weights.weight("dns"), 7.0);
        assert_eq!(config.logging.level, "warn");
    }
}

//! ShieldScan Server - scan engine with REST API
//!
//! Daemon mode serves the API over a SQLite-backed store. `--one-shot` runs a
//! single scan against an in-memory store and prints the result as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use shieldscan_api::ApiServer;
use shieldscan_common::{init_logging_with_config, Config, LogConfig, LogFormat};
use shieldscan_core::{ScanDepth, Sensitivity};
use shieldscan_engine::{
    default_registry, load_assets, seed_targets, MemoryStore, Orchestrator, ScanRequest,
    ScanStore, SqliteStore,
};
use shieldscan_vuln::{RestLookup, StaticFeed, VulnerabilityLookup};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// ShieldScan breach-and-attack-simulation engine
#[derive(Parser, Debug)]
#[command(name = "shieldscan-server")]
#[command(version)]
#[command(about = "Security posture scan engine", long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/shieldscan/shieldscan.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides config
    #[arg(long)]
    log_level: Option<String>,

    /// Log format (pretty, json, compact); overrides config
    #[arg(long)]
    log_format: Option<String>,

    /// Run a single scan, print it and exit
    #[arg(long)]
    one_shot: bool,

    /// Target for one-shot scan (IP, domain or CIDR)
    #[arg(long)]
    target: Option<String>,

    /// Scan depth for one-shot scan
    #[arg(long, value_parser = parse_depth)]
    depth: Option<ScanDepth>,

    /// Comma-separated modules for one-shot scan (default: all)
    #[arg(long, value_delimiter = ',')]
    modules: Vec<String>,

    /// Sensitivity for one-shot scan
    #[arg(long, value_parser = parse_sensitivity)]
    sensitivity: Option<Sensitivity>,
}

fn parse_depth(s: &str) -> std::result::Result<ScanDepth, String> {
    ScanDepth::parse(s).ok_or_else(|| format!("unknown depth '{}' (quick, standard, deep)", s))
}

fn parse_sensitivity(s: &str) -> std::result::Result<Sensitivity, String> {
    Sensitivity::parse(s)
        .ok_or_else(|| format!("unknown sensitivity '{}' (safe, cautious, fragile)", s))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config)?;

    let level = args.log_level.clone().unwrap_or_else(|| config.logging.level.clone());
    let format = args.log_format.clone().unwrap_or_else(|| config.logging.format.clone());
    init_logging_with_config(LogConfig::new().level(level).format(LogFormat::parse(&format)))
        .context("failed to initialise logging")?;

    info!(version = env!("CARGO_PKG_VERSION"), "ShieldScan starting");

    let lookup = build_lookup(&config)?;
    let registry = default_registry(&config, lookup);

    if args.one_shot {
        run_one_shot(&args, &config, registry).await
    } else {
        run_server(&config, registry).await
    }
}

fn load_config(path: &str) -> Result<Config> {
    let config = if Path::new(path).exists() {
        Config::from_file(path).with_context(|| format!("failed to load config {}", path))?
    } else {
        Config::default()
    };
    let config = config.merge_env();
    config.validate().context("invalid configuration")?;
    Ok(config)
}

/// Static feed when configured, else the REST service, else an empty feed
fn build_lookup(config: &Config) -> Result<Arc<dyn VulnerabilityLookup>> {
    if let Some(path) = &config.vuln.feed_path {
        let feed = StaticFeed::from_file(path)
            .with_context(|| format!("failed to load vulnerability feed {}", path))?;
        return Ok(Arc::new(feed));
    }
    if let Some(endpoint) = &config.vuln.endpoint {
        let timeout = Duration::from_secs(config.vuln.request_timeout_seconds);
        let lookup = RestLookup::new(endpoint.as_str(), timeout)
            .with_context(|| format!("failed to build lookup client for {}", endpoint))?;
        info!(%endpoint, "using REST vulnerability lookup");
        return Ok(Arc::new(lookup));
    }
    warn!("no vulnerability source configured; cve module will find nothing");
    Ok(Arc::new(StaticFeed::default()))
}

async fn run_server(config: &Config, registry: shieldscan_engine::ModuleRegistry) -> Result<()> {
    let store = SqliteStore::open(&config.store.path)
        .with_context(|| format!("failed to open scan store {}", config.store.path))?;
    info!(path = %config.store.path, "scan store ready");

    let orchestrator = Orchestrator::new(registry, Arc::new(store), config.scanner.clone());

    let recovered = orchestrator
        .recover()
        .await
        .context("failed to recover unfinished scans")?;
    if recovered > 0 {
        warn!(recovered, "marked scans interrupted by the previous run as failed");
    }

    if config.assets.seed_on_start {
        if let Some(path) = &config.assets.feed_path {
            seed(&orchestrator, path).await?;
        }
    }

    info!(
        max_concurrent_scans = config.scanner.max_concurrent_scans,
        modules = ?orchestrator.catalog().iter().map(|m| m.name.as_str()).collect::<Vec<_>>(),
        "engine ready"
    );

    ApiServer::new(orchestrator)
        .run(&config.server.bind_addr(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("Shutting down...");
        })
        .await
}

/// Submit one default scan per discovered asset
async fn seed(orchestrator: &Orchestrator, path: &str) -> Result<()> {
    let assets = load_assets(path).with_context(|| format!("failed to load asset feed {}", path))?;
    for target in seed_targets(&assets) {
        match orchestrator.submit(ScanRequest::new(target.as_str())).await {
            Ok(submission) => info!(%target, scan_id = %submission.scan.id, "seeded scan"),
            Err(e) => warn!(%target, error = %e, "could not seed scan"),
        }
    }
    Ok(())
}

async fn run_one_shot(
    args: &Args,
    config: &Config,
    registry: shieldscan_engine::ModuleRegistry,
) -> Result<()> {
    let target = args
        .target
        .clone()
        .context("--target required for one-shot mode")?;

    let store = Arc::new(MemoryStore::new());
    let orchestrator = Orchestrator::new(registry, store.clone(), config.scanner.clone());

    let mut request = ScanRequest::new(target.as_str());
    request.depth = args.depth;
    request.sensitivity = args.sensitivity;
    if !args.modules.is_empty() {
        request.modules = Some(args.modules.clone());
    }

    info!(%target, "running one-shot scan");
    let submission = orchestrator.submit(request).await?;
    let scan = orchestrator
        .wait_for_terminal(&submission.scan.id, Duration::from_millis(250))
        .await?;
    let findings = store.findings(&scan.id).await?;

    let report = serde_json::json!({ "scan": scan, "findings": findings });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_one_shot_args() {
        let args = Args::try_parse_from([
            "shieldscan-server",
            "--one-shot",
            "--target",
            "10.0.0.10",
            "--depth",
            "quick",
            "--modules",
            "tls,ports",
            "--sensitivity",
            "cautious",
        ])
        .unwrap();
        assert!(args.one_shot);
        assert_eq!(args.depth, Some(ScanDepth::Quick));
        assert_eq!(args.modules, vec!["tls", "ports"]);
        assert_eq!(args.sensitivity, Some(Sensitivity::Cautious));
    }

    #[test]
    fn test_rejects_unknown_depth() {
        assert!(Args::try_parse_from(["shieldscan-server", "--depth", "ludicrous"]).is_err());
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config("/nonexistent/shieldscan.toml").unwrap();
        assert_eq!(config.scanner.max_concurrent_scans, 4);
    }

    #[test]
    fn test_default_lookup_is_empty_feed() {
        assert!(build_lookup(&Config::default()).is_ok());
    }
}

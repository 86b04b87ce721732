//! Asset-discovery feed
//!
//! Reads the JSON inventory exported by the discovery scanner and turns it
//! into default scan targets.

use serde::{Deserialize, Serialize};
use shieldscan_core::{Error, Result};
use std::collections::BTreeSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::info;

/// One discovered host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub ip: IpAddr,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub vendor: Option<String>,
    #[serde(default)]
    pub open_ports: Vec<u16>,
}

/// Parse a feed: either a bare array of assets or `{"assets": [...]}`
pub fn parse_assets(json: &str) -> Result<Vec<Asset>> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Feed {
        List(Vec<Asset>),
        Wrapped { assets: Vec<Asset> },
    }

    let assets = match serde_json::from_str::<Feed>(json)
        .map_err(|e| Error::Configuration(format!("malformed asset feed: {}", e)))?
    {
        Feed::List(assets) | Feed::Wrapped { assets } => assets,
    };
    Ok(assets)
}

pub fn load_assets(path: impl AsRef<Path>) -> Result<Vec<Asset>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Configuration(format!("Failed to read asset feed {:?}: {}", path, e))
    })?;
    let assets = parse_assets(&content)?;
    info!(path = %path.display(), assets = assets.len(), "loaded asset feed");
    Ok(assets)
}

/// Distinct scan targets (one per IP) in feed order
pub fn seed_targets(assets: &[Asset]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    assets
        .iter()
        .filter(|a| seen.insert(a.ip))
        .map(|a| a.ip.to_string())
        .collect()
}

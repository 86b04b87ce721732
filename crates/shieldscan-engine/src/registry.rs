//! Module registry - the probe modules a deployment can dispatch

use serde::Serialize;
use shieldscan_common::{Config, WeightTable};
use shieldscan_core::{Error, Intrusiveness, ProbeModule, Result};
use shieldscan_network::PortScanModule;
use shieldscan_vuln::{CveModule, VulnerabilityLookup};
use shieldscan_webapp::{HeadersModule, TlsModule};
use std::sync::Arc;

/// Catalog entry served by `GET /modules`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub weight: f64,
    pub intrusiveness: Intrusiveness,
    pub checks: Vec<String>,
}

/// Registered modules in registration order, plus the weight table the
/// scorer reads
pub struct ModuleRegistry {
    modules: Vec<Arc<dyn ProbeModule>>,
    weights: WeightTable,
}

impl ModuleRegistry {
    pub fn new(weights: WeightTable) -> Self {
        Self {
            modules: Vec::new(),
            weights,
        }
    }

    /// Register a module. A module with the same name replaces the old one.
    pub fn register(&mut self, module: Arc<dyn ProbeModule>) {
        self.modules.retain(|m| m.name() != module.name());
        self.modules.push(module);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProbeModule>> {
        self.modules.iter().find(|m| m.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.iter().any(|m| m.name() == name)
    }

    /// Module names in registration order
    pub fn names(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.name().to_string()).collect()
    }

    pub fn weight(&self, name: &str) -> f64 {
        self.weights.weight(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn catalog(&self) -> Vec<ModuleInfo> {
        self.modules
            .iter()
            .map(|m| ModuleInfo {
                name: m.name().to_string(),
                description: m.description().to_string(),
                weight: self.weights.weight(m.name()),
                intrusiveness: m.intrusiveness(),
                checks: m.checks(),
            })
            .collect()
    }

    /// Resolve a requested module list.
    ///
    /// `None` or an empty list selects every registered module. Names are
    /// trimmed and lower-cased; repeats keep their first position.
    pub fn select(&self, requested: Option<&[String]>) -> Result<Vec<String>> {
        let requested = match requested {
            Some(list) if !list.is_empty() => list,
            _ => return Ok(self.names()),
        };

        let mut selected: Vec<String> = Vec::with_capacity(requested.len());
        for raw in requested {
            let name = raw.trim().to_ascii_lowercase();
            if !self.contains(&name) {
                return Err(Error::UnknownModule { name: raw.clone() });
            }
            if !selected.contains(&name) {
                selected.push(name);
            }
        }
        Ok(selected)
    }
}

/// The stock module set: tls, ports, headers, cve
pub fn default_registry(config: &Config, lookup: Arc<dyn VulnerabilityLookup>) -> ModuleRegistry {
    let mut registry = ModuleRegistry::new(config.weights.clone());
    registry.register(Arc::new(TlsModule::new()));
    registry.register(Arc::new(PortScanModule::new()));
    registry.register(Arc::new(HeadersModule::new()));
    registry.register(Arc::new(CveModule::new(lookup)));
    registry
}

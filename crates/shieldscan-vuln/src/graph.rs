//! Attack-surface graph: port → service → CVE
//!
//! A read-only view derived from a scan's findings on demand. Nodes and
//! edges come out in a stable order so repeated builds serialize identically.

use serde::{Deserialize, Serialize};
use shieldscan_core::{Finding, Severity};
use std::collections::{BTreeMap, BTreeSet};

const PORTS_MODULE: &str = "ports";
const UNKNOWN_SERVICE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Port,
    Service,
    Cve,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub kind: NodeKind,
    pub label: String,
    /// Highest severity among the findings behind this node
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cvss_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cisa_kev: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttackGraph {
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl AttackGraph {
    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn edges_from<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.from == id)
    }
}

fn service_id(name: &str) -> String {
    format!("service:{}", name)
}

fn service_name(finding: &Finding) -> String {
    finding
        .service
        .as_deref()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string())
}

fn ensure_service(nodes: &mut BTreeMap<String, GraphNode>, name: &str) -> String {
    let id = service_id(name);
    nodes.entry(id.clone()).or_insert_with(|| GraphNode {
        id: id.clone(),
        kind: NodeKind::Service,
        label: name.to_string(),
        severity: None,
        cvss_score: None,
        cisa_kev: None,
    });
    id
}

fn bump_severity(node: &mut GraphNode, severity: Severity) {
    node.severity = Some(node.severity.map_or(severity, |s| s.max(severity)));
}

/// Build the graph from port-module and CVE findings.
///
/// Each open port (keyed by ip and port) links to the one service the port
/// module fingerprinted for it. Each CVE links to the service node with the
/// same lower-cased name; a CVE whose service never showed up in the port
/// findings still gets that service node so no edge dangles.
pub fn build(findings: &[Finding]) -> AttackGraph {
    let mut nodes: BTreeMap<String, GraphNode> = BTreeMap::new();
    let mut edges: BTreeSet<GraphEdge> = BTreeSet::new();

    for finding in findings.iter().filter(|f| f.module == PORTS_MODULE) {
        let Some(port) = finding.target_port else {
            continue;
        };
        let host = finding.target_ip.as_deref().unwrap_or("*");
        let port_id = format!("port:{}:{}", host, port);
        // First report for a port wins; a port maps to exactly one service
        if nodes.contains_key(&port_id) {
            if let Some(node) = nodes.get_mut(&port_id) {
                bump_severity(node, finding.severity);
            }
            continue;
        }

        let service = service_name(finding);
        let svc_id = ensure_service(&mut nodes, &service);
        nodes.insert(
            port_id.clone(),
            GraphNode {
                id: port_id.clone(),
                kind: NodeKind::Port,
                label: format!("{}:{}/tcp", host, port),
                severity: Some(finding.severity),
                cvss_score: None,
                cisa_kev: None,
            },
        );
        edges.insert(GraphEdge {
            from: port_id,
            to: svc_id,
        });
    }

    for finding in findings {
        let Some(cve_id) = finding.cve_id.as_deref() else {
            continue;
        };
        let id = format!("cve:{}", cve_id);
        let node = nodes.entry(id.clone()).or_insert_with(|| GraphNode {
            id: id.clone(),
            kind: NodeKind::Cve,
            label: cve_id.to_string(),
            severity: None,
            cvss_score: finding.cvss_score,
            cisa_kev: finding.cisa_kev,
        });
        bump_severity(node, finding.severity);
        if finding.is_kev() {
            node.cisa_kev = Some(true);
        }

        let service = service_name(finding);
        let svc_id = ensure_service(&mut nodes, &service);
        if let Some(svc) = nodes.get_mut(&svc_id) {
            bump_severity(svc, finding.severity);
        }
        edges.insert(GraphEdge { from: svc_id, to: id });
    }

    let mut nodes: Vec<GraphNode> = nodes.into_values().collect();
    nodes.sort_by(|a, b| a.kind.cmp(&b.kind).then_with(|| a.id.cmp(&b.id)));

    AttackGraph {
        nodes,
        edges: edges.into_iter().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn port_finding(ip: &str, port: u16, service: &str, severity: Severity) -> Finding {
        Finding::builder("ports", severity, format!("port {}", port))
            .target_ip(ip)
            .port(port)
            .service(service)
            .build()
    }

    fn cve_finding(id: &str, service: &str, kev: bool) -> Finding {
        Finding::builder("cve", Severity::Critical, id)
            .cve(id)
            .cvss(9.8)
            .cisa_kev(kev)
            .service(service)
            .build()
    }

    #[test]
    fn test_three_layers() {
        let findings = vec![
            port_finding("10.0.0.10", 6379, "redis", Severity::High),
            port_finding("10.0.0.10", 22, "SSH", Severity::Info),
            cve_finding("CVE-2022-0543", "Redis", true),
        ];
        let graph = build(&findings);

        assert_eq!(graph.nodes.len(), 5);
        assert!(graph.edges.contains(&GraphEdge {
            from: "port:10.0.0.10:6379".into(),
            to: "service:redis".into(),
        }));
        assert!(graph.edges.contains(&GraphEdge {
            from: "service:redis".into(),
            to: "cve:CVE-2022-0543".into(),
        }));

        // ssh has no CVE: a terminal service node, no outgoing edges
        assert!(graph.node("service:ssh").is_some());
        assert_eq!(graph.edges_from("service:ssh").count(), 0);

        let cve = graph.node("cve:CVE-2022-0543").unwrap();
        assert_eq!(cve.cisa_kev, Some(true));
        assert_eq!(graph.node("service:redis").unwrap().severity, Some(Severity::Critical));
    }

    #[test]
    fn test_no_dangling_edges() {
        let findings = vec![
            cve_finding("CVE-2021-41773", "http", false),
            Finding::builder("cve", Severity::High, "no service").cve("CVE-2020-0001").build(),
        ];
        let graph = build(&findings);
        for edge in &graph.edges {
            assert!(graph.node(&edge.from).is_some());
            assert!(graph.node(&edge.to).is_some());
        }
        assert!(graph.node("service:unknown").is_some());
    }

    #[test]
    fn test_port_maps_to_one_service() {
        let findings = vec![
            port_finding("10.0.0.10", 8080, "http", Severity::Info),
            port_finding("10.0.0.10", 8080, "http-proxy", Severity::Medium),
        ];
        let graph = build(&findings);
        assert_eq!(graph.edges_from("port:10.0.0.10:8080").count(), 1);
        assert_eq!(
            graph.node("port:10.0.0.10:8080").unwrap().severity,
            Some(Severity::Medium)
        );
    }

    #[test]
    fn test_stable_output() {
        let findings = vec![
            port_finding("10.0.0.11", 443, "https", Severity::Info),
            port_finding("10.0.0.10", 21, "ftp", Severity::Medium),
        ];
        assert_eq!(build(&findings), build(&findings));
        assert_eq!(graph_kinds(&build(&findings)), vec![NodeKind::Port, NodeKind::Port, NodeKind::Service, NodeKind::Service]);
    }

    fn graph_kinds(graph: &AttackGraph) -> Vec<NodeKind> {
        graph.nodes.iter().map(|n| n.kind).collect()
    }
}

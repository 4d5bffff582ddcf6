pub mod topology;

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::error::{AcesError, Result};

/// Node id of the internet sentinel every matchup starts from.
pub const EXTERNAL_ID: &str = "external";

/// Operating system tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OsKind {
    Windows10,
    WindowsServer2019,
    Ubuntu22,
    Rhel8,
}

impl OsKind {
    pub fn is_windows(self) -> bool {
        matches!(self, OsKind::Windows10 | OsKind::WindowsServer2019)
    }

    pub fn is_linux(self) -> bool {
        matches!(self, OsKind::Ubuntu22 | OsKind::Rhel8)
    }
}

/// Functional role of a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    Workstation,
    Server,
    DomainController,
    Firewall,
    Database,
    Dmz,
}

impl HostRole {
    pub const ALL: [HostRole; 6] = [
        HostRole::Workstation,
        HostRole::Server,
        HostRole::DomainController,
        HostRole::Firewall,
        HostRole::Database,
        HostRole::Dmz,
    ];
}

/// Privilege levels, ordered from lowest to highest.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegeLevel {
    #[default]
    None,
    User,
    Admin,
    System,
}

/// A network service running on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub exposed: bool,
}

impl Service {
    pub fn new(name: &str, port: u16, version: &str) -> Self {
        Self {
            name: name.to_string(),
            port,
            version: version.to_string(),
            exposed: false,
        }
    }

    pub fn exposed(name: &str, port: u16, version: &str) -> Self {
        Self {
            exposed: true,
            ..Self::new(name, port, version)
        }
    }
}

/// A vulnerability present on a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vulnerability {
    pub cve_id: String,
    pub cvss: f64,
    pub techniques_enabled: Vec<String>,
}

/// An authentication credential. The secret itself is an opaque handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub secret_ref: String,
    pub privilege: PrivilegeLevel,
    pub valid_on: BTreeSet<String>,
    #[serde(default)]
    pub compromised: bool,
}

/// A host in the simulated enterprise network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    pub hostname: String,
    pub os: OsKind,
    pub role: HostRole,
    pub criticality: f64,
    #[serde(default)]
    pub services: Vec<Service>,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
    #[serde(default)]
    pub installed_software: BTreeSet<String>,
    #[serde(default)]
    pub segment: String,
    #[serde(default)]
    pub high_value_data: bool,
    // Mutable simulation flags
    #[serde(default)]
    pub is_compromised: bool,
    #[serde(default)]
    pub privilege_level: PrivilegeLevel,
    #[serde(default)]
    pub has_credential_cache: bool,
    #[serde(default)]
    pub data_staged: bool,
}

impl Host {
    pub fn has_service(&self, name: &str) -> bool {
        self.services.iter().any(|s| s.name == name)
    }

    pub fn has_vulnerability_for(&self, technique_id: &str) -> bool {
        self.vulnerabilities
            .iter()
            .any(|v| v.techniques_enabled.iter().any(|t| t == technique_id))
    }

    pub fn is_windows(&self) -> bool {
        self.os.is_windows()
    }

    pub fn is_linux(&self) -> bool {
        self.os.is_linux()
    }
}

/// Requirements a reachability query filters edges by.
#[derive(Debug, Clone, Default)]
pub struct ReachQuery<'a> {
    pub protocol: Option<&'a str>,
    pub has_credential: bool,
    pub min_privilege: PrivilegeLevel,
}

/// Directed reachability edge attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeInfo {
    pub protocols: Vec<String>,
    pub requires_credential: bool,
    pub crosses_segment: bool,
}

/// Directed graph of hosts, segments, and credentials.
///
/// `clone()` is a full deep copy; the clone shares no mutable state with
/// the original.
#[derive(Debug, Clone)]
pub struct NetworkGraph {
    graph: DiGraph<String, EdgeInfo>,
    nodes: BTreeMap<String, NodeIndex>,
    hosts: BTreeMap<String, Host>,
    segments: BTreeMap<String, Vec<String>>,
    credentials: BTreeMap<String, Credential>,
}

impl Default for NetworkGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkGraph {
    pub fn new() -> Self {
        Self {
            graph: DiGraph::new(),
            nodes: BTreeMap::new(),
            hosts: BTreeMap::new(),
            segments: BTreeMap::new(),
            credentials: BTreeMap::new(),
        }
    }

    pub fn add_host(&mut self, host: Host) {
        let idx = self.graph.add_node(host.id.clone());
        self.nodes.insert(host.id.clone(), idx);
        if !host.segment.is_empty() {
            let members = self.segments.entry(host.segment.clone()).or_default();
            if !members.contains(&host.id) {
                members.push(host.id.clone());
            }
        }
        self.hosts.insert(host.id.clone(), host);
    }

    pub fn add_edge(
        &mut self,
        src: &str,
        dst: &str,
        protocols: Vec<String>,
        requires_credential: bool,
    ) -> Result<()> {
        let (&src_idx, &dst_idx) = match (self.nodes.get(src), self.nodes.get(dst)) {
            (Some(s), Some(d)) => (s, d),
            _ => {
                return Err(AcesError::Topology(format!(
                    "edge references unknown host: {src} -> {dst}"
                )))
            }
        };
        let crosses_segment = self.hosts[src].segment != self.hosts[dst].segment;
        let mut protocols = protocols;
        protocols.sort();
        self.graph.add_edge(
            src_idx,
            dst_idx,
            EdgeInfo {
                protocols,
                requires_credential,
                crosses_segment,
            },
        );
        Ok(())
    }

    pub fn add_credential(&mut self, credential: Credential) {
        self.credentials.insert(credential.id.clone(), credential);
    }

    pub fn host(&self, id: &str) -> Option<&Host> {
        self.hosts.get(id)
    }

    pub fn host_mut(&mut self, id: &str) -> Option<&mut Host> {
        self.hosts.get_mut(id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Host> {
        self.hosts.values()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn segments(&self) -> &BTreeMap<String, Vec<String>> {
        &self.segments
    }

    pub fn credential(&self, id: &str) -> Option<&Credential> {
        self.credentials.get(id)
    }

    pub fn credentials(&self) -> impl Iterator<Item = &Credential> {
        self.credentials.values()
    }

    /// Hosts directly reachable from `src` over edges satisfying the query.
    ///
    /// A non-external source must be compromised at `min_privilege` or
    /// better; the external sentinel is always allowed to originate.
    /// Results are sorted by host id.
    pub fn reachable_from(&self, src: &str, query: &ReachQuery) -> Vec<String> {
        let Some(&src_idx) = self.nodes.get(src) else {
            return Vec::new();
        };
        if src != EXTERNAL_ID {
            let host = &self.hosts[src];
            if !host.is_compromised || host.privilege_level < query.min_privilege {
                return Vec::new();
            }
        }

        let mut out: Vec<String> = self
            .graph
            .edges_directed(src_idx, Direction::Outgoing)
            .filter(|e| {
                let info = e.weight();
                if info.requires_credential && !query.has_credential {
                    return false;
                }
                match query.protocol {
                    Some(p) => info.protocols.iter().any(|proto| proto == p),
                    None => true,
                }
            })
            .map(|e| self.graph[e.target()].clone())
            .collect();
        out.sort();
        out.dedup();
        out
    }

    /// Number of outbound edges from a host.
    pub fn out_degree(&self, id: &str) -> usize {
        self.nodes
            .get(id)
            .map(|&idx| self.graph.edges_directed(idx, Direction::Outgoing).count())
            .unwrap_or(0)
    }

    /// Mark a host compromised, raising its privilege level if needed.
    pub fn compromise(&mut self, id: &str, privilege: PrivilegeLevel) {
        if let Some(host) = self.hosts.get_mut(id) {
            host.is_compromised = true;
            if privilege > host.privilege_level {
                host.privilege_level = privilege;
            }
        }
    }

    /// Credentials cached on a host, marked compromised and returned as
    /// sorted ids. Empty when the host has no credential cache.
    pub fn harvest_credentials(&mut self, id: &str) -> Vec<String> {
        let Some(host) = self.hosts.get(id) else {
            return Vec::new();
        };
        if !host.has_credential_cache {
            return Vec::new();
        }
        let host_id = host.id.clone();
        let mut harvested = Vec::new();
        for cred in self.credentials.values_mut() {
            if cred.valid_on.contains(&host_id) {
                cred.compromised = true;
                harvested.push(cred.id.clone());
            }
        }
        harvested
    }

    /// Remove all outbound edges from a host. Inbound edges are preserved
    /// so later attempts against it remain observable.
    pub fn isolate(&mut self, id: &str) {
        let Some(&idx) = self.nodes.get(id) else {
            return;
        };
        loop {
            let next = self
                .graph
                .edges_directed(idx, Direction::Outgoing)
                .map(|e| e.id())
                .next();
            match next {
                Some(edge) => {
                    self.graph.remove_edge(edge);
                }
                None => break,
            }
        }
    }

    /// Remove a credential from the network entirely.
    pub fn revoke(&mut self, credential_id: &str) {
        self.credentials.remove(credential_id);
    }

    /// Sorted ids of credentials valid on a target host.
    pub fn credentials_for_host(&self, target: &str) -> Vec<String> {
        self.credentials
            .values()
            .filter(|c| c.valid_on.contains(target))
            .map(|c| c.id.clone())
            .collect()
    }

    /// Edge list in deterministic (src, dst) order.
    pub fn edges(&self) -> Vec<(String, String, EdgeInfo)> {
        let mut edges: Vec<(String, String, EdgeInfo)> = self
            .graph
            .edge_indices()
            .filter_map(|e| {
                let (a, b) = self.graph.edge_endpoints(e)?;
                Some((
                    self.graph[a].clone(),
                    self.graph[b].clone(),
                    self.graph[e].clone(),
                ))
            })
            .collect();
        edges.sort_by(|x, y| (&x.0, &x.1).cmp(&(&y.0, &y.1)));
        edges
    }
}

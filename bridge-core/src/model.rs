//! Catalog data model (§3): what a health query returns, before and after
//! per-entry normalization.

use serde::Deserialize;

/// A node reporting a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Node {
    #[serde(rename = "Node")]
    pub name: String,
    #[serde(rename = "Address")]
    pub address: String,
}

/// One service instance on a node.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceInstance {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Service")]
    pub name: String,
    #[serde(rename = "Tags", default)]
    pub tags: Vec<String>,
    #[serde(rename = "Port")]
    pub port: u16,
}

/// A single health check attached to a service instance.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HealthCheck {
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
    #[serde(rename = "Output", default)]
    pub output: String,
}

/// What the catalog returns for one query match: a node, a service
/// instance, and its health checks. Value-equality compared, but see
/// [`ServiceEntry::normalize`] — equality must ignore check `notes`/`output`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceEntry {
    #[serde(rename = "Node")]
    pub node: Node,
    #[serde(rename = "Service")]
    pub service: ServiceInstance,
    #[serde(rename = "Checks", default)]
    pub checks: Vec<HealthCheck>,
}

impl ServiceEntry {
    /// Applies the deterministic per-entry normalization described in §4.B,
    /// in order:
    ///   1. prefix the node name with `{index}_`
    ///   2. overwrite the service port if `port_override != 0`
    ///   3. clear every check's `notes`/`output`
    pub fn normalize(mut self, index: usize, port_override: u16) -> Self {
        self.node.name = format!("{index}_{}", self.node.name);
        if port_override != 0 {
            self.service.port = port_override;
        }
        for check in &mut self.checks {
            check.notes.clear();
            check.output.clear();
        }
        self
    }
}

/// Catalog metadata accompanying a query response, used to drive the next
/// long-poll's `wait_index`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct QueryMeta {
    pub last_index: u64,
}

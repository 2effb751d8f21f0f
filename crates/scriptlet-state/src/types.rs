//! Persisted records for the scriptlet state stores.
//!
//! API-facing shapes (`Instance`, `Project`) live in `scriptlet-core`;
//! the types here are the store's own view of members and raft topology.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use scriptlet_core::{ConfigMap, Instance};

// ── Members ───────────────────────────────────────────────────────

/// Administrative state of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeState {
    #[default]
    Created,
    Pending,
    Evacuated,
}

/// Schema and API extension level a member runs. Ordered lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct MemberVersion {
    pub schema: u32,
    pub api_extensions: u32,
}

/// A cluster member as stored in the cluster database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: u64,
    pub name: String,
    /// `host:port` of the member's management endpoint.
    pub address: String,
    #[serde(default)]
    pub description: String,
    pub architecture: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub config: ConfigMap,
    #[serde(default)]
    pub state: NodeState,
    pub schema: u32,
    pub api_extensions: u32,
    /// Unix timestamp (seconds) of the last heartbeat.
    pub heartbeat: u64,
}

impl NodeInfo {
    pub fn version(&self) -> MemberVersion {
        MemberVersion {
            schema: self.schema,
            api_extensions: self.api_extensions,
        }
    }

    /// Whether the last heartbeat is older than `threshold` at time `now`.
    pub fn is_offline(&self, threshold: Duration, now: u64) -> bool {
        Duration::from_secs(now.saturating_sub(self.heartbeat)) > threshold
    }
}

// ── Raft ──────────────────────────────────────────────────────────

/// Role of a member in the raft cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaftRole {
    Voter,
    Standby,
    Spare,
}

/// A raft node as recorded in the node-local database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaftNode {
    pub id: u64,
    pub address: String,
    pub role: RaftRole,
    #[serde(default)]
    pub name: String,
}

// ── Instances ─────────────────────────────────────────────────────

/// Placeholder for an instance whose creation is still in flight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInstance {
    pub project: String,
    pub name: String,
    pub location: String,
}

/// Filter for instance listing. `None` fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceFilter {
    pub project: Option<String>,
    pub location: Option<String>,
}

impl InstanceFilter {
    pub fn matches(&self, project: &str, location: &str) -> bool {
        self.project.as_deref().is_none_or(|p| p == project)
            && self.location.as_deref().is_none_or(|l| l == location)
    }
}

/// Build the composite key for the instance tables.
pub fn instance_key(project: &str, name: &str) -> String {
    format!("{project}/{name}")
}

pub trait TableKey {
    fn table_key(&self) -> String;
}

impl TableKey for Instance {
    fn table_key(&self) -> String {
        instance_key(&self.project, &self.name)
    }
}

impl TableKey for PendingInstance {
    fn table_key(&self) -> String {
        instance_key(&self.project, &self.name)
    }
}

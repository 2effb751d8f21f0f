//! Point-in-time cluster view used to render members for a placement run.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tracing::debug;

use scriptlet_core::{ClusterMember, MemberStatus};
use scriptlet_state::{MemberVersion, NodeInfo, NodeState, NodeStore, RaftNode, RaftRole, StateStore};

use crate::error::{PlacementError, PlacementResult};

const DEFAULT_FAILURE_DOMAIN: &str = "default";

#[derive(Debug, Clone, Default)]
pub struct ClusterSnapshot {
    /// Failure domain ID → name.
    pub failure_domains: BTreeMap<u64, String>,
    /// Member address → failure domain ID.
    pub member_failure_domains: HashMap<String, u64>,
    pub max_version: MemberVersion,
    pub raft_nodes: Vec<RaftNode>,
    pub offline_threshold: Duration,
    pub leader_address: Option<String>,
}

impl ClusterSnapshot {
    /// Load under one read transaction per database.
    pub fn load(
        cluster: &StateStore,
        node: &NodeStore,
        offline_threshold: Duration,
        leader_address: Option<&str>,
    ) -> PlacementResult<Self> {
        let raft_nodes = node
            .read(|tx| tx.raft_nodes())
            .map_err(|e| PlacementError::state("loading raft nodes", e))?;

        let (failure_domains, member_failure_domains, max_version) = cluster
            .read(|tx| {
                Ok((
                    tx.failure_domain_names()?,
                    tx.member_failure_domains()?,
                    tx.max_member_version()?,
                ))
            })
            .map_err(|e| PlacementError::state("loading cluster snapshot", e))?;

        debug!(
            raft_nodes = raft_nodes.len(),
            failure_domains = failure_domains.len(),
            "cluster snapshot loaded"
        );

        Ok(Self {
            failure_domains,
            member_failure_domains,
            max_version,
            raft_nodes,
            offline_threshold,
            leader_address: leader_address.map(str::to_string),
        })
    }

    /// Render `node` as API consumers see it at time `now`.
    pub fn render(&self, node: &NodeInfo, now: u64) -> ClusterMember {
        let failure_domain = self
            .member_failure_domains
            .get(&node.address)
            .and_then(|id| self.failure_domains.get(id))
            .cloned()
            .unwrap_or_else(|| DEFAULT_FAILURE_DOMAIN.to_string());

        let mut roles = node.roles.clone();
        let mut database = false;
        if let Some(raft) = self.raft_nodes.iter().find(|r| r.address == node.address) {
            match raft.role {
                RaftRole::Voter => {
                    roles.push("database".to_string());
                    database = true;
                }
                RaftRole::Standby => {
                    roles.push("database-standby".to_string());
                    database = true;
                }
                RaftRole::Spare => {}
            }
            if self.leader_address.as_deref() == Some(raft.address.as_str()) {
                roles.push("database-leader".to_string());
                database = true;
            }
        }

        let (status, message) = if node.state == NodeState::Evacuated {
            (MemberStatus::Evacuated, "Unavailable due to maintenance".to_string())
        } else if node.is_offline(self.offline_threshold, now) {
            (
                MemberStatus::Offline,
                format!(
                    "No heartbeat for {}s (last seen at {})",
                    now.saturating_sub(node.heartbeat),
                    node.heartbeat
                ),
            )
        } else if node.version() < self.max_version {
            (MemberStatus::Blocked, "Needs updating to newer version".to_string())
        } else {
            (MemberStatus::Online, "Fully operational".to_string())
        };

        ClusterMember {
            server_name: node.name.clone(),
            url: format!("https://{}", node.address),
            database,
            status,
            message,
            architecture: node.architecture.clone(),
            failure_domain,
            description: node.description.clone(),
            config: node.config.clone(),
            groups: node.groups.clone(),
            roles,
        }
    }

    pub fn render_all(&self, nodes: &[NodeInfo], now: u64) -> Vec<ClusterMember> {
        nodes.iter().map(|n| self.render(n, now)).collect()
    }
}

//! Membership manager — tracks cluster member state.
//!
//! Persists members to the `StateStore`, classifies liveness against the
//! offline threshold, and narrows the member list down to placement
//! candidates.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use scriptlet_core::ConfigMap;
use scriptlet_state::*;

/// Restricts which members are eligible for a placement.
#[derive(Debug, Clone, Default)]
pub struct CandidateFilter {
    /// Accepted architectures; empty accepts all.
    pub architectures: Vec<String>,
    /// Only members of this group.
    pub group: Option<String>,
}

/// Parameters a member registers with.
#[derive(Debug, Clone)]
pub struct JoinRequest {
    pub name: String,
    pub address: String,
    pub architecture: String,
    pub groups: Vec<String>,
    pub config: ConfigMap,
    pub version: MemberVersion,
}

/// Manages cluster membership state.
#[derive(Clone)]
pub struct MembershipManager {
    state: StateStore,
    /// Heartbeat age after which a member counts as offline.
    offline_threshold: Duration,
    leader_address: Option<String>,
}

impl MembershipManager {
    pub fn new(state: StateStore) -> Self {
        Self {
            state,
            offline_threshold: Duration::from_secs(20),
            leader_address: None,
        }
    }

    /// Set the offline detection threshold.
    pub fn with_offline_threshold(mut self, threshold: Duration) -> Self {
        self.offline_threshold = threshold;
        self
    }

    /// Set the address of the elected database leader.
    pub fn with_leader_address(mut self, address: Option<String>) -> Self {
        self.leader_address = address;
        self
    }

    pub fn offline_threshold(&self) -> Duration {
        self.offline_threshold
    }

    pub fn leader_address(&self) -> Option<&str> {
        self.leader_address.as_deref()
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Register a member, assigning the next free ID. Re-joining under an
    /// existing name keeps the ID and refreshes everything else.
    pub fn join(&self, req: JoinRequest) -> StateResult<u64> {
        let nodes = self.state.list_nodes()?;
        let id = match nodes.iter().find(|n| n.name == req.name) {
            Some(existing) => existing.id,
            None => nodes.iter().map(|n| n.id).max().unwrap_or(0) + 1,
        };

        let node = NodeInfo {
            id,
            name: req.name,
            address: req.address,
            description: String::new(),
            architecture: req.architecture,
            roles: Vec::new(),
            groups: req.groups,
            config: req.config,
            state: NodeState::Created,
            schema: req.version.schema,
            api_extensions: req.version.api_extensions,
            heartbeat: epoch_secs(),
        };

        self.state.put_node(&node)?;
        info!(member = %node.name, address = %node.address, id, "member joined cluster");
        Ok(id)
    }

    /// Refresh a member's heartbeat. Returns false for unknown members.
    pub fn heartbeat(&self, name: &str) -> StateResult<bool> {
        match self.find(name)? {
            Some(mut node) => {
                node.heartbeat = epoch_secs();
                self.state.put_node(&node)?;
                debug!(member = %name, "heartbeat received");
                Ok(true)
            }
            None => {
                warn!(member = %name, "heartbeat from unknown member");
                Ok(false)
            }
        }
    }

    /// Mark a member as evacuated (or restore it).
    pub fn set_evacuated(&self, name: &str, evacuated: bool) -> StateResult<bool> {
        match self.find(name)? {
            Some(mut node) => {
                node.state = if evacuated {
                    NodeState::Evacuated
                } else {
                    NodeState::Created
                };
                self.state.put_node(&node)?;
                info!(member = %name, evacuated, "member state changed");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Remove a member from the cluster.
    pub fn leave(&self, name: &str) -> StateResult<bool> {
        let existed = self.state.delete_node(name)?;
        if existed {
            info!(member = %name, "member left cluster");
        }
        Ok(existed)
    }

    /// All members, in name order.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.state.list_nodes()
    }

    fn find(&self, name: &str) -> StateResult<Option<NodeInfo>> {
        Ok(self.list_nodes()?.into_iter().find(|n| n.name == name))
    }

    /// Narrow `nodes` to members that can receive a placement right now.
    pub fn candidate_members(&self, nodes: &[NodeInfo], filter: &CandidateFilter) -> Vec<NodeInfo> {
        candidate_members(nodes, filter, self.offline_threshold, epoch_secs())
    }
}

/// Members that are online, not evacuated, and pass `filter` at time `now`.
pub fn candidate_members(
    nodes: &[NodeInfo],
    filter: &CandidateFilter,
    offline_threshold: Duration,
    now: u64,
) -> Vec<NodeInfo> {
    nodes
        .iter()
        .filter(|n| {
            if n.state == NodeState::Evacuated {
                debug!(member = %n.name, "skipping evacuated member");
                return false;
            }
            if n.is_offline(offline_threshold, now) {
                debug!(member = %n.name, "skipping offline member");
                return false;
            }
            if !filter.architectures.is_empty() && !filter.architectures.contains(&n.architecture) {
                return false;
            }
            filter.group.as_ref().is_none_or(|g| n.groups.contains(g))
        })
        .cloned()
        .collect()
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> StateStore {
        StateStore::open_in_memory().unwrap()
    }

    fn join_req(name: &str, address: &str) -> JoinRequest {
        JoinRequest {
            name: name.to_string(),
            address: address.to_string(),
            architecture: "x86_64".to_string(),
            groups: vec!["default".to_string()],
            config: ConfigMap::new(),
            version: MemberVersion {
                schema: 70,
                api_extensions: 400,
            },
        }
    }

    fn node(name: &str, heartbeat: u64) -> NodeInfo {
        NodeInfo {
            id: 1,
            name: name.to_string(),
            address: format!("{name}:8443"),
            description: String::new(),
            architecture: "x86_64".to_string(),
            roles: Vec::new(),
            groups: vec!["default".to_string()],
            config: ConfigMap::new(),
            state: NodeState::Created,
            schema: 70,
            api_extensions: 400,
            heartbeat,
        }
    }

    #[test]
    fn join_assigns_sequential_ids() {
        let mgr = MembershipManager::new(test_state());
        assert_eq!(mgr.join(join_req("a", "10.0.0.1:8443")).unwrap(), 1);
        assert_eq!(mgr.join(join_req("b", "10.0.0.2:8443")).unwrap(), 2);
        // Re-join keeps the ID.
        assert_eq!(mgr.join(join_req("a", "10.0.0.9:8443")).unwrap(), 1);

        let nodes = mgr.list_nodes().unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].address, "10.0.0.9:8443");
    }

    #[test]
    fn heartbeat_unknown_member_returns_false() {
        let mgr = MembershipManager::new(test_state());
        assert!(!mgr.heartbeat("unknown").unwrap());
    }

    #[test]
    fn heartbeat_refreshes_timestamp() {
        let state = test_state();
        let mgr = MembershipManager::new(state.clone());
        let mut stale = node("a", 1000);
        stale.id = 7;
        state.put_node(&stale).unwrap();

        assert!(mgr.heartbeat("a").unwrap());
        let nodes = mgr.list_nodes().unwrap();
        assert!(nodes[0].heartbeat > 1000);
        assert_eq!(nodes[0].id, 7);
    }

    #[test]
    fn leave_removes_member() {
        let mgr = MembershipManager::new(test_state());
        mgr.join(join_req("a", "10.0.0.1:8443")).unwrap();
        assert!(mgr.leave("a").unwrap());
        assert!(!mgr.leave("a").unwrap());
        assert!(mgr.list_nodes().unwrap().is_empty());
    }

    #[test]
    fn candidates_exclude_offline_and_evacuated() {
        let now = 10_000;
        let mut evacuated = node("c", now);
        evacuated.state = NodeState::Evacuated;
        let nodes = vec![node("a", now), node("b", now - 60), evacuated];

        let candidates =
            candidate_members(&nodes, &CandidateFilter::default(), Duration::from_secs(20), now);
        let names: Vec<_> = candidates.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn candidates_filter_by_group_and_architecture() {
        let now = 10_000;
        let mut arm = node("b", now);
        arm.architecture = "aarch64".to_string();
        arm.groups = vec!["default".to_string(), "gpu".to_string()];
        let nodes = vec![node("a", now), arm];
        let threshold = Duration::from_secs(20);

        let filter = CandidateFilter {
            architectures: Vec::new(),
            group: Some("gpu".to_string()),
        };
        let found = candidate_members(&nodes, &filter, threshold, now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "b");

        let filter = CandidateFilter {
            architectures: vec!["x86_64".to_string()],
            group: None,
        };
        let found = candidate_members(&nodes, &filter, threshold, now);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "a");
    }

    #[test]
    fn evacuation_round_trip() {
        let mgr = MembershipManager::new(test_state());
        mgr.join(join_req("a", "10.0.0.1:8443")).unwrap();

        assert!(mgr.set_evacuated("a", true).unwrap());
        let nodes = mgr.list_nodes().unwrap();
        assert!(mgr.candidate_members(&nodes, &CandidateFilter::default()).is_empty());

        assert!(mgr.set_evacuated("a", false).unwrap());
        let nodes = mgr.list_nodes().unwrap();
        assert_eq!(mgr.candidate_members(&nodes, &CandidateFilter::default()).len(), 1);
    }
}

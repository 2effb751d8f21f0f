//! Collaborators a placement run reads from.

use std::sync::Arc;

use scriptlet_cluster::{ClientOptions, LocalMember, MembershipManager};
use scriptlet_state::{NodeStore, StateStore};

/// The member-side services available to builtins.
///
/// Cheap to clone; every field is a handle.
#[derive(Clone)]
pub struct PlacementHost {
    server_name: String,
    membership: MembershipManager,
    node: NodeStore,
    local: Arc<dyn LocalMember>,
    client: ClientOptions,
}

impl PlacementHost {
    pub fn new(
        server_name: impl Into<String>,
        membership: MembershipManager,
        node: NodeStore,
        local: Arc<dyn LocalMember>,
    ) -> Self {
        Self {
            server_name: server_name.into(),
            membership,
            node,
            local,
            client: ClientOptions::default(),
        }
    }

    /// Options used when calling other members.
    pub fn with_client_options(mut self, client: ClientOptions) -> Self {
        self.client = client;
        self
    }

    /// Name of the member running the placement.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    pub fn membership(&self) -> &MembershipManager {
        &self.membership
    }

    pub fn cluster(&self) -> &StateStore {
        self.membership.state()
    }

    pub fn node(&self) -> &NodeStore {
        &self.node
    }

    /// Shared handle to this member's local counters.
    pub fn local(&self) -> Arc<dyn LocalMember> {
        Arc::clone(&self.local)
    }

    pub fn client_options(&self) -> &ClientOptions {
        &self.client
    }
}

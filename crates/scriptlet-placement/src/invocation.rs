//! Per-run state.
//!
//! [`InvocationContext`] is the read-only half every builtin sees;
//! [`InvocationState`] is the wasmtime store data, holding the context plus
//! what `set_target` mutates.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use wasmtime::StoreLimits;

use scriptlet_core::PlacementRequest;
use scriptlet_state::NodeInfo;

use crate::error::{PlacementError, PlacementResult};
use crate::host::PlacementHost;
use crate::snapshot::ClusterSnapshot;

/// Everything a builtin may read during one run.
pub struct InvocationContext {
    pub host: PlacementHost,
    pub request: PlacementRequest,
    /// Copy of the caller's candidates, in the caller's order.
    pub candidates: Vec<NodeInfo>,
    pub snapshot: ClusterSnapshot,
}

/// Where lookups for a member name go.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MemberRoute<'a> {
    /// The member running the placement.
    Local,
    /// Another candidate, reached over its management endpoint.
    Remote(&'a NodeInfo),
    /// Neither this member nor a candidate.
    Unknown,
}

impl InvocationContext {
    pub fn candidate_index(&self, name: &str) -> Option<usize> {
        self.candidates.iter().position(|n| n.name == name)
    }

    pub fn route(&self, name: &str) -> MemberRoute<'_> {
        if name == self.host.server_name() {
            return MemberRoute::Local;
        }
        match self.candidates.iter().find(|n| n.name == name) {
            Some(node) => MemberRoute::Remote(node),
            None => MemberRoute::Unknown,
        }
    }
}

/// Selection made by the program.
#[derive(Debug, Default)]
pub struct TargetState {
    selected: Option<usize>,
    rejected: Option<String>,
}

impl TargetState {
    pub fn select(&mut self, index: usize) {
        self.selected = Some(index);
    }

    /// Record a selection outside the candidate set. Poisons the run.
    pub fn reject(&mut self, name: &str) {
        if self.rejected.is_none() {
            self.rejected = Some(name.to_string());
        }
    }

    /// Final selection as an index into the candidates.
    pub fn outcome(&self) -> PlacementResult<Option<usize>> {
        match &self.rejected {
            Some(name) => Err(PlacementError::InvalidTarget(name.clone())),
            None => Ok(self.selected),
        }
    }
}

/// Wasmtime store data for one run.
pub struct InvocationState {
    pub context: Arc<InvocationContext>,
    pub target: TargetState,
    /// Cancelled when the run must stop; builtins race against it.
    pub stop: CancellationToken,
    pub limits: StoreLimits,
}

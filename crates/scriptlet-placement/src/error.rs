//! Placement engine error types.

use std::time::Duration;

use thiserror::Error;

use scriptlet_cluster::ClusterError;
use scriptlet_core::UnitsError;
use scriptlet_state::StateError;

use crate::abi::AbiError;
use crate::marshal::MarshalError;
use crate::value::Value;

pub type PlacementResult<T> = Result<T, PlacementError>;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("program does not export entry point \"instance_placement\"")]
    MissingEntryPoint,

    #[error("entry point \"instance_placement\" is not callable: {0}")]
    EntryPointNotCallable(String),

    #[error("unexpected return value from \"instance_placement\": {0}")]
    UnexpectedReturn(Value),

    #[error("invalid arguments to {builtin}: {reason}")]
    InvalidArguments {
        builtin: &'static str,
        reason: String,
    },

    #[error("invalid member name: {0}")]
    InvalidTarget(String),

    #[error("failed parsing instance resources {key}: {source}")]
    Parse {
        key: &'static str,
        #[source]
        source: UnitsError,
    },

    #[error("marshalling {what} failed: {source}")]
    Marshal {
        what: String,
        #[source]
        source: MarshalError,
    },

    #[error("request to member {member:?} failed: {source}")]
    Remote {
        member: String,
        #[source]
        source: ClusterError,
    },

    #[error("local lookup for member {member:?} failed: {source}")]
    Local {
        member: String,
        #[source]
        source: ClusterError,
    },

    #[error("{what}: {source}")]
    State {
        what: &'static str,
        #[source]
        source: StateError,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("failed to instantiate placement program: {0}")]
    Init(String),

    #[error("invalid placement program: {0}")]
    InvalidProgram(String),

    #[error("guest interface error: {0}")]
    Abi(#[from] AbiError),

    #[error("placement program failed: {0}")]
    Script(String),

    #[error("placement cancelled")]
    Cancelled,

    #[error("placement timed out after {0:?}")]
    TimedOut(Duration),
}

impl PlacementError {
    /// The program broke the entry point or builtin contract.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            PlacementError::MissingEntryPoint
                | PlacementError::EntryPointNotCallable(_)
                | PlacementError::UnexpectedReturn(_)
                | PlacementError::InvalidArguments { .. }
                | PlacementError::InvalidProgram(_)
                | PlacementError::Abi(_)
        )
    }

    /// The run stopped because the caller cancelled it or its deadline passed.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PlacementError::Cancelled | PlacementError::TimedOut(_))
    }

    pub(crate) fn marshal(what: impl Into<String>, source: MarshalError) -> Self {
        PlacementError::Marshal {
            what: what.into(),
            source,
        }
    }

    /// Map a store error, lifting not-found into its own variant.
    pub(crate) fn state(what: &'static str, source: StateError) -> Self {
        match source {
            StateError::NotFound(item) => PlacementError::NotFound(item),
            source => PlacementError::State { what, source },
        }
    }
}

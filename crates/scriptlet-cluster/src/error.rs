//! Error types for membership, member endpoints and host probing.

use thiserror::Error;

use scriptlet_state::StateError;

pub type ClusterResult<T> = Result<T, ClusterError>;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("state store error: {0}")]
    State(#[from] StateError),

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out connecting to {0}")]
    ConnectTimeout(String),

    #[error("http error: {0}")]
    Http(String),

    /// The member answered with a non-success envelope.
    #[error("member returned {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode member response: {0}")]
    Decode(String),

    #[error("unknown member {0:?}")]
    UnknownMember(String),

    #[error("host probe failed: {0}")]
    Probe(String),
}

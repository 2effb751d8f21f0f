//! scriptlet-state — persistent state for placement decisions.
//!
//! Two redb databases back a member:
//!
//! - **cluster** ([`StateStore`]): members, failure domains, instances,
//!   pending placeholders and projects
//! - **node** ([`NodeStore`]): the member's view of raft topology
//!
//! Reads are scoped to a closure receiving a transaction handle, so a caller
//! assembling a snapshot sees one consistent view of each database.

pub mod error;
pub mod node;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use node::{NodeStore, NodeTx};
pub use store::{ClusterTx, StateStore};
pub use types::*;

//! scriptlet-cluster — cluster membership and member-to-member plumbing.
//!
//! # Architecture
//!
//! ```text
//! MembershipManager
//!   ├── join / heartbeat / leave / evacuate → StateStore
//!   └── candidate_members() → online, non-evacuated members
//!
//! Member endpoint (axum)
//!   ├── GET /1.0/resources
//!   └── GET /1.0/cluster/members/{name}/state
//!        └── LocalMember (HostProbe: procfs + statvfs)
//!
//! MemberClient (hyper) → another member's endpoint
//! ```

pub mod client;
pub mod error;
pub mod host;
pub mod membership;
pub mod server;

pub use client::{ClientOptions, MemberClient};
pub use error::{ClusterError, ClusterResult};
pub use host::{HostProbe, LocalMember};
pub use membership::{CandidateFilter, JoinRequest, MembershipManager, candidate_members, epoch_secs};
pub use server::{ApiResponse, member_router};

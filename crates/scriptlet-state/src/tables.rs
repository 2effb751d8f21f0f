//! redb table definitions for the scriptlet state stores.
//!
//! Record tables use `&str` keys and `&[u8]` values (JSON-serialized domain
//! types). Instance keys follow the pattern `{project}/{name}`.

use redb::TableDefinition;

// ── Cluster database ───────────────────────────────────────────────

/// Cluster members keyed by member name.
pub const MEMBERS: TableDefinition<&str, &[u8]> = TableDefinition::new("members");

/// Failure domain names keyed by domain ID.
pub const FAILURE_DOMAINS: TableDefinition<u64, &str> = TableDefinition::new("failure_domains");

/// Failure domain ID keyed by member address.
pub const MEMBER_FAILURE_DOMAINS: TableDefinition<&str, u64> =
    TableDefinition::new("member_failure_domains");

/// Instances keyed by `{project}/{name}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Placeholders for instances still being created, keyed by `{project}/{name}`.
pub const PENDING_INSTANCES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("pending_instances");

/// Projects keyed by name.
pub const PROJECTS: TableDefinition<&str, &[u8]> = TableDefinition::new("projects");

// ── Node-local database ────────────────────────────────────────────

/// Raft nodes keyed by raft ID.
pub const RAFT_NODES: TableDefinition<u64, &[u8]> = TableDefinition::new("raft_nodes");

/// Shape shared by the JSON record tables.
pub type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

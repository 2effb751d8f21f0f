//! StateStore — redb-backed cluster database.
//!
//! Holds members, failure domains, instances, pending placeholders and
//! projects. Reads go through [`StateStore::read`], which scopes one redb read
//! transaction to the closure so callers compute a consistent aggregate.
//! The store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use scriptlet_core::{Instance, Project};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
    ($variant:ident, $table:expr) => {
        |e| StateError::$variant {
            table: $table.to_string(),
            reason: e.to_string(),
        }
    };
}
pub(crate) use map_err;

/// Thread-safe cluster database backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "cluster store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory cluster store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(MEMBERS).map_err(map_err!(Table))?;
        txn.open_table(FAILURE_DOMAINS).map_err(map_err!(Table))?;
        txn.open_table(MEMBER_FAILURE_DOMAINS).map_err(map_err!(Table))?;
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(PENDING_INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single read transaction.
    pub fn read<R>(&self, f: impl FnOnce(&ClusterTx) -> StateResult<R>) -> StateResult<R> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&ClusterTx { txn })
    }

    /// List all members.
    pub fn list_nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.read(|tx| tx.nodes())
    }

    // ── Writes ─────────────────────────────────────────────────────

    fn put_record<T: Serialize>(
        &self,
        table: RecordTable,
        key: &str,
        record: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Encode, table.name()))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn delete_record(&self, table: RecordTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(table).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Insert or update a member.
    pub fn put_node(&self, node: &NodeInfo) -> StateResult<()> {
        self.put_record(MEMBERS, &node.name, node)?;
        debug!(member = %node.name, "member stored");
        Ok(())
    }

    /// Delete a member by name. Returns true if it existed.
    pub fn delete_node(&self, name: &str) -> StateResult<bool> {
        self.delete_record(MEMBERS, name)
    }

    /// Insert or rename a failure domain.
    pub fn put_failure_domain(&self, id: u64, name: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(FAILURE_DOMAINS).map_err(map_err!(Table))?;
            table.insert(id, name).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Assign the member at `address` to failure domain `id`.
    pub fn assign_failure_domain(&self, address: &str, id: u64) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn
                .open_table(MEMBER_FAILURE_DOMAINS)
                .map_err(map_err!(Table))?;
            table.insert(address, id).map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or update an instance.
    pub fn put_instance(&self, instance: &Instance) -> StateResult<()> {
        self.put_record(INSTANCES, &instance.table_key(), instance)
    }

    /// Delete an instance. Returns true if it existed.
    pub fn delete_instance(&self, project: &str, name: &str) -> StateResult<bool> {
        self.delete_record(INSTANCES, &instance_key(project, name))
    }

    /// Record an instance whose creation is in flight.
    pub fn put_pending_instance(&self, pending: &PendingInstance) -> StateResult<()> {
        self.put_record(PENDING_INSTANCES, &pending.table_key(), pending)
    }

    /// Drop a pending placeholder. Returns true if it existed.
    pub fn delete_pending_instance(&self, project: &str, name: &str) -> StateResult<bool> {
        self.delete_record(PENDING_INSTANCES, &instance_key(project, name))
    }

    /// Insert or update a project.
    pub fn put_project(&self, project: &Project) -> StateResult<()> {
        self.put_record(PROJECTS, &project.name, project)
    }
}

/// A read transaction over the cluster database.
pub struct ClusterTx {
    txn: ReadTransaction,
}

impl ClusterTx {
    fn scan<T: DeserializeOwned>(&self, table: RecordTable) -> StateResult<Vec<T>> {
        let name = table.name().to_string();
        let table = self.txn.open_table(table).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Corrupt, name))?;
            results.push(record);
        }
        Ok(results)
    }

    /// All members.
    pub fn nodes(&self) -> StateResult<Vec<NodeInfo>> {
        self.scan(MEMBERS)
    }

    /// Failure domain ID → name.
    pub fn failure_domain_names(&self) -> StateResult<BTreeMap<u64, String>> {
        let table = self
            .txn
            .open_table(FAILURE_DOMAINS)
            .map_err(map_err!(Table))?;
        let mut names = BTreeMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (id, name) = entry.map_err(map_err!(Read))?;
            names.insert(id.value(), name.value().to_string());
        }
        Ok(names)
    }

    /// Member address → failure domain ID.
    pub fn member_failure_domains(&self) -> StateResult<HashMap<String, u64>> {
        let table = self
            .txn
            .open_table(MEMBER_FAILURE_DOMAINS)
            .map_err(map_err!(Table))?;
        let mut domains = HashMap::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (address, id) = entry.map_err(map_err!(Read))?;
            domains.insert(address.value().to_string(), id.value());
        }
        Ok(domains)
    }

    /// Highest version run by any member (zero for an empty cluster).
    pub fn max_member_version(&self) -> StateResult<MemberVersion> {
        Ok(self
            .nodes()?
            .iter()
            .map(NodeInfo::version)
            .max()
            .unwrap_or_default())
    }

    /// Instances matching `filter`.
    pub fn instances(&self, filter: &InstanceFilter) -> StateResult<Vec<Instance>> {
        let mut instances: Vec<Instance> = self.scan(INSTANCES)?;
        instances.retain(|i| filter.matches(&i.project, &i.location));
        Ok(instances)
    }

    /// Count instances matching `filter`, optionally including pending placeholders.
    pub fn instances_count(&self, filter: &InstanceFilter, include_pending: bool) -> StateResult<usize> {
        let mut count = self.instances(filter)?.len();
        if include_pending {
            let pending: Vec<PendingInstance> = self.scan(PENDING_INSTANCES)?;
            count += pending
                .iter()
                .filter(|p| filter.matches(&p.project, &p.location))
                .count();
        }
        Ok(count)
    }

    /// Look up a project by name.
    pub fn project(&self, name: &str) -> StateResult<Project> {
        let table = self.txn.open_table(PROJECTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => serde_json::from_slice(guard.value())
                .map_err(map_err!(Corrupt, PROJECTS.name())),
            None => Err(StateError::NotFound(format!("project {name:?}"))),
        }
    }
}

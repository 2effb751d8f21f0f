//! NodeStore — the member-local database.
//!
//! Kept apart from the cluster database because raft topology is known to
//! each member independently of the replicated state.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadTransaction, ReadableDatabase, ReadableTable, TableHandle};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::store::map_err;
use crate::tables::RAFT_NODES;
use crate::types::RaftNode;

#[derive(Clone)]
pub struct NodeStore {
    db: Arc<Database>,
}

impl NodeStore {
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "node store opened");
        Ok(store)
    }

    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(RAFT_NODES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Run `f` inside a single read transaction.
    pub fn read<R>(&self, f: impl FnOnce(&NodeTx) -> StateResult<R>) -> StateResult<R> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        f(&NodeTx { txn })
    }

    /// Insert or update a raft node.
    pub fn put_raft_node(&self, node: &RaftNode) -> StateResult<()> {
        let value = serde_json::to_vec(node).map_err(map_err!(Encode, RAFT_NODES.name()))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(RAFT_NODES).map_err(map_err!(Table))?;
            table
                .insert(node.id, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Remove a raft node by ID. Returns true if it existed.
    pub fn delete_raft_node(&self, id: u64) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(RAFT_NODES).map_err(map_err!(Table))?;
            existed = table.remove(id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}

/// A read transaction over the node-local database.
pub struct NodeTx {
    txn: ReadTransaction,
}

impl NodeTx {
    /// All raft nodes, ordered by ID.
    pub fn raft_nodes(&self) -> StateResult<Vec<RaftNode>> {
        let table = self.txn.open_table(RAFT_NODES).map_err(map_err!(Table))?;
        let mut nodes = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let node: RaftNode =
                serde_json::from_slice(value.value())
                    .map_err(map_err!(Corrupt, RAFT_NODES.name()))?;
            nodes.push(node);
        }
        Ok(nodes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RaftRole;

    fn raft(id: u64, address: &str, role: RaftRole) -> RaftNode {
        RaftNode {
            id,
            address: address.to_string(),
            role,
            name: String::new(),
        }
    }

    #[test]
    fn raft_nodes_round_trip() {
        let store = NodeStore::open_in_memory().unwrap();
        store
            .put_raft_node(&raft(2, "10.0.0.2:8443", RaftRole::Standby))
            .unwrap();
        store
            .put_raft_node(&raft(1, "10.0.0.1:8443", RaftRole::Voter))
            .unwrap();

        let nodes = store.read(|tx| tx.raft_nodes()).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, 1);
        assert_eq!(nodes[1].role, RaftRole::Standby);
    }

    #[test]
    fn raft_node_delete() {
        let store = NodeStore::open_in_memory().unwrap();
        store
            .put_raft_node(&raft(1, "10.0.0.1:8443", RaftRole::Voter))
            .unwrap();
        assert!(store.delete_raft_node(1).unwrap());
        assert!(!store.delete_raft_node(1).unwrap());
        assert!(store.read(|tx| tx.raft_nodes()).unwrap().is_empty());
    }

    #[test]
    fn node_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.redb");
        {
            let store = NodeStore::open(&path).unwrap();
            store
                .put_raft_node(&raft(1, "10.0.0.1:8443", RaftRole::Voter))
                .unwrap();
        }
        let store = NodeStore::open(&path).unwrap();
        assert_eq!(store.read(|tx| tx.raft_nodes()).unwrap().len(), 1);
    }
}

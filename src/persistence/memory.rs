use super::schema::{NodeRow, NodeUpdate, StoreRow, DEFAULT_TABLE, TABLE_VERSION};
use super::store::{apply_update, select_cluster_ids, select_nodes, NodeStore};
use crate::membership::{ClusterId, NodeId, RowId};
use crate::util::StoreError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug)]
struct MemoryState {
    table: String,
    version: u32,
    rows: Vec<StoreRow>,
    writes: usize,
    updates: Vec<(RowId, NodeUpdate)>,
    unavailable_calls: usize,
    exhausted_queries: usize,
    failing_rows: HashSet<RowId>,
    reconnects: usize,
}

/// In-process node table with write accounting and failure injection.
/// Clones share the same table.
#[derive(Debug, Clone)]
pub struct MemoryNodeStore {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryNodeStore {
    fn default() -> Self {
        Self::new(DEFAULT_TABLE)
    }
}

impl MemoryNodeStore {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState {
                table: table.into(),
                version: TABLE_VERSION,
                rows: Vec::new(),
                writes: 0,
                updates: Vec::new(),
                unavailable_calls: 0,
                exhausted_queries: 0,
                failing_rows: HashSet::new(),
                reconnects: 0,
            })),
        }
    }

    pub fn with_rows(rows: impl IntoIterator<Item = NodeRow>) -> Self {
        let store = Self::default();
        for row in rows {
            store.insert(&row);
        }
        store
    }

    pub fn insert(&self, row: &NodeRow) {
        self.insert_raw(row.to_store_row());
    }

    /// Inserts a row exactly as given, malformed or not.
    pub fn insert_raw(&self, row: StoreRow) {
        self.state.lock().rows.push(row);
    }

    pub fn set_version(&self, version: u32) {
        self.state.lock().version = version;
    }

    /// Makes the next `calls` store calls fail as unavailable.
    pub fn set_unavailable(&self, calls: usize) {
        self.state.lock().unavailable_calls = calls;
    }

    /// Makes the next `calls` node queries fail as if the store could not
    /// allocate the result set.
    pub fn set_out_of_memory(&self, calls: usize) {
        self.state.lock().exhausted_queries = calls;
    }

    pub fn fail_updates_for(&self, row_id: RowId) {
        self.state.lock().failing_rows.insert(row_id);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.unavailable_calls = 0;
        state.exhausted_queries = 0;
        state.failing_rows.clear();
    }

    pub fn write_count(&self) -> usize {
        self.state.lock().writes
    }

    pub fn updates(&self) -> Vec<(RowId, NodeUpdate)> {
        self.state.lock().updates.clone()
    }

    pub fn reconnect_count(&self) -> usize {
        self.state.lock().reconnects
    }

    pub fn row(&self, row_id: RowId) -> Option<NodeRow> {
        self.state
            .lock()
            .rows
            .iter()
            .filter_map(|row| NodeRow::from_store_row(row).ok())
            .find(|row| row.id == row_id)
    }
}

impl MemoryState {
    fn check(&mut self, table: &str) -> Result<(), StoreError> {
        if self.unavailable_calls > 0 {
            self.unavailable_calls -= 1;
            return Err(StoreError::Unavailable("injected failure".into()));
        }
        if table != self.table {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(())
    }
}

impl NodeStore for MemoryNodeStore {
    fn table_version(&mut self, table: &str) -> Result<u32, StoreError> {
        let mut state = self.state.lock();
        state.check(table)?;
        Ok(state.version)
    }

    fn query_cluster_ids(
        &mut self,
        table: &str,
        node_id: NodeId,
    ) -> Result<Vec<StoreRow>, StoreError> {
        let mut state = self.state.lock();
        state.check(table)?;
        Ok(select_cluster_ids(&state.rows, node_id))
    }

    fn query_nodes(
        &mut self,
        table: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<StoreRow>, StoreError> {
        let mut state = self.state.lock();
        state.check(table)?;
        if state.exhausted_queries > 0 {
            state.exhausted_queries -= 1;
            return Err(StoreError::OutOfMemory("fetching node rows".into()));
        }
        Ok(select_nodes(&state.rows, cluster_ids))
    }

    fn update_node(
        &mut self,
        table: &str,
        row_id: RowId,
        update: &NodeUpdate,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock();
        state.check(table)?;
        if state.failing_rows.contains(&row_id) {
            return Err(StoreError::Unavailable(format!("update of row {row_id} refused")));
        }
        if !apply_update(&mut state.rows, row_id, update) {
            return Err(StoreError::Corrupt(format!("no row with id {row_id}")));
        }
        state.writes += 1;
        state.updates.push((row_id, *update));
        Ok(())
    }

    fn reconnect(&mut self) -> Result<(), StoreError> {
        self.state.lock().reconnects += 1;
        Ok(())
    }
}

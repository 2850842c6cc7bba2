use super::schema::{Column, DbValue, NodeUpdate, StoreRow};
use crate::membership::{ClusterId, NodeId, RowId};
use crate::util::StoreError;

/// Backing store holding the node table.
///
/// Only the query shapes matter here: the distinct cluster ids a node is a
/// member of, every row of a set of clusters, and a write-back of the local
/// node's counters keyed by row id.
pub trait NodeStore: Send {
    /// Version recorded for `table`; compared against the expected one
    /// before any read.
    fn table_version(&mut self, table: &str) -> Result<u32, StoreError>;

    /// Single-column rows holding each distinct `cluster_id` that has a row
    /// for `node_id`.
    fn query_cluster_ids(&mut self, table: &str, node_id: NodeId)
        -> Result<Vec<StoreRow>, StoreError>;

    /// Full rows, columns in [`Column::ALL`] order, for every listed cluster.
    fn query_nodes(
        &mut self,
        table: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<StoreRow>, StoreError>;

    fn update_node(
        &mut self,
        table: &str,
        row_id: RowId,
        update: &NodeUpdate,
    ) -> Result<(), StoreError>;

    /// Drops and re-establishes the connection after a failure.
    fn reconnect(&mut self) -> Result<(), StoreError> {
        Ok(())
    }
}

fn int_at(row: &StoreRow, column: Column) -> Option<i32> {
    row.get(column).and_then(DbValue::as_int)
}

pub(crate) fn select_cluster_ids<'a>(
    rows: impl IntoIterator<Item = &'a StoreRow>,
    node_id: NodeId,
) -> Vec<StoreRow> {
    let mut ids: Vec<ClusterId> = rows
        .into_iter()
        .filter(|row| int_at(row, Column::NodeId) == Some(node_id))
        .filter_map(|row| int_at(row, Column::ClusterId))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids.into_iter()
        .map(|id| StoreRow::new(vec![DbValue::Int(id)]))
        .collect()
}

pub(crate) fn select_nodes<'a>(
    rows: impl IntoIterator<Item = &'a StoreRow>,
    cluster_ids: &[ClusterId],
) -> Vec<StoreRow> {
    rows.into_iter()
        .filter(|row| {
            int_at(row, Column::ClusterId).is_some_and(|id| cluster_ids.contains(&id))
        })
        .cloned()
        .collect()
}

/// Applies `update` to the row with primary key `row_id`.
pub(crate) fn apply_update(rows: &mut [StoreRow], row_id: RowId, update: &NodeUpdate) -> bool {
    let Some(row) = rows
        .iter_mut()
        .find(|row| int_at(row, Column::Id) == Some(row_id))
    else {
        return false;
    };
    for (column, value) in [
        (Column::LsSeqNo, update.ls_seq_no),
        (Column::TopSeqNo, update.top_seq_no),
        (Column::State, update.state),
    ] {
        if let Some(slot) = row.values.get_mut(column.position()) {
            *slot = DbValue::Int(value);
        }
    }
    true
}

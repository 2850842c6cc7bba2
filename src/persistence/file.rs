use super::schema::{Column, DbValue, NodeRow, NodeUpdate, StoreRow, TABLE_VERSION};
use super::store::{apply_update, select_cluster_ids, select_nodes, NodeStore};
use crate::membership::{ClusterId, NodeId, RowId};
use crate::util::StoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// On-disk layout: rows are column-name to value maps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableFile {
    pub version: u32,
    pub table: String,
    #[serde(default)]
    pub rows: Vec<BTreeMap<String, Value>>,
}

impl TableFile {
    pub fn new(table: impl Into<String>, rows: &[NodeRow]) -> Self {
        Self {
            version: TABLE_VERSION,
            table: table.into(),
            rows: rows.iter().map(|row| encode_row(&row.to_store_row())).collect(),
        }
    }
}

/// Node table kept in a JSON file. Every call re-reads the file, and
/// updates replace it through a temporary file and a rename.
#[derive(Debug)]
pub struct JsonFileNodeStore {
    path: PathBuf,
}

impl JsonFileNodeStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Writes a fresh table file holding `rows`.
    pub fn create(
        path: impl Into<PathBuf>,
        table: &str,
        rows: &[NodeRow],
    ) -> Result<Self, StoreError> {
        let store = Self::new(path);
        store.persist(&TableFile::new(table, rows))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self, table: &str) -> Result<TableFile, StoreError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(StoreError::Unavailable(format!(
                    "{} does not exist",
                    self.path.display()
                )))
            }
            Err(err) => return Err(StoreError::Io(err)),
        };
        let file: TableFile = serde_json::from_slice(&bytes)?;
        if file.table != table {
            return Err(StoreError::UnknownTable(table.to_string()));
        }
        Ok(file)
    }

    fn persist(&self, file: &TableFile) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let tmp_path = self.path.with_extension("tmp");
        let mut tmp_file = fs::File::create(&tmp_path)?;
        let payload = serde_json::to_vec_pretty(file)?;
        tmp_file.write_all(&payload)?;
        tmp_file.sync_all()?;
        fs::rename(tmp_path, &self.path)?;
        Ok(())
    }

    fn rows(&self, table: &str) -> Result<Vec<StoreRow>, StoreError> {
        Ok(self.load(table)?.rows.iter().map(decode_row).collect())
    }
}

fn encode_row(row: &StoreRow) -> BTreeMap<String, Value> {
    Column::ALL
        .iter()
        .zip(&row.values)
        .map(|(column, value)| {
            let value = match value {
                DbValue::Null => Value::Null,
                DbValue::Int(value) => Value::from(*value),
                DbValue::Str(value) => Value::from(value.as_str()),
            };
            (column.name().to_string(), value)
        })
        .collect()
}

/// Missing keys read as null; values that fit no column type are kept as
/// text so row validation reports them.
fn decode_row(map: &BTreeMap<String, Value>) -> StoreRow {
    let values = Column::ALL
        .iter()
        .map(|column| match map.get(column.name()) {
            None | Some(Value::Null) => DbValue::Null,
            Some(Value::String(text)) => DbValue::Str(text.clone()),
            Some(Value::Number(number)) => match number.as_i64().map(i32::try_from) {
                Some(Ok(value)) => DbValue::Int(value),
                _ => DbValue::Str(number.to_string()),
            },
            Some(other) => DbValue::Str(other.to_string()),
        })
        .collect();
    StoreRow::new(values)
}

impl NodeStore for JsonFileNodeStore {
    fn table_version(&mut self, table: &str) -> Result<u32, StoreError> {
        Ok(self.load(table)?.version)
    }

    fn query_cluster_ids(
        &mut self,
        table: &str,
        node_id: NodeId,
    ) -> Result<Vec<StoreRow>, StoreError> {
        Ok(select_cluster_ids(&self.rows(table)?, node_id))
    }

    fn query_nodes(
        &mut self,
        table: &str,
        cluster_ids: &[ClusterId],
    ) -> Result<Vec<StoreRow>, StoreError> {
        Ok(select_nodes(&self.rows(table)?, cluster_ids))
    }

    fn update_node(
        &mut self,
        table: &str,
        row_id: RowId,
        update: &NodeUpdate,
    ) -> Result<(), StoreError> {
        let mut file = self.load(table)?;
        let mut rows: Vec<StoreRow> = file.rows.iter().map(decode_row).collect();
        if !apply_update(&mut rows, row_id, update) {
            return Err(StoreError::Corrupt(format!("no row with id {row_id}")));
        }
        file.rows = rows.iter().map(encode_row).collect();
        self.persist(&file)
    }
}

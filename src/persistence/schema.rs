//! Logical layout of the node table and row validation.

use crate::membership::{ClusterId, NodeId, RowId};
use crate::util::BadDataError;
use serde::{Deserialize, Serialize};

pub const DEFAULT_TABLE: &str = "clusterer";
pub const TABLE_VERSION: u32 = 3;

pub const STATE_DISABLED: i32 = 0;
pub const STATE_ENABLED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Int,
    Str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    Id,
    ClusterId,
    NodeId,
    Url,
    State,
    LsSeqNo,
    TopSeqNo,
    NoPingRetries,
    Priority,
    SipAddr,
    Description,
}

impl Column {
    /// Column order of a full node row.
    pub const ALL: [Column; 11] = [
        Column::Id,
        Column::ClusterId,
        Column::NodeId,
        Column::Url,
        Column::State,
        Column::LsSeqNo,
        Column::TopSeqNo,
        Column::NoPingRetries,
        Column::Priority,
        Column::SipAddr,
        Column::Description,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Column::Id => "id",
            Column::ClusterId => "cluster_id",
            Column::NodeId => "node_id",
            Column::Url => "url",
            Column::State => "state",
            Column::LsSeqNo => "ls_seq_no",
            Column::TopSeqNo => "top_seq_no",
            Column::NoPingRetries => "no_ping_retries",
            Column::Priority => "priority",
            Column::SipAddr => "sip_addr",
            Column::Description => "description",
        }
    }

    pub fn column_type(self) -> ColumnType {
        match self {
            Column::Url | Column::SipAddr | Column::Description => ColumnType::Str,
            _ => ColumnType::Int,
        }
    }

    pub fn nullable(self) -> bool {
        matches!(self, Column::SipAddr | Column::Description)
    }

    pub fn requires_content(self) -> bool {
        matches!(self, Column::Url)
    }

    pub fn position(self) -> usize {
        self as usize
    }
}

/// A single column value as returned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    Null,
    Int(i32),
    Str(String),
}

impl DbValue {
    pub fn as_int(&self) -> Option<i32> {
        match self {
            DbValue::Int(value) => Some(*value),
            _ => None,
        }
    }
}

/// Raw row; values are positional in the order of the query's columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreRow {
    pub values: Vec<DbValue>,
}

impl StoreRow {
    pub fn new(values: Vec<DbValue>) -> Self {
        Self { values }
    }

    pub fn get(&self, column: Column) -> Option<&DbValue> {
        self.values.get(column.position())
    }
}

/// Validated node row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeRow {
    pub id: RowId,
    pub cluster_id: ClusterId,
    pub node_id: NodeId,
    pub url: String,
    pub state: i32,
    pub ls_seq_no: i32,
    pub top_seq_no: i32,
    pub no_ping_retries: i32,
    pub priority: i32,
    pub sip_addr: Option<String>,
    pub description: Option<String>,
}

impl NodeRow {
    pub fn new(id: RowId, cluster_id: ClusterId, node_id: NodeId, url: impl Into<String>) -> Self {
        Self {
            id,
            cluster_id,
            node_id,
            url: url.into(),
            state: STATE_ENABLED,
            ls_seq_no: 0,
            top_seq_no: 0,
            no_ping_retries: 3,
            priority: 50,
            sip_addr: None,
            description: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.state != STATE_DISABLED
    }

    pub fn from_store_row(row: &StoreRow) -> Result<Self, BadDataError> {
        if row.values.len() != Column::ALL.len() {
            return Err(BadDataError::ColumnCount {
                expected: Column::ALL.len(),
                found: row.values.len(),
            });
        }
        Ok(Self {
            id: int_column(row, Column::Id)?,
            cluster_id: int_column(row, Column::ClusterId)?,
            node_id: int_column(row, Column::NodeId)?,
            url: str_column(row, Column::Url)?.unwrap_or_default(),
            state: int_column(row, Column::State)?,
            ls_seq_no: int_column(row, Column::LsSeqNo)?,
            top_seq_no: int_column(row, Column::TopSeqNo)?,
            no_ping_retries: int_column(row, Column::NoPingRetries)?,
            priority: int_column(row, Column::Priority)?,
            sip_addr: str_column(row, Column::SipAddr)?,
            description: str_column(row, Column::Description)?,
        })
    }

    pub fn to_store_row(&self) -> StoreRow {
        let text = |value: &Option<String>| match value {
            Some(value) => DbValue::Str(value.clone()),
            None => DbValue::Null,
        };
        StoreRow::new(vec![
            DbValue::Int(self.id),
            DbValue::Int(self.cluster_id),
            DbValue::Int(self.node_id),
            DbValue::Str(self.url.clone()),
            DbValue::Int(self.state),
            DbValue::Int(self.ls_seq_no),
            DbValue::Int(self.top_seq_no),
            DbValue::Int(self.no_ping_retries),
            DbValue::Int(self.priority),
            text(&self.sip_addr),
            text(&self.description),
        ])
    }
}

/// Values written back for the local node of one cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeUpdate {
    pub ls_seq_no: i32,
    pub top_seq_no: i32,
    pub state: i32,
}

/// Validates a membership row, which carries the cluster id alone.
pub fn cluster_id_from_row(row: &StoreRow) -> Result<ClusterId, BadDataError> {
    let value = row.values.first().unwrap_or(&DbValue::Null);
    check_int(Column::ClusterId, value)
}

fn int_column(row: &StoreRow, column: Column) -> Result<i32, BadDataError> {
    check_int(column, row.get(column).unwrap_or(&DbValue::Null))
}

fn check_int(column: Column, value: &DbValue) -> Result<i32, BadDataError> {
    check_value(column, value)?;
    value.as_int().ok_or(BadDataError::ColumnType {
        column: column.name(),
    })
}

fn str_column(row: &StoreRow, column: Column) -> Result<Option<String>, BadDataError> {
    let value = row.get(column).unwrap_or(&DbValue::Null);
    check_value(column, value)?;
    match value {
        DbValue::Str(text) => Ok(Some(text.clone())),
        _ => Ok(None),
    }
}

/// Checks `value` against the column's declared type, nullability and
/// content rules.
fn check_value(column: Column, value: &DbValue) -> Result<(), BadDataError> {
    match (column.column_type(), value) {
        (_, DbValue::Null) if column.nullable() => Ok(()),
        (_, DbValue::Null) => Err(BadDataError::ColumnNull {
            column: column.name(),
        }),
        (ColumnType::Int, DbValue::Int(_)) => Ok(()),
        (ColumnType::Str, DbValue::Str(text)) if column.requires_content() && text.is_empty() => {
            Err(BadDataError::ColumnEmpty {
                column: column.name(),
            })
        }
        (ColumnType::Str, DbValue::Str(_)) => Ok(()),
        _ => Err(BadDataError::ColumnType {
            column: column.name(),
        }),
    }
}

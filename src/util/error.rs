use crate::membership::{ClusterId, NodeId};
use thiserror::Error;

/// Coarse error categories callers branch on. Unknown clusters and nodes are
/// never errors; read paths return an absent result instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    OutOfMemory,
    BadData,
    StoreUnavailable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BadDataError {
    #[error("column {column} has a bad type")]
    ColumnType { column: &'static str },
    #[error("column {column} is null")]
    ColumnNull { column: &'static str },
    #[error("column {column} (str) is empty")]
    ColumnEmpty { column: &'static str },
    #[error("row has {found} columns, expected {expected}")]
    ColumnCount { expected: usize, found: usize },
    #[error("no url specified for node {node_id}")]
    MissingUrl { node_id: NodeId },
    #[error("bad url {url:?}: {reason}")]
    BadUrl { url: String, reason: String },
    #[error("unsupported transport {transport:?}")]
    UnsupportedTransport { transport: String },
    #[error("node {node_id} uses transport {found}, cluster requires {expected}")]
    TransportMismatch {
        node_id: NodeId,
        expected: String,
        found: String,
    },
    #[error("cannot resolve host {host}: {reason}")]
    Unresolvable { host: String, reason: String },
    #[error("duplicate node {node_id} in cluster {cluster_id}")]
    DuplicateNode {
        cluster_id: ClusterId,
        node_id: NodeId,
    },
    #[error("cluster {cluster_id} has no row for the local node {node_id}")]
    MissingLocalNode {
        cluster_id: ClusterId,
        node_id: NodeId,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    #[error("unknown table {0}")]
    UnknownTable(String),
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("store contents corrupt: {0}")]
    Corrupt(String),
    #[error("store ran out of memory while {0}")]
    OutOfMemory(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ClustererError {
    #[error("out of memory while {context}")]
    OutOfMemory { context: &'static str },
    #[error(transparent)]
    BadData(#[from] BadDataError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("table {table} has version {found}, expected {expected}")]
    TableVersion {
        table: String,
        expected: u32,
        found: u32,
    },
    #[error("flush failed for {failed} of {attempted} cluster(s)")]
    FlushIncomplete { failed: usize, attempted: usize },
    #[error("registry lock order violated: {0}")]
    LockOrder(&'static str),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl ClustererError {
    pub fn oom(context: &'static str) -> Self {
        ClustererError::OutOfMemory { context }
    }

    /// Maps the error onto the category callers use to decide on retries.
    /// Lock-order and config errors are programming/setup faults and are
    /// reported as bad data.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClustererError::OutOfMemory { .. }
            | ClustererError::Store(StoreError::OutOfMemory(_)) => ErrorKind::OutOfMemory,
            ClustererError::Store(_) | ClustererError::FlushIncomplete { .. } => {
                ErrorKind::StoreUnavailable
            }
            ClustererError::BadData(_)
            | ClustererError::TableVersion { .. }
            | ClustererError::LockOrder(_)
            | ClustererError::Config(_) => ErrorKind::BadData,
        }
    }

    pub fn is_bad_data(&self) -> bool {
        self.kind() == ErrorKind::BadData
    }

    pub fn is_out_of_memory(&self) -> bool {
        self.kind() == ErrorKind::OutOfMemory
    }
}

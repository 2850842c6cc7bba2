//! Backing-store schema, store implementations and the registry
//! load/flush synchronizer.

pub mod file;
pub mod memory;
pub mod schema;
pub mod store;
pub mod sync;

pub use file::{JsonFileNodeStore, TableFile};
pub use memory::MemoryNodeStore;
pub use schema::{Column, ColumnType, DbValue, NodeRow, NodeUpdate, StoreRow};
pub use store::NodeStore;
pub use sync::{FlushReport, FlushTimer, LoadOutcome, PersistenceSynchronizer};

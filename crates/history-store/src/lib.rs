pub mod backend;
pub mod db;
pub mod error;
pub mod store;

pub use backend::{MemoryBackend, RecordBackend, SqliteBackend};
pub use db::HistoryDb;
pub use error::{StoreError, StoreResult};
pub use store::{equal_weights, ReconciliationStore, EQUAL_WEIGHT_NOTE};

//! Persistence for stock records and the movement ledger.

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::{FailPoint, InMemoryStockStore};
pub use postgres::PostgresStockStore;
pub use query::{DEFAULT_PAGE_SIZE, LedgerOrder, MAX_PAGE_SIZE, MovementFilter, MovementPage, Pagination};
pub use r#trait::{CommittedMovement, MovementCommit, RecordHistory, StockStore, StoreError};

//! Infrastructure layer: stores, catalog boundary, commit coordination,
//! movement engine, ledger queries, config.

pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod service;
pub mod snapshot;
pub mod store;


pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use config::{ConfigError, LedgerConfig, StoreBackend};
pub use coordinator::TransactionCoordinator;
pub use engine::{MovementEngine, MovementOutcome};
pub use error::LedgerError;
pub use ledger::{AuditReport, KindTotals, MovementLedger, ReportAggregates, StockReport};
pub use service::{StockLedgerService, open_store};
pub use snapshot::{SnapshotListing, SnapshotReader, SnapshotSummary, StockSnapshot};

use thiserror::Error;

use stockledger_core::{ExpectedVersion, ProductId};
use stockledger_inventory::{PlannedMovement, StockMovement, StockRecord, Thresholds};

use super::query::{LedgerOrder, MovementFilter, MovementPage, Pagination};

/// A record mutation and the ledger entry that explains it, committed together.
///
/// The store writes `stock_record.quantity = movement.new_quantity` (inserting the
/// row with `thresholds` when `expected` is `Absent`) and appends the movement,
/// assigning its id and commit timestamp, or does neither.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MovementCommit {
    pub expected: ExpectedVersion,
    pub thresholds: Thresholds,
    pub movement: PlannedMovement,
}

impl MovementCommit {
    pub fn product_id(&self) -> ProductId {
        self.movement.product_id
    }
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedMovement {
    pub record: StockRecord,
    pub movement: StockMovement,
}

/// A record and its whole ledger, read as of one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordHistory {
    pub record: Option<StockRecord>,
    /// Oldest first.
    pub movements: Vec<StockMovement>,
}

/// Persistence failure.
///
/// Every variant guarantees that nothing from the failed call became visible.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The row version moved since it was read (lost an optimistic race).
    #[error("optimistic concurrency check failed: {0}")]
    Conflict(String),

    /// A storage-level constraint rejected the write.
    #[error("constraint violated: {0}")]
    Constraint(String),

    /// The backend could not be reached or failed mid-operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Persisted data could not be decoded into a valid domain value.
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Durable home of stock records and the movement ledger.
///
/// ## Commit semantics
///
/// `commit_movement()`:
/// - checks the record's row version against `expected`
/// - updates (or inserts) the record and appends the movement atomically
/// - assigns the movement id and `created_at` so that, per product, ledger
///   order matches commit order
///
/// Different products never contend with each other.
#[async_trait::async_trait]
pub trait StockStore: Send + Sync {
    /// Load the committed record, `None` if no movement or threshold change has
    /// been committed yet.
    async fn load_record(&self, product_id: ProductId) -> Result<Option<StockRecord>, StoreError>;

    /// All committed records.
    async fn list_records(&self) -> Result<Vec<StockRecord>, StoreError>;

    /// Atomically update the record and append its movement.
    async fn commit_movement(&self, commit: MovementCommit) -> Result<CommittedMovement, StoreError>;

    /// Replace a record's thresholds (creating it at quantity 0 if missing).
    /// Never touches quantity or the ledger.
    async fn save_thresholds(
        &self,
        product_id: ProductId,
        thresholds: Thresholds,
    ) -> Result<StockRecord, StoreError>;

    /// Page through movements matching `filter`.
    async fn query_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError>;

    /// Every movement matching `filter`, unpaginated.
    async fn scan_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
    ) -> Result<Vec<StockMovement>, StoreError>;

    /// The record and its ledger from a single consistent read: no commit is
    /// visible in one half but not the other.
    async fn load_with_history(&self, product_id: ProductId) -> Result<RecordHistory, StoreError>;
}

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Duration, Utc};

use stockledger_core::{AggregateRoot, ProductId};
use stockledger_inventory::{MovementId, StockMovement, StockRecord, Thresholds};

use super::query::{LedgerOrder, MovementFilter, MovementPage, Pagination};
use super::r#trait::{CommittedMovement, MovementCommit, RecordHistory, StockStore, StoreError};

/// Failure to inject into the next `commit_movement` call.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FailPoint {
    /// Report a lost optimistic race before writing anything.
    LostRace,
    /// Backend unreachable before writing anything.
    Unavailable,
    /// Fail after the record row is written, before the movement is appended.
    AfterRecordWrite,
    /// Fail after the movement is appended, before the commit completes.
    AfterLedgerAppend,
}

#[derive(Debug, Default)]
struct State {
    records: HashMap<ProductId, StockRecord>,
    /// Commit order, which is also ledger order.
    movements: Vec<StockMovement>,
    last_id: u64,
    last_created_at: Option<DateTime<Utc>>,
}

impl State {
    /// Write timestamp, strictly later than every previous commit or
    /// threshold change.
    fn next_timestamp(&self) -> DateTime<Utc> {
        let now = Utc::now();
        match self.last_created_at {
            Some(last) if now <= last => last + Duration::microseconds(1),
            _ => now,
        }
    }

    fn rollback(&mut self, product_id: ProductId, previous: Option<StockRecord>, ledger_len: usize) {
        match previous {
            Some(record) => {
                self.records.insert(product_id, record);
            }
            None => {
                self.records.remove(&product_id);
            }
        }
        self.movements.truncate(ledger_len);
    }
}

/// In-memory stock store.
///
/// Intended for tests/dev. A single lock serialises writers, so a commit and
/// its rollback are never observable halfway.
#[derive(Debug, Default)]
pub struct InMemoryStockStore {
    state: RwLock<State>,
    fail_points: Mutex<VecDeque<FailPoint>>,
}

impl InMemoryStockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a failure for an upcoming commit (one per commit, FIFO).
    pub fn fail_next(&self, fail_point: FailPoint) {
        if let Ok(mut queue) = self.fail_points.lock() {
            queue.push_back(fail_point);
        }
    }

    fn take_fail_point(&self) -> Option<FailPoint> {
        self.fail_points.lock().ok()?.pop_front()
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("lock poisoned".to_string())
    }

    fn commit_locked(
        state: &mut State,
        commit: MovementCommit,
        fail_point: Option<FailPoint>,
    ) -> Result<CommittedMovement, StoreError> {
        let product_id = commit.product_id();
        let existing = state.records.get(&product_id);

        commit
            .expected
            .check(existing.map(|r| r.version()))
            .map_err(|e| StoreError::Conflict(format!("stock record {product_id}: {e}")))?;

        let previous_quantity = existing.map(|r| r.quantity()).unwrap_or(0);
        if previous_quantity != commit.movement.previous_quantity {
            return Err(StoreError::Constraint(format!(
                "movement starts at {} but stock record {product_id} holds {previous_quantity}",
                commit.movement.previous_quantity
            )));
        }
        if commit.movement.new_quantity < 0 {
            return Err(StoreError::Constraint(format!(
                "stock record {product_id} quantity would become {}",
                commit.movement.new_quantity
            )));
        }

        let thresholds = existing.map(|r| r.thresholds()).unwrap_or(commit.thresholds);
        let at = state.next_timestamp();
        let record = StockRecord::restore(
            product_id,
            commit.movement.new_quantity,
            thresholds,
            commit.expected.next(),
            Some(at),
        )
        .map_err(|e| StoreError::Constraint(e.to_string()))?;

        let ledger_len = state.movements.len();
        let previous = state.records.insert(product_id, record.clone());
        if fail_point == Some(FailPoint::AfterRecordWrite) {
            state.rollback(product_id, previous, ledger_len);
            return Err(StoreError::Unavailable(
                "injected failure after record write".to_string(),
            ));
        }

        let movement = commit.movement.commit(MovementId(state.last_id + 1), at);
        state.movements.push(movement.clone());
        if fail_point == Some(FailPoint::AfterLedgerAppend) {
            state.rollback(product_id, previous, ledger_len);
            return Err(StoreError::Unavailable(
                "injected failure after ledger append".to_string(),
            ));
        }

        state.last_id += 1;
        state.last_created_at = Some(at);
        Ok(CommittedMovement { record, movement })
    }

    fn select(
        state: &State,
        filter: &MovementFilter,
        order: LedgerOrder,
    ) -> Vec<StockMovement> {
        let matching = state.movements.iter().filter(|m| filter.matches(m));
        match order {
            LedgerOrder::OldestFirst => matching.cloned().collect(),
            LedgerOrder::NewestFirst => matching.rev().cloned().collect(),
        }
    }
}

#[async_trait::async_trait]
impl StockStore for InMemoryStockStore {
    async fn load_record(&self, product_id: ProductId) -> Result<Option<StockRecord>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(state.records.get(&product_id).cloned())
    }

    async fn list_records(&self) -> Result<Vec<StockRecord>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let mut records: Vec<_> = state.records.values().cloned().collect();
        records.sort_by_key(|r| r.product_id());
        Ok(records)
    }

    async fn commit_movement(&self, commit: MovementCommit) -> Result<CommittedMovement, StoreError> {
        let fail_point = self.take_fail_point();
        match fail_point {
            Some(FailPoint::LostRace) => {
                return Err(StoreError::Conflict(format!(
                    "stock record {}: injected lost race",
                    commit.product_id()
                )));
            }
            Some(FailPoint::Unavailable) => {
                return Err(StoreError::Unavailable("injected outage".to_string()));
            }
            _ => {}
        }

        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        Self::commit_locked(&mut state, commit, fail_point)
    }

    async fn save_thresholds(
        &self,
        product_id: ProductId,
        thresholds: Thresholds,
    ) -> Result<StockRecord, StoreError> {
        let mut state = self.state.write().map_err(|_| Self::poisoned())?;
        let (quantity, version) = state
            .records
            .get(&product_id)
            .map(|r| (r.quantity(), r.version()))
            .unwrap_or((0, 0));

        let at = state.next_timestamp();
        let record = StockRecord::restore(product_id, quantity, thresholds, version + 1, Some(at))
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        state.records.insert(product_id, record.clone());
        state.last_created_at = Some(at);
        Ok(record)
    }

    async fn query_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
        pagination: Pagination,
    ) -> Result<MovementPage, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        let all = Self::select(&state, filter, order);
        let total = all.len() as u64;
        let movements = all
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok(MovementPage::new(movements, pagination, total))
    }

    async fn scan_movements(
        &self,
        filter: &MovementFilter,
        order: LedgerOrder,
    ) -> Result<Vec<StockMovement>, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(Self::select(&state, filter, order))
    }

    async fn load_with_history(&self, product_id: ProductId) -> Result<RecordHistory, StoreError> {
        let state = self.state.read().map_err(|_| Self::poisoned())?;
        Ok(RecordHistory {
            record: state.records.get(&product_id).cloned(),
            movements: Self::select(
                &state,
                &MovementFilter::for_product(product_id),
                LedgerOrder::OldestFirst,
            ),
        })
    }
}

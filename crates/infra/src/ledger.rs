//! Read side of the movement ledger: history pages, date-range reports,
//! the recent feed and replay audits.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use stockledger_core::{DomainError, ProductId};
use stockledger_inventory::{MovementKind, StockMovement, StockRecord, Thresholds, verify_record};

use crate::error::LedgerError;
use crate::store::{
    LedgerOrder, MovementFilter, MovementPage, Pagination, RecordHistory, StockStore,
};

pub const DEFAULT_RECENT_LIMIT: u32 = 20;

/// Per-kind totals in a report.
///
/// Sums are widened to `i128`: every term fits in `i64` and there are at most
/// `u64::MAX` of them, so a sum can never overflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KindTotals {
    pub count: u64,
    /// Sum of magnitudes.
    pub quantity: i128,
    /// Sum of signed deltas.
    pub net_delta: i128,
}

impl KindTotals {
    fn add(&mut self, movement: &StockMovement) {
        self.count += 1;
        self.quantity += i128::from(movement.magnitude());
        self.net_delta += i128::from(movement.quantity_delta);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportAggregates {
    pub total_movements: u64,
    pub entries: KindTotals,
    pub exits: KindTotals,
    pub adjustments: KindTotals,
}

impl ReportAggregates {
    pub fn from_movements<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> Self {
        let mut aggregates = Self::default();
        for movement in movements {
            aggregates.total_movements += 1;
            aggregates.totals_mut(movement.kind).add(movement);
        }
        aggregates
    }

    pub fn totals(&self, kind: MovementKind) -> KindTotals {
        match kind {
            MovementKind::Entry => self.entries,
            MovementKind::Exit => self.exits,
            MovementKind::Adjustment => self.adjustments,
        }
    }

    fn totals_mut(&mut self, kind: MovementKind) -> &mut KindTotals {
        match kind {
            MovementKind::Entry => &mut self.entries,
            MovementKind::Exit => &mut self.exits,
            MovementKind::Adjustment => &mut self.adjustments,
        }
    }
}

/// Movements in a closed date range, oldest first, with aggregates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    pub movements: Vec<StockMovement>,
    pub aggregates: ReportAggregates,
}

/// Outcome of a successful replay audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditReport {
    pub product_id: ProductId,
    pub record_quantity: i64,
    pub replayed_quantity: i64,
    pub movement_count: u64,
}

#[derive(Debug)]
pub struct MovementLedger<S: ?Sized> {
    store: Arc<S>,
    default_thresholds: Thresholds,
}

impl<S: ?Sized> Clone for MovementLedger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            default_thresholds: self.default_thresholds,
        }
    }
}

impl<S> MovementLedger<S>
where
    S: StockStore + ?Sized,
{
    pub fn new(store: Arc<S>, default_thresholds: Thresholds) -> Self {
        Self {
            store,
            default_thresholds,
        }
    }

    /// Newest first, optionally narrowed to one product and/or kind.
    pub async fn history(
        &self,
        product_id: Option<ProductId>,
        kind: Option<MovementKind>,
        pagination: Pagination,
    ) -> Result<MovementPage, LedgerError> {
        let filter = MovementFilter {
            product_id,
            kind,
            ..Default::default()
        };
        Ok(self
            .store
            .query_movements(&filter, LedgerOrder::NewestFirst, pagination)
            .await?)
    }

    #[instrument(skip(self), err)]
    pub async fn report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product_id: Option<ProductId>,
    ) -> Result<StockReport, LedgerError> {
        if start > end {
            return Err(DomainError::validation("start", "must not be after end").into());
        }

        let filter = MovementFilter {
            product_id,
            kind: None,
            created_from: Some(start),
            created_to: Some(end),
        };
        let movements = self
            .store
            .scan_movements(&filter, LedgerOrder::OldestFirst)
            .await?;
        let aggregates = ReportAggregates::from_movements(&movements);

        Ok(StockReport {
            start,
            end,
            product_id,
            movements,
            aggregates,
        })
    }

    /// The newest `limit` movements across all products.
    pub async fn recent(&self, limit: Option<u32>) -> Result<Vec<StockMovement>, LedgerError> {
        let pagination = Pagination::new(Some(1), Some(limit.unwrap_or(DEFAULT_RECENT_LIMIT)))?;
        let page = self
            .store
            .query_movements(&MovementFilter::default(), LedgerOrder::NewestFirst, pagination)
            .await?;
        Ok(page.movements)
    }

    /// Replay a product's ledger and compare it with the stored record.
    ///
    /// Record and ledger come from one consistent read, so commits landing
    /// during the audit never show up as a mismatch.
    #[instrument(skip(self), err)]
    pub async fn audit(&self, product_id: ProductId) -> Result<AuditReport, LedgerError> {
        let RecordHistory { record, movements } = self.store.load_with_history(product_id).await?;
        let record =
            record.unwrap_or_else(|| StockRecord::empty(product_id, self.default_thresholds));

        let replayed_quantity = verify_record(&record, &movements).inspect_err(|e| {
            tracing::error!(%product_id, error = %e, "ledger replay does not match stock record");
        })?;

        Ok(AuditReport {
            product_id,
            record_quantity: record.quantity(),
            replayed_quantity,
            movement_count: movements.len() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use stockledger_core::{ActorId, ExpectedVersion};
    use stockledger_inventory::{MovementRequest, plan_movement};

    use crate::store::{InMemoryStockStore, MovementCommit};

    async fn apply(
        store: &InMemoryStockStore,
        product_id: ProductId,
        kind: MovementKind,
        quantity: i64,
    ) -> StockMovement {
        let record = store
            .load_record(product_id)
            .await
            .unwrap()
            .unwrap_or_else(|| StockRecord::empty(product_id, Thresholds::default()));
        let request = MovementRequest::new(product_id, kind, quantity, ActorId::new());
        store
            .commit_movement(MovementCommit {
                expected: ExpectedVersion::of(&record),
                thresholds: record.thresholds(),
                movement: plan_movement(&record, &request).unwrap(),
            })
            .await
            .unwrap()
            .movement
    }

    fn ledger(store: &Arc<InMemoryStockStore>) -> MovementLedger<InMemoryStockStore> {
        MovementLedger::new(store.clone(), Thresholds::default())
    }

    #[tokio::test]
    async fn history_is_newest_first_and_filterable() {
        let store = Arc::new(InMemoryStockStore::new());
        let a = ProductId::new();
        let b = ProductId::new();
        apply(&store, a, MovementKind::Entry, 10).await;
        apply(&store, b, MovementKind::Entry, 3).await;
        apply(&store, a, MovementKind::Exit, 4).await;

        let page = ledger(&store)
            .history(None, None, Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.movements[0].kind, MovementKind::Exit);
        assert!(page.movements[0].created_at > page.movements[2].created_at);

        let exits = ledger(&store)
            .history(Some(a), Some(MovementKind::Exit), Pagination::default())
            .await
            .unwrap();
        assert_eq!(exits.total, 1);
        assert_eq!(exits.movements[0].quantity_delta, -4);
    }

    #[tokio::test]
    async fn report_aggregates_by_kind_over_a_closed_range() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        let first = apply(&store, product_id, MovementKind::Entry, 20).await;
        apply(&store, product_id, MovementKind::Exit, 5).await;
        apply(&store, product_id, MovementKind::Entry, 2).await;
        let last = apply(&store, product_id, MovementKind::Adjustment, 10).await;

        let report = ledger(&store)
            .report(first.created_at, last.created_at, Some(product_id))
            .await
            .unwrap();

        assert_eq!(report.aggregates.total_movements, 4);
        assert_eq!(
            report.aggregates.entries,
            KindTotals {
                count: 2,
                quantity: 22,
                net_delta: 22
            }
        );
        let exits = report.aggregates.totals(MovementKind::Exit);
        assert_eq!((exits.count, exits.quantity, exits.net_delta), (1, 5, -5));
        assert_eq!(report.aggregates.adjustments.quantity, 7);
        assert_eq!(report.aggregates.adjustments.net_delta, -7);
        assert_eq!(report.movements.first(), Some(&first));
        assert_eq!(report.movements.last(), Some(&last));
    }

    #[tokio::test]
    async fn report_bounds_are_inclusive() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        let only = apply(&store, product_id, MovementKind::Entry, 1).await;

        let report = ledger(&store)
            .report(only.created_at, only.created_at, None)
            .await
            .unwrap();
        assert_eq!(report.movements, vec![only.clone()]);

        let before = ledger(&store)
            .report(
                only.created_at - Duration::days(2),
                only.created_at - Duration::days(1),
                None,
            )
            .await
            .unwrap();
        assert!(before.movements.is_empty());
        assert_eq!(before.aggregates, ReportAggregates::default());
    }

    #[tokio::test]
    async fn inverted_report_range_is_rejected() {
        let store = Arc::new(InMemoryStockStore::new());
        let now = Utc::now();
        let err = ledger(&store)
            .report(now, now - Duration::seconds(1), None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation { ref field, .. } if field == "start"));
    }

    #[tokio::test]
    async fn recent_is_bounded() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        for _ in 0..25 {
            apply(&store, product_id, MovementKind::Entry, 1).await;
        }

        let recent = ledger(&store).recent(None).await.unwrap();
        assert_eq!(recent.len(), DEFAULT_RECENT_LIMIT as usize);
        assert_eq!(recent[0].new_quantity, 25);

        let three = ledger(&store).recent(Some(3)).await.unwrap();
        assert_eq!(
            three.iter().map(|m| m.new_quantity).collect::<Vec<_>>(),
            vec![25, 24, 23]
        );
        assert!(ledger(&store).recent(Some(0)).await.is_err());
    }

    #[tokio::test]
    async fn audit_replays_history() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        apply(&store, product_id, MovementKind::Entry, 12).await;
        apply(&store, product_id, MovementKind::Exit, 2).await;
        apply(&store, product_id, MovementKind::Adjustment, 4).await;

        let audit = ledger(&store).audit(product_id).await.unwrap();
        assert_eq!(audit.record_quantity, 4);
        assert_eq!(audit.replayed_quantity, 4);
        assert_eq!(audit.movement_count, 3);

        let untouched = ledger(&store).audit(ProductId::new()).await.unwrap();
        assert_eq!(untouched.movement_count, 0);
        assert_eq!(untouched.replayed_quantity, 0);
    }

    #[tokio::test]
    async fn report_totals_do_not_overflow_near_i64_max() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();
        let first = apply(&store, product_id, MovementKind::Entry, i64::MAX).await;
        apply(&store, product_id, MovementKind::Exit, i64::MAX).await;
        let last = apply(&store, product_id, MovementKind::Entry, i64::MAX).await;

        let report = ledger(&store)
            .report(first.created_at, last.created_at, None)
            .await
            .unwrap();

        let max = i128::from(i64::MAX);
        assert_eq!(report.aggregates.total_movements, 3);
        assert_eq!(
            report.aggregates.entries,
            KindTotals {
                count: 2,
                quantity: 2 * max,
                net_delta: 2 * max
            }
        );
        assert_eq!(report.aggregates.exits.net_delta, -max);
        assert_eq!(
            serde_json::to_value(report.aggregates.entries).unwrap()["quantity"],
            serde_json::json!(u64::MAX - 1)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn audit_is_consistent_while_movements_commit() {
        let store = Arc::new(InMemoryStockStore::new());
        let product_id = ProductId::new();

        let writer = tokio::spawn({
            let store = store.clone();
            async move {
                for _ in 0..2000 {
                    apply(&store, product_id, MovementKind::Entry, 1).await;
                    tokio::task::yield_now().await;
                }
            }
        });

        while !writer.is_finished() {
            let audit = ledger(&store).audit(product_id).await.unwrap();
            assert_eq!(audit.record_quantity, audit.replayed_quantity);
            assert_eq!(audit.movement_count, audit.record_quantity as u64);
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let settled = ledger(&store).audit(product_id).await.unwrap();
        assert_eq!(settled.record_quantity, 2000);
        assert_eq!(settled.movement_count, 2000);
    }
}

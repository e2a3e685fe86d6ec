//! Current stock levels with their classification.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use stockledger_core::ProductId;
use stockledger_inventory::{Classification, StockAlert, StockRecord, StockStatus, Thresholds};

use crate::catalog::Catalog;
use crate::error::LedgerError;
use crate::store::StockStore;

/// A record plus its classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    #[serde(flatten)]
    pub record: StockRecord,
    #[serde(flatten)]
    pub classification: Classification,
}

impl From<StockRecord> for StockSnapshot {
    fn from(record: StockRecord) -> Self {
        let classification = record.classification();
        Self {
            record,
            classification,
        }
    }
}

/// Counts over every active product, taken before any alert filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    pub total: u64,
    pub with_alerts: u64,
    pub out_of_stock: u64,
    pub critical: u64,
    pub low: u64,
}

impl SnapshotSummary {
    fn count(&mut self, snapshot: &StockSnapshot) {
        self.total += 1;
        if !snapshot.classification.alerts.is_empty() {
            self.with_alerts += 1;
        }
        match snapshot.classification.status {
            StockStatus::OutOfStock => self.out_of_stock += 1,
            StockStatus::Critical => self.critical += 1,
            StockStatus::Low => self.low += 1,
            StockStatus::Normal => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotListing {
    pub snapshots: Vec<StockSnapshot>,
    pub summary: SnapshotSummary,
}

#[derive(Debug)]
pub struct SnapshotReader<S: ?Sized, C: ?Sized> {
    store: Arc<S>,
    catalog: Arc<C>,
    default_thresholds: Thresholds,
}

impl<S: ?Sized, C: ?Sized> Clone for SnapshotReader<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            catalog: Arc::clone(&self.catalog),
            default_thresholds: self.default_thresholds,
        }
    }
}

impl<S, C> SnapshotReader<S, C>
where
    S: StockStore + ?Sized,
    C: Catalog + ?Sized,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, default_thresholds: Thresholds) -> Self {
        Self {
            store,
            catalog,
            default_thresholds,
        }
    }

    /// Products without a record yet report quantity 0 and default thresholds.
    pub async fn get(&self, product_id: ProductId) -> Result<StockSnapshot, LedgerError> {
        if !self.catalog.is_active_product(product_id).await? {
            return Err(LedgerError::ProductNotFound(product_id));
        }
        let record = self
            .store
            .load_record(product_id)
            .await?
            .unwrap_or_else(|| StockRecord::empty(product_id, self.default_thresholds));
        Ok(record.into())
    }

    /// Every active product, optionally narrowed to those carrying `alert`.
    pub async fn list(&self, alert: Option<StockAlert>) -> Result<SnapshotListing, LedgerError> {
        let active = self.catalog.active_products().await?;
        let mut records: HashMap<ProductId, StockRecord> = self
            .store
            .list_records()
            .await?
            .into_iter()
            .map(|r| (r.product_id(), r))
            .collect();

        let mut summary = SnapshotSummary::default();
        let mut snapshots = Vec::with_capacity(active.len());
        for product_id in active {
            let record = records
                .remove(&product_id)
                .unwrap_or_else(|| StockRecord::empty(product_id, self.default_thresholds));
            let snapshot = StockSnapshot::from(record);
            summary.count(&snapshot);
            if alert.is_none_or(|a| snapshot.classification.has_alert(a)) {
                snapshots.push(snapshot);
            }
        }

        tracing::debug!(
            total = summary.total,
            with_alerts = summary.with_alerts,
            returned = snapshots.len(),
            "listed stock snapshots"
        );
        Ok(SnapshotListing { snapshots, summary })
    }
}

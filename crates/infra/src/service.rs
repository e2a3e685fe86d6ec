//! Public surface of the stock ledger.
//!
//! `StockLedgerService` wires the movement engine, ledger queries and snapshot
//! reads over one store and one catalog. Transport layers (the CLI driver, an
//! HTTP adapter) call these methods and nothing below them.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use stockledger_core::ProductId;
use stockledger_inventory::{MovementKind, MovementRequest, StockAlert, StockMovement};

use crate::catalog::Catalog;
use crate::config::{LedgerConfig, StoreBackend};
use crate::engine::{MovementEngine, MovementOutcome};
use crate::error::LedgerError;
use crate::ledger::{AuditReport, MovementLedger, StockReport};
use crate::snapshot::{SnapshotListing, SnapshotReader, StockSnapshot};
use crate::store::{InMemoryStockStore, MovementPage, Pagination, PostgresStockStore, StockStore, StoreError};

/// Open the store selected by `backend`.
pub async fn open_store(backend: &StoreBackend) -> Result<Arc<dyn StockStore>, StoreError> {
    match backend {
        StoreBackend::InMemory => {
            tracing::info!("using in-memory stock store");
            Ok(Arc::new(InMemoryStockStore::new()))
        }
        StoreBackend::Postgres { database_url } => {
            tracing::info!("using postgres stock store");
            Ok(Arc::new(PostgresStockStore::connect(database_url).await?))
        }
    }
}

#[derive(Debug)]
pub struct StockLedgerService<S: ?Sized, C: ?Sized> {
    engine: MovementEngine<S, C>,
    ledger: MovementLedger<S>,
    snapshots: SnapshotReader<S, C>,
    catalog: Arc<C>,
}

impl<S: ?Sized, C: ?Sized> Clone for StockLedgerService<S, C> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            ledger: self.ledger.clone(),
            snapshots: self.snapshots.clone(),
            catalog: Arc::clone(&self.catalog),
        }
    }
}

impl<S, C> StockLedgerService<S, C>
where
    S: StockStore + ?Sized + 'static,
    C: Catalog + ?Sized,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, config: &LedgerConfig) -> Self {
        Self {
            engine: MovementEngine::new(Arc::clone(&store), Arc::clone(&catalog), config),
            ledger: MovementLedger::new(Arc::clone(&store), config.default_thresholds),
            snapshots: SnapshotReader::new(store, Arc::clone(&catalog), config.default_thresholds),
            catalog,
        }
    }

    pub fn catalog(&self) -> &Arc<C> {
        &self.catalog
    }

    pub async fn apply_movement(&self, request: MovementRequest) -> Result<MovementOutcome, LedgerError> {
        self.engine.apply(request).await
    }

    pub async fn set_thresholds(
        &self,
        product_id: ProductId,
        min_threshold: i64,
        critical_threshold: i64,
    ) -> Result<StockSnapshot, LedgerError> {
        let record = self
            .engine
            .set_thresholds(product_id, min_threshold, critical_threshold)
            .await?;
        Ok(record.into())
    }

    pub async fn get_snapshot(&self, product_id: ProductId) -> Result<StockSnapshot, LedgerError> {
        self.snapshots.get(product_id).await
    }

    pub async fn list_snapshots(&self, alert: Option<StockAlert>) -> Result<SnapshotListing, LedgerError> {
        self.snapshots.list(alert).await
    }

    pub async fn get_history(
        &self,
        product_id: Option<ProductId>,
        kind: Option<MovementKind>,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> Result<MovementPage, LedgerError> {
        let pagination = Pagination::new(page, page_size)?;
        self.ledger.history(product_id, kind, pagination).await
    }

    pub async fn get_report(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        product_id: Option<ProductId>,
    ) -> Result<StockReport, LedgerError> {
        self.ledger.report(start, end, product_id).await
    }

    pub async fn recent_movements(&self, limit: Option<u32>) -> Result<Vec<StockMovement>, LedgerError> {
        self.ledger.recent(limit).await
    }

    pub async fn audit(&self, product_id: ProductId) -> Result<AuditReport, LedgerError> {
        self.ledger.audit(product_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::ActorId;
    use stockledger_inventory::StockStatus;

    use crate::catalog::InMemoryCatalog;

    #[tokio::test]
    async fn in_memory_backend_serves_every_operation() {
        let store = open_store(&StoreBackend::InMemory).await.unwrap();
        let product_id = ProductId::new();
        let catalog = Arc::new(InMemoryCatalog::with_products([product_id]));
        let service = StockLedgerService::new(store, catalog, &LedgerConfig::default());
        let actor = ActorId::new();

        service
            .apply_movement(MovementRequest::new(product_id, MovementKind::Entry, 50, actor))
            .await
            .unwrap();
        let snapshot = service.set_thresholds(product_id, 60, 20).await.unwrap();
        assert_eq!(snapshot.classification.status, StockStatus::Low);
        assert_eq!(service.get_snapshot(product_id).await.unwrap(), snapshot);

        let history = service.get_history(Some(product_id), None, None, None).await.unwrap();
        assert_eq!(history.total, 1);
        assert_eq!(history.page_size, 50);
        assert!(service.get_history(None, None, Some(0), None).await.is_err());

        assert_eq!(service.recent_movements(None).await.unwrap().len(), 1);
        assert_eq!(service.audit(product_id).await.unwrap().replayed_quantity, 50);
        assert_eq!(service.list_snapshots(None).await.unwrap().summary.low, 1);
    }
}

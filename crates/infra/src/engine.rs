//! Movement execution pipeline.
//!
//! ```text
//! MovementRequest
//!   ↓
//! 1. Validate shape (quantity sign, kind), no IO
//!   ↓
//! 2. Catalog check (product known and active)
//!   ↓
//! 3. Load record, or start from an empty one with default thresholds
//!   ↓
//! 4. Plan movement (pure; insufficient stock rejected here)
//!   ↓
//! 5. Commit record + movement through the TransactionCoordinator
//!   │    └─ lost optimistic race → back to 3, bounded attempts
//!   ↓
//! 6. Classify the new quantity and return
//! ```
//!
//! Nothing is written before step 5, so every failure earlier in the pipeline
//! leaves the store untouched.

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use stockledger_core::{ExpectedVersion, ProductId};
use stockledger_inventory::{
    Classification, MovementRequest, StockMovement, StockRecord, Thresholds, plan_movement,
};

use crate::catalog::Catalog;
use crate::config::LedgerConfig;
use crate::coordinator::TransactionCoordinator;
use crate::error::LedgerError;
use crate::store::{MovementCommit, StockStore, StoreError};

/// Result of an applied movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementOutcome {
    pub record: StockRecord,
    pub movement: StockMovement,
    #[serde(flatten)]
    pub classification: Classification,
}

/// Applies movements and threshold changes to stock records.
///
/// Per-product serializability comes from optimistic row versions: the record
/// is read at version `v`, the commit demands `v`, and a loser re-reads and
/// re-plans against the winner's quantity. An exit that was affordable before
/// the race may therefore come back as `InsufficientStock`.
#[derive(Debug)]
pub struct MovementEngine<S: ?Sized, C: ?Sized> {
    coordinator: TransactionCoordinator<S>,
    catalog: Arc<C>,
    default_thresholds: Thresholds,
    max_commit_attempts: u32,
}

impl<S: ?Sized, C: ?Sized> Clone for MovementEngine<S, C> {
    fn clone(&self) -> Self {
        Self {
            coordinator: self.coordinator.clone(),
            catalog: Arc::clone(&self.catalog),
            default_thresholds: self.default_thresholds,
            max_commit_attempts: self.max_commit_attempts,
        }
    }
}

impl<S, C> MovementEngine<S, C>
where
    S: StockStore + ?Sized + 'static,
    C: Catalog + ?Sized,
{
    pub fn new(store: Arc<S>, catalog: Arc<C>, config: &LedgerConfig) -> Self {
        Self {
            coordinator: TransactionCoordinator::new(store),
            catalog,
            default_thresholds: config.default_thresholds,
            max_commit_attempts: config.max_commit_attempts.max(1),
        }
    }

    /// Apply one ENTRY, EXIT or ADJUSTMENT.
    #[instrument(
        skip(self, request),
        fields(
            product_id = %request.product_id,
            kind = %request.kind,
            quantity = request.quantity,
            actor_id = %request.actor_id
        ),
        err
    )]
    pub async fn apply(&self, request: MovementRequest) -> Result<MovementOutcome, LedgerError> {
        request.validate()?;
        self.ensure_active(request.product_id).await?;

        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let record = self.load_or_empty(request.product_id).await?;
            let movement = plan_movement(&record, &request)?;
            let commit = MovementCommit {
                expected: ExpectedVersion::of(&record),
                thresholds: record.thresholds(),
                movement,
            };

            match self.coordinator.commit(commit).await {
                Ok(committed) => {
                    let classification = committed.record.classification();
                    tracing::info!(
                        movement_id = %committed.movement.id,
                        previous_quantity = committed.movement.previous_quantity,
                        new_quantity = committed.movement.new_quantity,
                        status = ?classification.status,
                        attempt,
                        "movement committed"
                    );
                    return Ok(MovementOutcome {
                        record: committed.record,
                        movement: committed.movement,
                        classification,
                    });
                }
                Err(StoreError::Conflict(message)) if attempt < self.max_commit_attempts => {
                    tracing::warn!(attempt, %message, "commit lost optimistic race; retrying");
                    tokio::task::yield_now().await;
                }
                Err(StoreError::Conflict(message)) => {
                    return Err(LedgerError::ConcurrencyConflict {
                        product_id: request.product_id,
                        attempts: attempt,
                        message,
                    });
                }
                Err(other) => {
                    tracing::error!(error = %other, "commit failed and was rolled back");
                    return Err(other.into());
                }
            }
        }
    }

    /// Replace a product's thresholds. No movement is recorded.
    #[instrument(skip(self), err)]
    pub async fn set_thresholds(
        &self,
        product_id: ProductId,
        min_threshold: i64,
        critical_threshold: i64,
    ) -> Result<StockRecord, LedgerError> {
        let thresholds = Thresholds::new(min_threshold, critical_threshold)?;
        self.ensure_active(product_id).await?;
        Ok(self.coordinator.save_thresholds(product_id, thresholds).await?)
    }

    /// The committed record, or the empty one a first movement would start from.
    pub async fn load_or_empty(&self, product_id: ProductId) -> Result<StockRecord, LedgerError> {
        Ok(self
            .coordinator
            .store()
            .load_record(product_id)
            .await?
            .unwrap_or_else(|| StockRecord::empty(product_id, self.default_thresholds)))
    }

    pub async fn ensure_active(&self, product_id: ProductId) -> Result<(), LedgerError> {
        if self.catalog.is_active_product(product_id).await? {
            Ok(())
        } else {
            Err(LedgerError::ProductNotFound(product_id))
        }
    }
}

//! Atomic commit of a record mutation plus its ledger entry.
//!
//! ```text
//! caller ──► TransactionCoordinator::commit ──► spawned task ──► StockStore::commit_movement
//!                    ▲                                               │
//!                    └──────────── CommittedMovement / StoreError ◄──┘
//! ```
//!
//! The store call runs on its own task: if the caller's future is dropped
//! while waiting, the commit still finishes (committed or rolled back) instead
//! of being abandoned halfway.

use std::sync::Arc;

use tracing::{Instrument, instrument};

use stockledger_core::ProductId;
use stockledger_inventory::{StockRecord, Thresholds};

use crate::store::{CommittedMovement, MovementCommit, StockStore, StoreError};

#[derive(Debug)]
pub struct TransactionCoordinator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: ?Sized> Clone for TransactionCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S> TransactionCoordinator<S>
where
    S: StockStore + ?Sized + 'static,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Commit the record update and the movement append as one unit.
    ///
    /// Either both become visible or neither does; a stale row version comes
    /// back as `StoreError::Conflict`.
    #[instrument(
        skip(self, commit),
        fields(
            product_id = %commit.product_id(),
            kind = %commit.movement.kind,
            expected = ?commit.expected
        ),
        err
    )]
    pub async fn commit(&self, commit: MovementCommit) -> Result<CommittedMovement, StoreError> {
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(
            async move { store.commit_movement(commit).await }.in_current_span(),
        );

        match task.await {
            Ok(result) => result,
            Err(join_err) => {
                tracing::error!(error = %join_err, "commit task did not complete");
                Err(StoreError::Unavailable(format!(
                    "commit task did not complete: {join_err}"
                )))
            }
        }
    }

    /// Replace thresholds, detached from the caller the same way as `commit`.
    #[instrument(skip(self), err)]
    pub async fn save_thresholds(
        &self,
        product_id: ProductId,
        thresholds: Thresholds,
    ) -> Result<StockRecord, StoreError> {
        let store = Arc::clone(&self.store);
        let task = tokio::spawn(
            async move { store.save_thresholds(product_id, thresholds).await }.in_current_span(),
        );

        task.await.unwrap_or_else(|join_err| {
            tracing::error!(error = %join_err, "threshold task did not complete");
            Err(StoreError::Unavailable(format!(
                "threshold task did not complete: {join_err}"
            )))
        })
    }
}

//! Error taxonomy surfaced to callers of the ledger.

use thiserror::Error;

use stockledger_core::{DomainError, ProductId};

use crate::catalog::CatalogError;
use crate::store::StoreError;

/// Ledger operation error.
///
/// - `Validation`, `ProductNotFound`, `InsufficientStock`: terminal business
///   outcomes, nothing was written.
/// - `ConcurrencyConflict`: the commit kept losing optimistic races after the
///   bounded internal retries; transient.
/// - `StoreUnavailable`: the store failed and rolled back; never retried here.
/// - `InvariantViolation`: stored history failed an audit.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },

    #[error("product {0} not found or inactive")]
    ProductNotFound(ProductId),

    #[error("insufficient stock (available: {available}, requested: {requested})")]
    InsufficientStock { available: i64, requested: i64 },

    #[error("concurrency conflict on product {product_id} after {attempts} attempt(s): {message}")]
    ConcurrencyConflict {
        product_id: ProductId,
        attempts: u32,
        message: String,
    },

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl LedgerError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LedgerError::ConcurrencyConflict { .. } | LedgerError::StoreUnavailable(_)
        )
    }
}

impl From<DomainError> for LedgerError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation { field, message } => LedgerError::Validation { field, message },
            DomainError::InvalidId(msg) => LedgerError::Validation {
                field: "id".to_string(),
                message: msg,
            },
            DomainError::InsufficientStock {
                available,
                requested,
            } => LedgerError::InsufficientStock {
                available,
                requested,
            },
            DomainError::InvariantViolation(msg) => LedgerError::InvariantViolation(msg),
            DomainError::Conflict(msg) => LedgerError::StoreUnavailable(msg),
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Corrupt(msg) => LedgerError::InvariantViolation(msg),
            other => LedgerError::StoreUnavailable(other.to_string()),
        }
    }
}

impl From<CatalogError> for LedgerError {
    fn from(value: CatalogError) -> Self {
        LedgerError::StoreUnavailable(value.to_string())
    }
}

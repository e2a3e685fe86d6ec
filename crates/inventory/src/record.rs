use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{AggregateRoot, DomainError, DomainResult, ProductId};

use crate::classifier::{Classification, classify};

pub const DEFAULT_MIN_THRESHOLD: i64 = 10;
pub const DEFAULT_CRITICAL_THRESHOLD: i64 = 5;

/// Classification boundaries for one product.
///
/// Always satisfies `0 <= critical <= min`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "RawThresholds")]
pub struct Thresholds {
    min_threshold: i64,
    critical_threshold: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawThresholds {
    min_threshold: i64,
    critical_threshold: i64,
}

impl TryFrom<RawThresholds> for Thresholds {
    type Error = DomainError;

    fn try_from(raw: RawThresholds) -> Result<Self, Self::Error> {
        Thresholds::new(raw.min_threshold, raw.critical_threshold)
    }
}

impl Thresholds {
    pub fn new(min_threshold: i64, critical_threshold: i64) -> DomainResult<Self> {
        if min_threshold < 0 {
            return Err(DomainError::validation(
                "minThreshold",
                "must not be negative",
            ));
        }
        if critical_threshold < 0 {
            return Err(DomainError::validation(
                "criticalThreshold",
                "must not be negative",
            ));
        }
        if critical_threshold > min_threshold {
            return Err(DomainError::validation(
                "criticalThreshold",
                format!(
                    "must not exceed minThreshold ({critical_threshold} > {min_threshold})"
                ),
            ));
        }
        Ok(Self {
            min_threshold,
            critical_threshold,
        })
    }

    pub fn min(&self) -> i64 {
        self.min_threshold
    }

    pub fn critical(&self) -> i64 {
        self.critical_threshold
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_threshold: DEFAULT_MIN_THRESHOLD,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

/// Current quantity-on-hand and thresholds for one product.
///
/// A record with `version() == 0` has never been committed: it is the lazily
/// created default used before the first movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRecord {
    product_id: ProductId,
    quantity: i64,
    #[serde(flatten)]
    thresholds: Thresholds,
    version: u64,
    updated_at: Option<DateTime<Utc>>,
}

impl StockRecord {
    /// Create an empty, not-yet-committed record.
    pub fn empty(product_id: ProductId, thresholds: Thresholds) -> Self {
        Self {
            product_id,
            quantity: 0,
            thresholds,
            version: 0,
            updated_at: None,
        }
    }

    /// Rebuild a record from persisted state.
    pub fn restore(
        product_id: ProductId,
        quantity: i64,
        thresholds: Thresholds,
        version: u64,
        updated_at: Option<DateTime<Utc>>,
    ) -> DomainResult<Self> {
        if quantity < 0 {
            return Err(DomainError::invariant(format!(
                "stock record {product_id} has negative quantity {quantity}"
            )));
        }
        Ok(Self {
            product_id,
            quantity,
            thresholds,
            version,
            updated_at,
        })
    }

    pub fn product_id(&self) -> ProductId {
        self.product_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn thresholds(&self) -> Thresholds {
        self.thresholds
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_persisted(&self) -> bool {
        self.version > 0
    }

    pub fn classification(&self) -> Classification {
        classify(
            self.quantity,
            self.thresholds.min(),
            self.thresholds.critical(),
        )
    }
}

impl AggregateRoot for StockRecord {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.product_id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

//! Threshold classification.
//!
//! Status and alerts are an overlay computed from the current quantity and
//! thresholds every time they are asked for; nothing here is persisted.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use stockledger_core::DomainError;

/// Stock level relative to the record's thresholds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockStatus {
    OutOfStock,
    Critical,
    Low,
    Normal,
}

/// Named condition derived from a status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StockAlert {
    StockExhausted,
    CriticalThresholdReached,
    MinThresholdReached,
}

impl StockStatus {
    /// The alert raised by this status, if any.
    pub fn alert(self) -> Option<StockAlert> {
        match self {
            StockStatus::OutOfStock => Some(StockAlert::StockExhausted),
            StockStatus::Critical => Some(StockAlert::CriticalThresholdReached),
            StockStatus::Low => Some(StockAlert::MinThresholdReached),
            StockStatus::Normal => None,
        }
    }
}

impl StockAlert {
    pub fn as_str(self) -> &'static str {
        match self {
            StockAlert::StockExhausted => "STOCK_EXHAUSTED",
            StockAlert::CriticalThresholdReached => "CRITICAL_THRESHOLD_REACHED",
            StockAlert::MinThresholdReached => "MIN_THRESHOLD_REACHED",
        }
    }
}

impl core::fmt::Display for StockAlert {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StockAlert {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "STOCK_EXHAUSTED" => Ok(StockAlert::StockExhausted),
            "CRITICAL_THRESHOLD_REACHED" => Ok(StockAlert::CriticalThresholdReached),
            "MIN_THRESHOLD_REACHED" => Ok(StockAlert::MinThresholdReached),
            other => Err(DomainError::validation(
                "alertType",
                format!("unknown alert type '{other}'"),
            )),
        }
    }
}

/// Classifier output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status: StockStatus,
    /// Empty for `NORMAL`, otherwise the single alert matching `status`.
    pub alerts: Vec<StockAlert>,
}

impl Classification {
    pub fn has_alert(&self, alert: StockAlert) -> bool {
        self.alerts.contains(&alert)
    }
}

/// Classify a quantity against its thresholds.
///
/// All comparisons are inclusive: a quantity sitting exactly on a threshold is
/// already past it. Out-of-stock wins over critical, critical over low, so
/// `min == critical` makes `LOW` unreachable.
pub fn classify(quantity: i64, min_threshold: i64, critical_threshold: i64) -> Classification {
    let status = if quantity <= 0 {
        StockStatus::OutOfStock
    } else if quantity <= critical_threshold {
        StockStatus::Critical
    } else if quantity <= min_threshold {
        StockStatus::Low
    } else {
        StockStatus::Normal
    };

    Classification {
        status,
        alerts: status.alert().into_iter().collect(),
    }
}

//! Stock ledger domain module.
//!
//! This crate contains the business rules for stock-on-hand, implemented purely
//! as deterministic domain logic (no IO, no storage).

pub mod classifier;
pub mod movement;
pub mod record;
pub mod replay;

pub use classifier::{Classification, StockAlert, StockStatus, classify};
pub use movement::{
    MovementId, MovementKind, MovementRequest, PlannedMovement, StockMovement, plan_movement,
};
pub use record::{DEFAULT_CRITICAL_THRESHOLD, DEFAULT_MIN_THRESHOLD, StockRecord, Thresholds};
pub use replay::{replay, verify_record};

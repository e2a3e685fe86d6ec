//! Rebuilding a quantity from ledger history.

use stockledger_core::{DomainError, DomainResult};

use crate::movement::StockMovement;
use crate::record::StockRecord;

/// Fold a product's movements, oldest first, starting from quantity 0.
///
/// Each entry must pick up exactly where the previous one ended, keep
/// `new = previous + delta`, never go negative, and come strictly later in
/// ledger order (`created_at`, then `id`).
pub fn replay<'a>(movements: impl IntoIterator<Item = &'a StockMovement>) -> DomainResult<i64> {
    let mut quantity = 0i64;
    let mut last: Option<&StockMovement> = None;

    for movement in movements {
        if let Some(prev) = last {
            if movement.product_id != prev.product_id {
                return Err(DomainError::invariant(format!(
                    "movement {} belongs to {}, expected {}",
                    movement.id, movement.product_id, prev.product_id
                )));
            }
            if movement.ledger_key() <= prev.ledger_key() || movement.id <= prev.id {
                return Err(DomainError::invariant(format!(
                    "movement {} is not ordered after movement {}",
                    movement.id, prev.id
                )));
            }
        }
        if movement.previous_quantity != quantity {
            return Err(DomainError::invariant(format!(
                "movement {} starts at {} but running quantity is {}",
                movement.id, movement.previous_quantity, quantity
            )));
        }
        if movement.previous_quantity + movement.quantity_delta != movement.new_quantity {
            return Err(DomainError::invariant(format!(
                "movement {} delta {} does not lead from {} to {}",
                movement.id, movement.quantity_delta, movement.previous_quantity, movement.new_quantity
            )));
        }
        if movement.new_quantity < 0 {
            return Err(DomainError::invariant(format!(
                "movement {} leaves negative quantity {}",
                movement.id, movement.new_quantity
            )));
        }
        quantity = movement.new_quantity;
        last = Some(movement);
    }

    Ok(quantity)
}

/// Check that a record's quantity is exactly what its history replays to.
pub fn verify_record<'a>(
    record: &StockRecord,
    movements: impl IntoIterator<Item = &'a StockMovement>,
) -> DomainResult<i64> {
    let replayed = replay(movements)?;
    if replayed != record.quantity() {
        return Err(DomainError::invariant(format!(
            "stock record {} holds {} but its ledger replays to {}",
            record.product_id(),
            record.quantity(),
            replayed
        )));
    }
    Ok(replayed)
}

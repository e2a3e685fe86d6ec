use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockledger_core::{ActorId, DomainError, DomainResult, ProductId};

use crate::record::StockRecord;

/// Kind of stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    /// Stock in; `quantity` is a positive magnitude.
    Entry,
    /// Stock out; `quantity` is a positive magnitude.
    Exit,
    /// Absolute correction; `quantity` is the counted target quantity.
    Adjustment,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Entry => "ENTRY",
            MovementKind::Exit => "EXIT",
            MovementKind::Adjustment => "ADJUSTMENT",
        }
    }

    /// Reason recorded when the caller supplies none.
    pub fn default_reason(self) -> &'static str {
        match self {
            MovementKind::Entry => "Stock entry",
            MovementKind::Exit => "Stock exit",
            MovementKind::Adjustment => "Stock adjustment",
        }
    }
}

impl core::fmt::Display for MovementKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ENTRY" => Ok(MovementKind::Entry),
            "EXIT" => Ok(MovementKind::Exit),
            "ADJUSTMENT" => Ok(MovementKind::Adjustment),
            other => Err(DomainError::validation(
                "kind",
                format!("unknown movement kind '{other}'"),
            )),
        }
    }
}

/// Ledger-assigned movement identifier (monotonic).
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MovementId(pub u64);

impl core::fmt::Display for MovementId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Command: apply one movement to a product's stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MovementRequest {
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Magnitude for `ENTRY`/`EXIT`, target quantity for `ADJUSTMENT`.
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub reference: Option<String>,
    pub actor_id: ActorId,
}

impl MovementRequest {
    pub fn new(product_id: ProductId, kind: MovementKind, quantity: i64, actor_id: ActorId) -> Self {
        Self {
            product_id,
            kind,
            quantity,
            reason: None,
            reference: None,
            actor_id,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }

    /// Shape/range checks that need no stored state.
    pub fn validate(&self) -> DomainResult<()> {
        match self.kind {
            MovementKind::Entry | MovementKind::Exit if self.quantity <= 0 => {
                Err(DomainError::validation(
                    "quantity",
                    format!("must be greater than zero (got {})", self.quantity),
                ))
            }
            MovementKind::Adjustment if self.quantity < 0 => Err(DomainError::validation(
                "quantity",
                format!("target quantity must not be negative (got {})", self.quantity),
            )),
            _ => Ok(()),
        }
    }
}

/// A movement decided against a record but not yet committed.
///
/// The ledger assigns `id` and `created_at` at commit time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedMovement {
    pub product_id: ProductId,
    pub kind: MovementKind,
    pub quantity_delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub actor_id: ActorId,
}

impl PlannedMovement {
    pub fn commit(self, id: MovementId, created_at: DateTime<Utc>) -> StockMovement {
        StockMovement {
            id,
            product_id: self.product_id,
            kind: self.kind,
            quantity_delta: self.quantity_delta,
            previous_quantity: self.previous_quantity,
            new_quantity: self.new_quantity,
            reason: self.reason,
            reference: self.reference,
            actor_id: self.actor_id,
            created_at,
        }
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockMovement {
    pub id: MovementId,
    pub product_id: ProductId,
    pub kind: MovementKind,
    /// Signed change as applied: `new_quantity - previous_quantity`.
    pub quantity_delta: i64,
    pub previous_quantity: i64,
    pub new_quantity: i64,
    pub reason: String,
    pub reference: Option<String>,
    pub actor_id: ActorId,
    pub created_at: DateTime<Utc>,
}

impl StockMovement {
    /// Unsigned size of the change.
    pub fn magnitude(&self) -> i64 {
        self.quantity_delta.abs()
    }

    /// Ledger order: `created_at`, then `id`.
    pub fn ledger_key(&self) -> (DateTime<Utc>, MovementId) {
        (self.created_at, self.id)
    }
}

/// Decide the movement a request produces against the current record.
///
/// Pure: no state is touched. Exits that would drive the quantity below zero
/// fail with `InsufficientStock`.
pub fn plan_movement(record: &StockRecord, request: &MovementRequest) -> DomainResult<PlannedMovement> {
    request.validate()?;

    if record.product_id() != request.product_id {
        return Err(DomainError::invariant(format!(
            "movement for {} planned against record {}",
            request.product_id,
            record.product_id()
        )));
    }

    let previous_quantity = record.quantity();
    let new_quantity = match request.kind {
        MovementKind::Entry => previous_quantity
            .checked_add(request.quantity)
            .ok_or_else(|| DomainError::validation("quantity", "entry overflows stock quantity"))?,
        MovementKind::Exit => {
            if request.quantity > previous_quantity {
                return Err(DomainError::insufficient_stock(
                    previous_quantity,
                    request.quantity,
                ));
            }
            previous_quantity - request.quantity
        }
        MovementKind::Adjustment => request.quantity,
    };

    Ok(PlannedMovement {
        product_id: request.product_id,
        kind: request.kind,
        quantity_delta: new_quantity - previous_quantity,
        previous_quantity,
        new_quantity,
        reason: normalized(request.reason.as_deref())
            .unwrap_or_else(|| request.kind.default_reason().to_string()),
        reference: normalized(request.reference.as_deref()),
        actor_id: request.actor_id,
    })
}

fn normalized(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Thresholds;
    use stockledger_core::AggregateRoot;

    fn record_with(quantity: i64) -> StockRecord {
        StockRecord::restore(ProductId::new(), quantity, Thresholds::default(), 1, None).unwrap()
    }

    fn request(record: &StockRecord, kind: MovementKind, quantity: i64) -> MovementRequest {
        MovementRequest::new(record.product_id(), kind, quantity, ActorId::new())
    }

    #[test]
    fn entry_on_empty_record_adds_quantity() {
        let record = StockRecord::empty(ProductId::new(), Thresholds::default());
        let planned = plan_movement(&record, &request(&record, MovementKind::Entry, 20)).unwrap();

        assert_eq!(planned.kind, MovementKind::Entry);
        assert_eq!(planned.previous_quantity, 0);
        assert_eq!(planned.new_quantity, 20);
        assert_eq!(planned.quantity_delta, 20);
        assert_eq!(planned.reason, "Stock entry");
    }

    #[test]
    fn exit_beyond_available_is_rejected() {
        let record = record_with(3);
        let err = plan_movement(&record, &request(&record, MovementKind::Exit, 5)).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(3, 5));
    }

    #[test]
    fn exit_of_everything_reaches_zero() {
        let record = record_with(3);
        let planned = plan_movement(&record, &request(&record, MovementKind::Exit, 3)).unwrap();
        assert_eq!(planned.new_quantity, 0);
        assert_eq!(planned.quantity_delta, -3);
    }

    #[test]
    fn adjustment_records_signed_difference() {
        let record = record_with(20);
        let planned =
            plan_movement(&record, &request(&record, MovementKind::Adjustment, 7)).unwrap();
        assert_eq!(planned.previous_quantity, 20);
        assert_eq!(planned.new_quantity, 7);
        assert_eq!(planned.quantity_delta, -13);
        assert_eq!(planned.reason, "Stock adjustment");
    }

    #[test]
    fn zero_adjustment_is_allowed() {
        let record = record_with(9);
        let planned =
            plan_movement(&record, &request(&record, MovementKind::Adjustment, 9)).unwrap();
        assert_eq!(planned.quantity_delta, 0);
    }

    #[test]
    fn non_positive_magnitudes_are_rejected() {
        let record = record_with(10);
        for kind in [MovementKind::Entry, MovementKind::Exit] {
            for quantity in [0, -4] {
                match plan_movement(&record, &request(&record, kind, quantity)) {
                    Err(DomainError::Validation { field, .. }) => assert_eq!(field, "quantity"),
                    other => panic!("Expected Validation error, got {other:?}"),
                }
            }
        }
    }

    #[test]
    fn negative_adjustment_target_is_rejected() {
        let record = record_with(10);
        let err =
            plan_movement(&record, &request(&record, MovementKind::Adjustment, -1)).unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn entry_overflow_is_a_validation_error() {
        let record = record_with(i64::MAX - 1);
        let err = plan_movement(&record, &request(&record, MovementKind::Entry, 2)).unwrap_err();
        assert!(matches!(err, DomainError::Validation { .. }));
    }

    #[test]
    fn reason_and_reference_are_trimmed() {
        let record = record_with(10);
        let req = request(&record, MovementKind::Exit, 1)
            .with_reason("  damaged  ")
            .with_reference("   ");
        let planned = plan_movement(&record, &req).unwrap();
        assert_eq!(planned.reason, "damaged");
        assert_eq!(planned.reference, None);

        let req = request(&record, MovementKind::Entry, 1)
            .with_reason(" ")
            .with_reference("PO-42");
        let planned = plan_movement(&record, &req).unwrap();
        assert_eq!(planned.reason, "Stock entry");
        assert_eq!(planned.reference.as_deref(), Some("PO-42"));
    }

    #[test]
    fn planning_against_another_product_is_an_invariant_violation() {
        let record = record_with(10);
        let req = MovementRequest::new(ProductId::new(), MovementKind::Entry, 1, ActorId::new());
        assert!(matches!(
            plan_movement(&record, &req),
            Err(DomainError::InvariantViolation(_))
        ));
    }

    #[test]
    fn planning_does_not_touch_the_record() {
        let record = record_with(10);
        let before = record.clone();
        let _ = plan_movement(&record, &request(&record, MovementKind::Exit, 4)).unwrap();
        assert_eq!(record, before);
        assert_eq!(record.version(), 1);
    }

    #[test]
    fn kinds_parse_and_serialize_uppercase() {
        assert_eq!("exit".parse::<MovementKind>().unwrap(), MovementKind::Exit);
        assert!(matches!(
            "TRANSFER".parse::<MovementKind>(),
            Err(DomainError::Validation { .. })
        ));
        assert_eq!(
            serde_json::to_value(MovementKind::Adjustment).unwrap(),
            serde_json::json!("ADJUSTMENT")
        );
    }

    #[test]
    fn committed_movement_keeps_planned_fields() {
        let record = record_with(5);
        let planned = plan_movement(&record, &request(&record, MovementKind::Exit, 2)).unwrap();
        let at = Utc::now();
        let movement = planned.clone().commit(MovementId(7), at);

        assert_eq!(movement.id, MovementId(7));
        assert_eq!(movement.created_at, at);
        assert_eq!(movement.quantity_delta, planned.quantity_delta);
        assert_eq!(movement.magnitude(), 2);
        assert_eq!(movement.new_quantity, movement.previous_quantity + movement.quantity_delta);
    }
}

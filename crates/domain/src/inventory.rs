//! Physical inventory units and their status machine.

use chrono::{DateTime, NaiveDate, Utc};
use common::{InventoryUnitId, LocationId, ProductVariantId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Status of an inventory unit.
///
/// ```text
/// InTransit ──► Available ──► Reserved ──► Picked
///                   │            │           │
///                   ├──► Damaged ◄┴───────────┘
///                   └──► Quarantine ◄──► Damaged
/// ```
///
/// Damaged and Quarantine only return to Available through
/// [`InventoryUnit::reclassify`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitStatus {
    #[default]
    Available,
    Reserved,
    Picked,
    Damaged,
    InTransit,
    Quarantine,
}

impl UnitStatus {
    /// Returns true if `to` is reachable from this status by an ordinary move.
    pub fn can_transition_to(&self, to: UnitStatus) -> bool {
        use UnitStatus::*;
        matches!(
            (self, to),
            (Available, Reserved | Damaged | InTransit | Quarantine)
                | (Reserved, Available | Picked | Damaged)
                | (Picked, Damaged)
                | (InTransit, Available | Damaged)
                | (Quarantine, Damaged)
                | (Damaged, Quarantine)
        )
    }

    /// Returns true if units in this status may be allocated.
    pub fn is_allocatable(&self) -> bool {
        matches!(self, UnitStatus::Available)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::Available => "AVAILABLE",
            UnitStatus::Reserved => "RESERVED",
            UnitStatus::Picked => "PICKED",
            UnitStatus::Damaged => "DAMAGED",
            UnitStatus::InTransit => "IN_TRANSIT",
            UnitStatus::Quarantine => "QUARANTINE",
        }
    }
}

impl std::fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A location-scoped quantity of one product variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub id: InventoryUnitId,
    pub product_variant_id: ProductVariantId,
    pub location_id: LocationId,
    pub quantity: u32,
    pub status: UnitStatus,
    pub lot_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
    pub received_at: DateTime<Utc>,
    /// Unit cost in minor currency units.
    pub unit_cost: Option<i64>,
}

impl InventoryUnit {
    /// Creates an AVAILABLE unit received now.
    pub fn new(product_variant_id: ProductVariantId, location_id: LocationId, quantity: u32) -> Self {
        Self {
            id: InventoryUnitId::new(),
            product_variant_id,
            location_id,
            quantity,
            status: UnitStatus::Available,
            lot_number: None,
            expiry_date: None,
            received_at: Utc::now(),
            unit_cost: None,
        }
    }

    pub fn with_lot(mut self, lot_number: impl Into<String>) -> Self {
        self.lot_number = Some(lot_number.into());
        self
    }

    pub fn with_expiry(mut self, expiry_date: NaiveDate) -> Self {
        self.expiry_date = Some(expiry_date);
        self
    }

    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = received_at;
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: i64) -> Self {
        self.unit_cost = Some(unit_cost);
        self
    }

    pub fn with_status(mut self, status: UnitStatus) -> Self {
        self.status = status;
        self
    }

    /// Moves the unit to a new status.
    pub fn transition_to(&mut self, to: UnitStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::transition("inventory unit", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    /// Returns a damaged or quarantined unit to stock.
    pub fn reclassify(&mut self) -> Result<()> {
        match self.status {
            UnitStatus::Damaged | UnitStatus::Quarantine => {
                self.status = UnitStatus::Available;
                Ok(())
            }
            other => Err(DomainError::transition(
                "inventory unit",
                other,
                UnitStatus::Available,
            )),
        }
    }

    /// Removes quantity from the unit.
    pub fn decrement(&mut self, quantity: u32) -> Result<()> {
        if quantity > self.quantity {
            return Err(DomainError::InsufficientQuantity {
                unit_id: self.id,
                requested: quantity,
                available: self.quantity,
            });
        }
        self.quantity -= quantity;
        Ok(())
    }
}

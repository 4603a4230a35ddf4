//! Reservations of inventory against order items.

use chrono::{DateTime, NaiveDate, Utc};
use common::{AllocationId, InventoryUnitId, LocationId, OrderId, OrderItemId, ProductVariantId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Status of an allocation.
///
/// ```text
/// Allocated ──► Picked ──► Released
///     │                       ▲
///     └───────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllocationStatus {
    #[default]
    Allocated,
    Picked,
    Released,
}

impl AllocationStatus {
    /// Returns true if the allocation still holds ledger quantity.
    pub fn is_active(&self) -> bool {
        !matches!(self, AllocationStatus::Released)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationStatus::Allocated => "ALLOCATED",
            AllocationStatus::Picked => "PICKED",
            AllocationStatus::Released => "RELEASED",
        }
    }
}

impl std::fmt::Display for AllocationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A reservation of quantity from one inventory unit against one order item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    pub id: AllocationId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub inventory_unit_id: InventoryUnitId,
    pub product_variant_id: ProductVariantId,
    pub location_id: LocationId,
    pub quantity: u32,
    pub lot_number: Option<String>,
    pub status: AllocationStatus,
    pub created_at: DateTime<Utc>,
}

impl Allocation {
    /// Creates an ALLOCATED reservation of `quantity` from `unit` for `request`.
    pub fn new(request: &AllocationRequest, unit: &AvailableUnit, quantity: u32) -> Self {
        Self {
            id: AllocationId::new(),
            order_id: request.order_id,
            order_item_id: request.order_item_id,
            inventory_unit_id: unit.unit_id,
            product_variant_id: request.product_variant_id,
            location_id: unit.location_id,
            quantity,
            lot_number: unit.lot_number.clone(),
            status: AllocationStatus::Allocated,
            created_at: Utc::now(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// Promotes ALLOCATED to PICKED. Returns false if already PICKED.
    pub fn mark_picked(&mut self) -> Result<bool> {
        match self.status {
            AllocationStatus::Allocated => {
                self.status = AllocationStatus::Picked;
                Ok(true)
            }
            AllocationStatus::Picked => Ok(false),
            AllocationStatus::Released => Err(DomainError::transition(
                "allocation",
                self.status,
                AllocationStatus::Picked,
            )),
        }
    }

    /// Releases the reservation.
    pub fn release(&mut self) -> Result<()> {
        if !self.is_active() {
            return Err(DomainError::transition(
                "allocation",
                self.status,
                AllocationStatus::Released,
            ));
        }
        self.status = AllocationStatus::Released;
        Ok(())
    }
}

/// A demand for one order item's quantity of a product variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationRequest {
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub product_variant_id: ProductVariantId,
    pub quantity: u32,
}

impl AllocationRequest {
    /// Returns a copy of this request asking for a different quantity.
    pub fn with_quantity(&self, quantity: u32) -> Self {
        Self {
            quantity,
            ..self.clone()
        }
    }
}

/// A unit's current availability as seen by the policy engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableUnit {
    pub unit_id: InventoryUnitId,
    pub product_variant_id: ProductVariantId,
    pub location_id: LocationId,
    /// Zone of the unit's location, filled in by the caller when known.
    pub zone: Option<String>,
    pub available: u32,
    pub received_at: DateTime<Utc>,
    pub expiry_date: Option<NaiveDate>,
    pub lot_number: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn allocation() -> Allocation {
        let request = AllocationRequest {
            order_id: OrderId::new(),
            order_item_id: OrderItemId::new(),
            product_variant_id: ProductVariantId::new(),
            quantity: 4,
        };
        let unit = AvailableUnit {
            unit_id: InventoryUnitId::new(),
            product_variant_id: request.product_variant_id,
            location_id: LocationId::new(),
            zone: None,
            available: 10,
            received_at: Utc::now(),
            expiry_date: None,
            lot_number: Some("LOT-7".to_string()),
        };
        Allocation::new(&request, &unit, 4)
    }

    #[test]
    fn new_allocation_copies_unit_and_request() {
        let a = allocation();
        assert_eq!(a.status, AllocationStatus::Allocated);
        assert_eq!(a.quantity, 4);
        assert_eq!(a.lot_number.as_deref(), Some("LOT-7"));
    }

    #[test]
    fn mark_picked_is_idempotent() {
        let mut a = allocation();
        assert!(a.mark_picked().unwrap());
        assert!(!a.mark_picked().unwrap());
        assert_eq!(a.status, AllocationStatus::Picked);
    }

    #[test]
    fn released_allocation_cannot_be_released_again() {
        let mut a = allocation();
        a.release().unwrap();
        assert!(!a.is_active());
        assert!(a.release().is_err());
        assert!(a.mark_picked().is_err());
    }
}

//! Unit-level quantity bookkeeping.
//!
//! The ledger is built from a snapshot of inventory units and the active
//! allocations against them. Reserved quantity is never stored on the unit;
//! it is the sum of the unit's non-released allocations, so
//! `reserved <= quantity` is the conservation invariant every operation here
//! preserves.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use common::{InventoryUnitId, ProductVariantId};
use serde::Serialize;

use crate::{
    allocation::{Allocation, AvailableUnit},
    error::{DomainError, Result},
    inventory::{InventoryUnit, UnitStatus},
};

/// In-memory view of a set of inventory units and their reservations.
#[derive(Debug, Clone, Default)]
pub struct InventoryLedger {
    units: BTreeMap<InventoryUnitId, InventoryUnit>,
    reserved: HashMap<InventoryUnitId, u32>,
    dirty: BTreeSet<InventoryUnitId>,
}

impl InventoryLedger {
    /// Builds a ledger from units and allocations. Released allocations and
    /// allocations against units outside the snapshot are ignored.
    pub fn new(units: impl IntoIterator<Item = InventoryUnit>, allocations: &[Allocation]) -> Self {
        let units: BTreeMap<_, _> = units.into_iter().map(|u| (u.id, u)).collect();
        let mut reserved = HashMap::new();
        for allocation in allocations {
            if allocation.is_active() && units.contains_key(&allocation.inventory_unit_id) {
                let held = reserved.entry(allocation.inventory_unit_id).or_insert(0u32);
                *held = held.saturating_add(allocation.quantity);
            }
        }
        Self {
            units,
            reserved,
            dirty: BTreeSet::new(),
        }
    }

    pub fn unit(&self, unit_id: InventoryUnitId) -> Option<&InventoryUnit> {
        self.units.get(&unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = &InventoryUnit> {
        self.units.values()
    }

    /// Quantity currently held by active allocations against the unit.
    pub fn reserved(&self, unit_id: InventoryUnitId) -> u32 {
        self.reserved.get(&unit_id).copied().unwrap_or(0)
    }

    /// Unreserved quantity on the unit, regardless of status.
    pub fn unreserved(&self, unit_id: InventoryUnitId) -> Result<u32> {
        let unit = self.get(unit_id)?;
        Ok(unit.quantity.saturating_sub(self.reserved(unit_id)))
    }

    /// Reserves quantity on an AVAILABLE unit.
    pub fn reserve(&mut self, unit_id: InventoryUnitId, quantity: u32) -> Result<()> {
        ensure_positive(quantity)?;
        let unit = self.get(unit_id)?;
        if !unit.status.is_allocatable() {
            return Err(DomainError::transition(
                "inventory unit",
                unit.status,
                UnitStatus::Reserved,
            ));
        }
        let available = unit.quantity.saturating_sub(self.reserved(unit_id));
        if quantity > available {
            return Err(DomainError::InsufficientQuantity {
                unit_id,
                requested: quantity,
                available,
            });
        }
        *self.reserved.entry(unit_id).or_insert(0) += quantity;
        Ok(())
    }

    /// Returns reserved quantity to availability.
    pub fn release(&mut self, unit_id: InventoryUnitId, quantity: u32) -> Result<()> {
        ensure_positive(quantity)?;
        self.get(unit_id)?;
        let reserved = self.reserved(unit_id);
        if quantity > reserved {
            return Err(DomainError::InsufficientQuantity {
                unit_id,
                requested: quantity,
                available: reserved,
            });
        }
        self.reserved.insert(unit_id, reserved - quantity);
        Ok(())
    }

    /// Removes reserved quantity from the unit for good (shipment).
    pub fn consume(&mut self, unit_id: InventoryUnitId, quantity: u32) -> Result<()> {
        ensure_positive(quantity)?;
        let reserved = self.reserved(unit_id);
        if quantity > reserved {
            return Err(DomainError::InsufficientQuantity {
                unit_id,
                requested: quantity,
                available: reserved,
            });
        }
        let unit = self.get_mut(unit_id)?;
        unit.decrement(quantity)?;
        self.reserved.insert(unit_id, reserved - quantity);
        self.dirty.insert(unit_id);
        Ok(())
    }

    /// Moves unreserved quantity into a new unit with a new status.
    ///
    /// The remainder keeps the original status. Returns the new unit's id.
    pub fn split(
        &mut self,
        unit_id: InventoryUnitId,
        quantity: u32,
        status: UnitStatus,
    ) -> Result<InventoryUnitId> {
        ensure_positive(quantity)?;
        let available = self.unreserved(unit_id)?;
        let unit = self.get_mut(unit_id)?;
        if !unit.status.can_transition_to(status) {
            return Err(DomainError::transition("inventory unit", unit.status, status));
        }
        if quantity > available {
            return Err(DomainError::InsufficientQuantity {
                unit_id,
                requested: quantity,
                available,
            });
        }
        unit.decrement(quantity)?;

        let mut split = unit.clone();
        split.id = InventoryUnitId::new();
        split.quantity = quantity;
        split.status = status;
        let split_id = split.id;

        self.units.insert(split_id, split);
        self.dirty.insert(unit_id);
        self.dirty.insert(split_id);
        Ok(split_id)
    }

    /// Returns a damaged or quarantined unit to AVAILABLE.
    pub fn reclassify(&mut self, unit_id: InventoryUnitId) -> Result<()> {
        self.get_mut(unit_id)?.reclassify()?;
        self.dirty.insert(unit_id);
        Ok(())
    }

    /// Allocatable units of a variant, oldest receipt first.
    ///
    /// Only AVAILABLE units with positive availability are returned.
    pub fn get_available(&self, product_variant_id: ProductVariantId) -> Vec<AvailableUnit> {
        let mut available: Vec<AvailableUnit> = self
            .units
            .values()
            .filter(|u| u.product_variant_id == product_variant_id && u.status.is_allocatable())
            .filter_map(|u| {
                let remaining = u.quantity.saturating_sub(self.reserved(u.id));
                (remaining > 0).then(|| AvailableUnit {
                    unit_id: u.id,
                    product_variant_id: u.product_variant_id,
                    location_id: u.location_id,
                    zone: None,
                    available: remaining,
                    received_at: u.received_at,
                    expiry_date: u.expiry_date,
                    lot_number: u.lot_number.clone(),
                })
            })
            .collect();
        available.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then(a.unit_id.cmp(&b.unit_id))
        });
        available
    }

    /// Total allocatable quantity of a variant.
    pub fn total_available(&self, product_variant_id: ProductVariantId) -> u32 {
        self.get_available(product_variant_id)
            .iter()
            .map(|u| u.available)
            .fold(0, u32::saturating_add)
    }

    /// Drains the units whose stored fields changed since the last call.
    pub fn take_dirty(&mut self) -> Vec<InventoryUnit> {
        std::mem::take(&mut self.dirty)
            .into_iter()
            .filter_map(|id| self.units.get(&id).cloned())
            .collect()
    }

    fn get(&self, unit_id: InventoryUnitId) -> Result<&InventoryUnit> {
        self.units
            .get(&unit_id)
            .ok_or_else(|| DomainError::not_found("inventory unit", unit_id))
    }

    fn get_mut(&mut self, unit_id: InventoryUnitId) -> Result<&mut InventoryUnit> {
        self.units
            .get_mut(&unit_id)
            .ok_or_else(|| DomainError::not_found("inventory unit", unit_id))
    }
}

fn ensure_positive(quantity: u32) -> Result<()> {
    if quantity == 0 {
        return Err(DomainError::InvalidQuantity {
            quantity,
            reason: "quantity must be positive",
        });
    }
    Ok(())
}

/// A unit whose active allocations exceed its quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConservationViolation {
    pub unit_id: InventoryUnitId,
    pub quantity: u32,
    pub reserved: u32,
}

/// Checks `Σ active allocation quantity <= unit quantity` for every unit.
pub fn verify_conservation(
    units: &[InventoryUnit],
    allocations: &[Allocation],
) -> Vec<ConservationViolation> {
    let mut reserved: HashMap<InventoryUnitId, u32> = HashMap::new();
    for allocation in allocations.iter().filter(|a| a.is_active()) {
        let held = reserved.entry(allocation.inventory_unit_id).or_insert(0);
        *held = held.saturating_add(allocation.quantity);
    }

    units
        .iter()
        .filter_map(|unit| {
            let held = reserved.get(&unit.id).copied().unwrap_or(0);
            (held > unit.quantity).then_some(ConservationViolation {
                unit_id: unit.id,
                quantity: unit.quantity,
                reserved: held,
            })
        })
        .collect()
}

//! Order state machine and per-item fulfillment counters.

use chrono::{DateTime, Utc};
use common::{OrderId, OrderItemId, ProductVariantId};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// The status of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// Pending ─► Confirmed ─┬─► Allocated ──────────► Picking ─► Picked ─► Packing ─► Packed ─► Shipped
///                       ├─► PartiallyAllocated ─┐    │
///                       └─► Backordered ◄───────┘    └─► Allocated (pick task cancelled)
///
/// Backordered ─► Allocated | PartiallyAllocated    (resolve_backorder)
/// OnHold ◄─► Pending | Confirmed
/// any non-terminal ─► Cancelled
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Allocated,
    PartiallyAllocated,
    Backordered,
    OnHold,
    Picking,
    Picked,
    Packing,
    Packed,
    Shipped,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 12] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Allocated,
        OrderStatus::PartiallyAllocated,
        OrderStatus::Backordered,
        OrderStatus::OnHold,
        OrderStatus::Picking,
        OrderStatus::Picked,
        OrderStatus::Packing,
        OrderStatus::Packed,
        OrderStatus::Shipped,
        OrderStatus::Cancelled,
    ];

    /// The fixed adjacency table.
    pub fn can_transition(from: OrderStatus, to: OrderStatus) -> bool {
        use OrderStatus::*;
        match from {
            Pending => matches!(
                to,
                Confirmed
                    | Allocated
                    | PartiallyAllocated
                    | Backordered
                    | OnHold
                    | Picking
                    | Cancelled
            ),
            Confirmed => matches!(
                to,
                Allocated | PartiallyAllocated | Backordered | OnHold | Picking | Cancelled
            ),
            Allocated => matches!(to, Picking | OnHold | Cancelled),
            PartiallyAllocated => matches!(to, Allocated | Backordered | OnHold | Cancelled),
            Backordered => matches!(to, Allocated | PartiallyAllocated | OnHold | Cancelled),
            OnHold => matches!(to, Pending | Confirmed | Cancelled),
            Picking => matches!(to, Picked | Allocated | OnHold | Cancelled),
            Picked => matches!(to, Packing | Cancelled),
            Packing => matches!(to, Packed | Cancelled),
            Packed => matches!(to, Shipped | Cancelled),
            Shipped | Cancelled => false,
        }
    }

    /// Returns `to` if the move is in the table.
    pub fn assert_transition(from: OrderStatus, to: OrderStatus) -> Result<OrderStatus> {
        if Self::can_transition(from, to) {
            Ok(to)
        } else {
            Err(DomainError::transition("order", from, to))
        }
    }

    /// Returns true if a pick list may be walked for orders in this status.
    pub fn is_pickable(&self) -> bool {
        matches!(self, OrderStatus::Allocated)
    }

    /// Returns true if orders in this status may ship.
    pub fn is_shippable(&self) -> bool {
        matches!(self, OrderStatus::Packed)
    }

    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Shipped | OrderStatus::Cancelled)
    }

    /// Returns true if an allocation run may change this order's reservations.
    pub fn accepts_allocation(&self) -> bool {
        matches!(
            self,
            OrderStatus::Pending
                | OrderStatus::Confirmed
                | OrderStatus::PartiallyAllocated
                | OrderStatus::Backordered
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Confirmed => "CONFIRMED",
            OrderStatus::Allocated => "ALLOCATED",
            OrderStatus::PartiallyAllocated => "PARTIALLY_ALLOCATED",
            OrderStatus::Backordered => "BACKORDERED",
            OrderStatus::OnHold => "ON_HOLD",
            OrderStatus::Picking => "PICKING",
            OrderStatus::Picked => "PICKED",
            OrderStatus::Packing => "PACKING",
            OrderStatus::Packed => "PACKED",
            OrderStatus::Shipped => "SHIPPED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A line of an order.
///
/// Counters satisfy `0 <= shipped <= picked <= allocated <= quantity`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: OrderItemId,
    /// `None` until the storefront SKU is matched to a product variant.
    pub product_variant_id: Option<ProductVariantId>,
    pub quantity: u32,
    pub allocated: u32,
    pub picked: u32,
    pub shipped: u32,
}

impl OrderItem {
    pub fn new(product_variant_id: ProductVariantId, quantity: u32) -> Self {
        Self {
            id: OrderItemId::new(),
            product_variant_id: Some(product_variant_id),
            quantity,
            allocated: 0,
            picked: 0,
            shipped: 0,
        }
    }

    /// An item whose SKU has not been matched yet.
    pub fn unmatched(quantity: u32) -> Self {
        Self {
            id: OrderItemId::new(),
            product_variant_id: None,
            quantity,
            allocated: 0,
            picked: 0,
            shipped: 0,
        }
    }

    /// Quantity still to be allocated.
    pub fn remainder(&self) -> u32 {
        self.quantity - self.allocated
    }

    pub fn add_allocated(&mut self, quantity: u32) -> Result<()> {
        if quantity > self.remainder() {
            return Err(DomainError::InvalidQuantity {
                quantity,
                reason: "allocation exceeds item remainder",
            });
        }
        self.allocated += quantity;
        Ok(())
    }

    /// Drops every unshipped reservation. Returns the quantity released.
    pub fn release_unshipped(&mut self) -> u32 {
        let released = self.allocated - self.shipped;
        self.allocated = self.shipped;
        self.picked = self.shipped;
        released
    }

    pub fn add_picked(&mut self, quantity: u32) -> Result<()> {
        if self.picked + quantity > self.allocated {
            return Err(DomainError::InvalidQuantity {
                quantity,
                reason: "picked quantity exceeds allocated",
            });
        }
        self.picked += quantity;
        Ok(())
    }

    pub fn add_shipped(&mut self, quantity: u32) -> Result<()> {
        if self.shipped + quantity > self.picked {
            return Err(DomainError::InvalidQuantity {
                quantity,
                reason: "shipped quantity exceeds picked",
            });
        }
        self.shipped += quantity;
        Ok(())
    }

    /// Returns true if the counters are consistent.
    pub fn counters_consistent(&self) -> bool {
        self.shipped <= self.picked && self.picked <= self.allocated && self.allocated <= self.quantity
    }
}

/// A customer order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    /// Higher is more urgent.
    pub priority: i32,
    pub items: Vec<OrderItem>,
    pub hold_reason: Option<String>,
    pub tracking_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(items: Vec<OrderItem>) -> Self {
        let now = Utc::now();
        Self {
            id: OrderId::new(),
            status: OrderStatus::Pending,
            priority: 0,
            items,
            hold_reason: None,
            tracking_number: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_status(mut self, status: OrderStatus) -> Self {
        self.status = status;
        self
    }

    pub fn item(&self, item_id: OrderItemId) -> Result<&OrderItem> {
        self.items
            .iter()
            .find(|i| i.id == item_id)
            .ok_or_else(|| DomainError::not_found("order item", item_id))
    }

    pub fn item_mut(&mut self, item_id: OrderItemId) -> Result<&mut OrderItem> {
        self.items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| DomainError::not_found("order item", item_id))
    }

    /// Items with a resolved product variant.
    pub fn matched_items(&self) -> impl Iterator<Item = &OrderItem> {
        self.items.iter().filter(|i| i.product_variant_id.is_some())
    }

    pub fn total_allocated(&self) -> u32 {
        self.items.iter().map(|i| i.allocated).fold(0, u32::saturating_add)
    }

    /// Quantity the order asks the warehouse for: matched items only.
    pub fn requested_quantity(&self) -> u32 {
        self.matched_items()
            .fold(0u32, |total, i| total.saturating_add(i.quantity))
    }

    /// Returns true if something was reserved and every matched item is
    /// fully allocated.
    pub fn is_fully_allocated(&self) -> bool {
        self.total_allocated() > 0 && self.matched_items().all(|i| i.remainder() == 0)
    }

    /// Returns true if some matched item requesting `variant` is short.
    pub fn awaits_variant(&self, variant: ProductVariantId) -> bool {
        self.matched_items()
            .any(|i| i.product_variant_id == Some(variant) && i.remainder() > 0)
    }

    /// Moves the order along the adjacency table.
    ///
    /// Leaving BACKORDERED for an allocated status must go through
    /// [`Order::resolve_backorder`].
    pub fn transition_to(&mut self, to: OrderStatus) -> Result<()> {
        if self.status == OrderStatus::Backordered
            && matches!(to, OrderStatus::Allocated | OrderStatus::PartiallyAllocated)
        {
            return Err(DomainError::precondition(
                "backordered orders are re-allocated through resolve_backorder",
            ));
        }
        self.status = OrderStatus::assert_transition(self.status, to)?;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Returns a backordered order to an allocated status once stock has
    /// actually been reserved for it.
    pub fn resolve_backorder(&mut self, to: OrderStatus) -> Result<()> {
        if self.status != OrderStatus::Backordered {
            return Err(DomainError::transition("order", self.status, to));
        }
        if !matches!(to, OrderStatus::Allocated | OrderStatus::PartiallyAllocated) {
            return Err(DomainError::transition("order", self.status, to));
        }
        if self.total_allocated() == 0 {
            return Err(DomainError::precondition(
                "backorder cannot resolve without allocated stock",
            ));
        }
        if to == OrderStatus::Allocated && !self.is_fully_allocated() {
            return Err(DomainError::precondition(
                "order is not fully allocated",
            ));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Puts the order on hold.
    pub fn hold(&mut self, reason: impl Into<String>) -> Result<()> {
        self.transition_to(OrderStatus::OnHold)?;
        self.hold_reason = Some(reason.into());
        Ok(())
    }

    /// Releases a hold, returning the order to CONFIRMED.
    pub fn release_hold(&mut self) -> Result<()> {
        if self.status != OrderStatus::OnHold {
            return Err(DomainError::transition(
                "order",
                self.status,
                OrderStatus::Confirmed,
            ));
        }
        self.transition_to(OrderStatus::Confirmed)?;
        self.hold_reason = None;
        Ok(())
    }
}

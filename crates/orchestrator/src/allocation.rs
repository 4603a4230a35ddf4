//! Allocation orchestration.
//!
//! Reserves stock for orders through the policy engine, releases it on
//! cancellation, and finds backordered orders worth retrying after a
//! receipt. Every mutating call is one unit of work: the ledger is read,
//! reservations are written, counters and order status move, and the
//! events are appended, all or nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use common::{
    AllocationId, IdempotencyKey, InventoryUnitId, OrderId, OrderItemId, ProductVariantId, UserId,
};
use domain::{
    Allocation, AllocationRequest, AvailableUnit, BinStatus, DomainError, ErrorKind,
    InventoryLedger, InventoryUnit, Location, Order, OrderStatus, PolicyConfig, PolicyEngine,
    UnitStatus,
};
use event_log::{EventPublisher, EventType, publish_best_effort};
use serde::{Deserialize, Serialize};
use serde_json::json;
use store::{
    AllocationRepository, FulfillmentStore, IdempotencyRepository,
    InventoryRepository, LocationRepository, OrderRepository, StoreTx,
};

use crate::error::{OrchestratorError, Result};
use crate::events::Emitter;

/// Idempotency scope of [`AllocationOrchestrator::allocate_order`].
pub const ALLOCATE_ORDER_SCOPE: &str = "allocateOrder";

/// How an allocation run left the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Disposition {
    FullyAllocated,
    PartiallyAllocated,
    Backordered,
    OnHold,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Disposition::FullyAllocated => "fully_allocated",
            Disposition::PartiallyAllocated => "partially_allocated",
            Disposition::Backordered => "backordered",
            Disposition::OnHold => "on_hold",
        }
    }
}

/// An order item the run could not fully cover.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Shortage {
    pub order_item_id: OrderItemId,
    pub product_variant_id: ProductVariantId,
    pub requested: u32,
    pub allocatable: u32,
}

/// Result of one `allocate_order` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocationOutcome {
    pub order_id: OrderId,
    pub disposition: Disposition,
    pub status: OrderStatus,
    /// Allocations created by this run.
    pub allocated: Vec<Allocation>,
    pub shortages: Vec<Shortage>,
    /// True when the result was recorded by an earlier run with the same key.
    #[serde(default)]
    pub replayed: bool,
}

impl AllocationOutcome {
    fn unchanged(order: &Order, disposition: Disposition) -> Self {
        Self {
            order_id: order.id,
            disposition,
            status: order.status,
            allocated: Vec::new(),
            shortages: Vec::new(),
            replayed: false,
        }
    }
}

/// An order that failed inside a batch run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub order_id: OrderId,
    pub kind: ErrorKind,
    pub message: String,
}

/// Per-disposition report of a batch run.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchAllocationReport {
    pub fully_allocated: Vec<OrderId>,
    pub partially_allocated: Vec<OrderId>,
    pub backordered: Vec<OrderId>,
    pub on_hold: Vec<OrderId>,
    pub failed: Vec<BatchFailure>,
}

impl BatchAllocationReport {
    fn record(&mut self, outcome: &AllocationOutcome) {
        let bucket = match outcome.disposition {
            Disposition::FullyAllocated => &mut self.fully_allocated,
            Disposition::PartiallyAllocated => &mut self.partially_allocated,
            Disposition::Backordered => &mut self.backordered,
            Disposition::OnHold => &mut self.on_hold,
        };
        bucket.push(outcome.order_id);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseOutcome {
    pub order_id: OrderId,
    pub released: Vec<AllocationId>,
    pub quantity: u32,
    /// The order was already cancelled; nothing changed.
    pub already_cancelled: bool,
}

/// A backordered order that can make progress on newly available stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackorderCandidate {
    pub order_id: OrderId,
    pub status: OrderStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    /// Quantity of the variant the order still needs.
    pub awaiting: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptOutcome {
    pub unit_id: InventoryUnitId,
    pub candidates: Vec<BackorderCandidate>,
}

/// Unreserved stock moved off a unit into a new unit with another status.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitAdjustment {
    /// The unit that kept its status and the rest of its quantity.
    pub source: InventoryUnit,
    /// The new unit holding the adjusted quantity.
    pub adjusted: InventoryUnit,
}

/// Drives allocation, release and backorder recovery.
pub struct AllocationOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    store: S,
    publisher: P,
    policy: PolicyEngine,
}

impl<S, P> AllocationOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P, config: &PolicyConfig) -> Self {
        Self {
            store,
            publisher,
            policy: PolicyEngine::new(config),
        }
    }

    /// Reserves stock for every unallocated remainder of the order.
    ///
    /// Only the remainder is requested, so re-running against an already
    /// allocated order creates nothing. With `allow_partial` false a single
    /// shortage discards every reservation of the run and the order becomes
    /// BACKORDERED. A key makes retries return the first run's outcome.
    #[tracing::instrument(skip(self, idempotency_key), fields(keyed = idempotency_key.is_some()))]
    pub async fn allocate_order(
        &self,
        order_id: OrderId,
        allow_partial: bool,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> Result<AllocationOutcome> {
        metrics::counter!("allocation_runs_total").increment(1);
        let start = std::time::Instant::now();
        let emitter = Emitter::new(None);
        let policy = &self.policy;

        let committed = self
            .store
            .transaction(move |tx| -> Result<AllocationOutcome> {
                if let Some(key) = idempotency_key
                    && let Some(recorded) = tx.recorded(ALLOCATE_ORDER_SCOPE, key)
                {
                    let mut outcome: AllocationOutcome = serde_json::from_value(recorded)?;
                    if outcome.order_id != order_id {
                        return Err(DomainError::conflict(
                            "idempotency key",
                            format!("key {key} was already used for order {}", outcome.order_id),
                        )
                        .into());
                    }
                    outcome.replayed = true;
                    return Ok(outcome);
                }

                let outcome = allocate_in(tx, policy, &emitter, order_id, allow_partial)?;
                if let Some(key) = idempotency_key {
                    tx.record(ALLOCATE_ORDER_SCOPE, key, serde_json::to_value(&outcome)?);
                }
                Ok(outcome)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        let outcome = committed.value;
        if !outcome.replayed {
            metrics::counter!(
                "allocation_outcomes_total",
                "disposition" => outcome.disposition.as_str()
            )
            .increment(1);
        }
        metrics::histogram!("allocation_duration_seconds").record(start.elapsed().as_secs_f64());
        tracing::info!(
            %order_id,
            disposition = outcome.disposition.as_str(),
            allocations = outcome.allocated.len(),
            replayed = outcome.replayed,
            "allocation finished"
        );
        Ok(outcome)
    }

    /// Runs `allocate_order` for each order, one unit of work per order.
    ///
    /// A failing order is reported and does not stop the batch. Per-order
    /// keys are derived from `idempotency_key`.
    #[tracing::instrument(skip(self, order_ids, idempotency_key), fields(orders = order_ids.len()))]
    pub async fn allocate_orders(
        &self,
        order_ids: &[OrderId],
        allow_partial: bool,
        idempotency_key: Option<&IdempotencyKey>,
    ) -> BatchAllocationReport {
        let mut report = BatchAllocationReport::default();
        for &order_id in order_ids {
            let key = idempotency_key.map(|k| k.derive(order_id));
            match self
                .allocate_order(order_id, allow_partial, key.as_ref())
                .await
            {
                Ok(outcome) => report.record(&outcome),
                Err(error) => {
                    tracing::warn!(%order_id, %error, "order failed in batch allocation");
                    report.failed.push(BatchFailure {
                        order_id,
                        kind: error.kind(),
                        message: error.to_string(),
                    });
                }
            }
        }
        report
    }

    /// Releases every active allocation of the order and cancels it.
    ///
    /// Open tasks and bins of the order are cancelled with it. Calling this
    /// on a cancelled order is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn release_allocations(
        &self,
        order_id: OrderId,
        reason: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<ReleaseOutcome> {
        let emitter = Emitter::new(user_id);
        let reason = reason.as_deref();
        let committed = self
            .store
            .transaction(move |tx| -> Result<ReleaseOutcome> {
                release_in(tx, &emitter, order_id, reason)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        let outcome = committed.value;
        if !outcome.already_cancelled {
            metrics::counter!("allocations_released_total").increment(outcome.released.len() as u64);
            tracing::info!(
                %order_id,
                released = outcome.released.len(),
                quantity = outcome.quantity,
                "allocations released"
            );
        }
        Ok(outcome)
    }

    /// Lists orders still waiting on `variant`, highest priority first,
    /// oldest first within a priority.
    ///
    /// Returns nothing while the variant has no available stock. The caller
    /// decides whether to re-run allocation for the candidates.
    #[tracing::instrument(skip(self))]
    pub async fn check_backordered_orders(
        &self,
        product_variant_id: ProductVariantId,
    ) -> Vec<BackorderCandidate> {
        self.store
            .read(move |tx| {
                let available =
                    variant_ledger(tx, product_variant_id).total_available(product_variant_id);
                if available == 0 {
                    return Vec::new();
                }

                let mut candidates: Vec<BackorderCandidate> = tx
                    .orders_with_status(&[
                        OrderStatus::Backordered,
                        OrderStatus::PartiallyAllocated,
                    ])
                    .into_iter()
                    .filter(|o| o.awaits_variant(product_variant_id))
                    .map(|o| BackorderCandidate {
                        order_id: o.id,
                        status: o.status,
                        priority: o.priority,
                        created_at: o.created_at,
                        awaiting: o
                            .matched_items()
                            .filter(|i| i.product_variant_id == Some(product_variant_id))
                            .map(|i| i.remainder())
                            .fold(0, u32::saturating_add),
                    })
                    .collect();
                candidates.sort_by(|a, b| {
                    b.priority
                        .cmp(&a.priority)
                        .then(a.created_at.cmp(&b.created_at))
                });
                candidates
            })
            .await
    }

    /// Registers a storage location.
    #[tracing::instrument(skip(self, location), fields(code = %location.code))]
    pub async fn create_location(&self, location: Location) -> Result<Location> {
        let committed = self
            .store
            .transaction(move |tx| -> Result<Location> {
                if tx.location(location.id).is_some()
                    || tx.location_by_code(&location.code).is_some()
                {
                    return Err(DomainError::conflict(
                        "location",
                        format!("location {} already exists", location.code),
                    )
                    .into());
                }
                tx.save_location(location.clone());
                Ok(location)
            })
            .await?;
        Ok(committed.value)
    }

    /// Accepts a new PENDING or CONFIRMED order.
    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    pub async fn place_order(&self, order: Order, user_id: Option<UserId>) -> Result<Order> {
        if !matches!(order.status, OrderStatus::Pending | OrderStatus::Confirmed) {
            return Err(DomainError::precondition(format!(
                "new orders must be PENDING or CONFIRMED, not {}",
                order.status
            ))
            .into());
        }
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<Order> {
                if tx.order(order.id).is_some() {
                    return Err(DomainError::conflict(
                        "order",
                        format!("order {} already exists", order.id),
                    )
                    .into());
                }
                emitter.emit(
                    tx,
                    EventType::OrderCreated,
                    order.id,
                    json!({
                        "status": order.status,
                        "priority": order.priority,
                        "items": order.items.len(),
                        "requested": order.requested_quantity(),
                    }),
                );
                tx.save_order(order.clone());
                Ok(order)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        tracing::info!("order placed");
        Ok(committed.value)
    }

    /// Records a received unit and returns the backorders it may unblock.
    #[tracing::instrument(skip(self, unit), fields(unit_id = %unit.id, variant = %unit.product_variant_id))]
    pub async fn receive_inventory(
        &self,
        unit: InventoryUnit,
        user_id: Option<UserId>,
    ) -> Result<ReceiptOutcome> {
        if unit.quantity == 0 {
            return Err(DomainError::InvalidQuantity {
                quantity: 0,
                reason: "received units must hold stock",
            }
            .into());
        }
        let emitter = Emitter::new(user_id);
        let unit_id = unit.id;
        let variant = unit.product_variant_id;

        let committed = self
            .store
            .transaction(move |tx| -> Result<()> {
                if tx.location(unit.location_id).is_none() {
                    return Err(DomainError::not_found("location", unit.location_id).into());
                }
                if tx.unit(unit.id).is_some() {
                    return Err(DomainError::conflict(
                        "inventory unit",
                        format!("unit {} was already received", unit.id),
                    )
                    .into());
                }
                emitter.emit_global(
                    tx,
                    EventType::InventoryReceived,
                    json!({
                        "unitId": unit.id,
                        "productVariantId": unit.product_variant_id,
                        "locationId": unit.location_id,
                        "quantity": unit.quantity,
                        "lotNumber": unit.lot_number,
                        "expiryDate": unit.expiry_date,
                    }),
                );
                tx.save_unit(unit);
                Ok(())
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        let candidates = self.check_backordered_orders(variant).await;
        tracing::info!(candidates = candidates.len(), "inventory received");
        Ok(ReceiptOutcome {
            unit_id,
            candidates,
        })
    }

    /// Moves `quantity` unreserved units of stock into a DAMAGED,
    /// QUARANTINE or IN_TRANSIT unit. Reserved stock cannot be adjusted.
    #[tracing::instrument(skip(self, reason))]
    pub async fn adjust_unit(
        &self,
        unit_id: InventoryUnitId,
        quantity: u32,
        status: UnitStatus,
        reason: Option<String>,
        user_id: Option<UserId>,
    ) -> Result<UnitAdjustment> {
        if !matches!(
            status,
            UnitStatus::Damaged | UnitStatus::Quarantine | UnitStatus::InTransit
        ) {
            return Err(DomainError::precondition(format!(
                "units cannot be adjusted into {status}"
            ))
            .into());
        }
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<UnitAdjustment> {
                let mut ledger = units_ledger(&*tx, &[unit_id]);
                let adjusted_id = ledger.split(unit_id, quantity, status)?;
                let (source, adjusted) = match (ledger.unit(unit_id), ledger.unit(adjusted_id)) {
                    (Some(source), Some(adjusted)) => (source.clone(), adjusted.clone()),
                    _ => return Err(DomainError::not_found("inventory unit", unit_id).into()),
                };
                for unit in ledger.take_dirty() {
                    tx.save_unit(unit);
                }
                emitter.emit_global(
                    tx,
                    EventType::InventoryAdjusted,
                    json!({
                        "unitId": unit_id,
                        "adjustedUnitId": adjusted_id,
                        "productVariantId": source.product_variant_id,
                        "quantity": quantity,
                        "status": status,
                        "remaining": source.quantity,
                        "reason": reason,
                    }),
                );
                Ok(UnitAdjustment { source, adjusted })
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        tracing::info!(%unit_id, quantity, %status, "inventory adjusted");
        Ok(committed.value)
    }

    /// Returns a damaged or quarantined unit to AVAILABLE and reports the
    /// backorders the restored stock may unblock.
    #[tracing::instrument(skip(self))]
    pub async fn reclassify_unit(
        &self,
        unit_id: InventoryUnitId,
        user_id: Option<UserId>,
    ) -> Result<ReceiptOutcome> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<InventoryUnit> {
                let mut ledger = units_ledger(&*tx, &[unit_id]);
                let previous = ledger
                    .unit(unit_id)
                    .map(|u| u.status)
                    .ok_or_else(|| DomainError::not_found("inventory unit", unit_id))?;
                ledger.reclassify(unit_id)?;
                let unit = ledger
                    .take_dirty()
                    .pop()
                    .ok_or_else(|| DomainError::not_found("inventory unit", unit_id))?;
                tx.save_unit(unit.clone());
                emitter.emit_global(
                    tx,
                    EventType::InventoryReclassified,
                    json!({
                        "unitId": unit_id,
                        "productVariantId": unit.product_variant_id,
                        "quantity": unit.quantity,
                        "previousStatus": previous,
                    }),
                );
                Ok(unit)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        let variant = committed.value.product_variant_id;
        let candidates = self.check_backordered_orders(variant).await;
        tracing::info!(%unit_id, candidates = candidates.len(), "inventory reclassified");
        Ok(ReceiptOutcome {
            unit_id,
            candidates,
        })
    }

    /// Puts an order on hold. Held orders are skipped by allocation.
    #[tracing::instrument(skip(self, reason))]
    pub async fn hold_order(
        &self,
        order_id: OrderId,
        reason: String,
        user_id: Option<UserId>,
    ) -> Result<Order> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<Order> {
                let mut order = load_order(tx, order_id)?;
                let previous = order.status;
                order.hold(reason.clone())?;
                emitter.emit(
                    tx,
                    EventType::OrderOnHold,
                    order_id,
                    json!({ "reason": reason, "previousStatus": previous }),
                );
                tx.save_order(order.clone());
                Ok(order)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        Ok(committed.value)
    }

    /// Releases a hold; the order returns to CONFIRMED.
    #[tracing::instrument(skip(self))]
    pub async fn release_hold(&self, order_id: OrderId, user_id: Option<UserId>) -> Result<Order> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<Order> {
                let mut order = load_order(tx, order_id)?;
                order.release_hold()?;
                emitter.emit(
                    tx,
                    EventType::OrderHoldReleased,
                    order_id,
                    json!({ "status": order.status }),
                );
                tx.save_order(order.clone());
                Ok(order)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        Ok(committed.value)
    }

    pub async fn order(&self, order_id: OrderId) -> Result<Order> {
        self.store
            .read(move |tx| load_order(tx, order_id))
            .await
    }

    /// Allocations of an order in creation order, released ones included.
    pub async fn allocations(&self, order_id: OrderId) -> Vec<Allocation> {
        self.store
            .read(move |tx| tx.allocations_for_order(order_id))
            .await
    }
}

fn allocate_in<Tx: StoreTx>(
    tx: &mut Tx,
    policy: &PolicyEngine,
    emitter: &Emitter,
    order_id: OrderId,
    allow_partial: bool,
) -> Result<AllocationOutcome> {
    let mut order = load_order(tx, order_id)?;
    match order.status {
        OrderStatus::OnHold => {
            emitter.emit(
                tx,
                EventType::OrderOnHold,
                order_id,
                json!({ "reason": order.hold_reason, "allocationSkipped": true }),
            );
            return Ok(AllocationOutcome::unchanged(&order, Disposition::OnHold));
        }
        OrderStatus::Allocated => {
            return Ok(AllocationOutcome::unchanged(
                &order,
                Disposition::FullyAllocated,
            ));
        }
        status if !status.accepts_allocation() => {
            return Err(DomainError::transition("order", status, OrderStatus::Allocated).into());
        }
        _ => {}
    }
    if order.requested_quantity() == 0 {
        return Err(DomainError::precondition(
            "order has no matched items with a positive quantity",
        )
        .into());
    }

    let demands: Vec<(OrderItemId, ProductVariantId, u32)> = order
        .matched_items()
        .filter(|i| i.remainder() > 0)
        .filter_map(|i| i.product_variant_id.map(|v| (i.id, v, i.remainder())))
        .collect();

    let mut ledgers: HashMap<ProductVariantId, InventoryLedger> = HashMap::new();
    let mut planned: Vec<Allocation> = Vec::new();
    let mut shortages = Vec::new();

    for (order_item_id, variant, remainder) in demands {
        let ledger = ledgers
            .entry(variant)
            .or_insert_with(|| variant_ledger(&*tx, variant));
        let available = with_zones(&*tx, ledger.get_available(variant));
        let request = AllocationRequest {
            order_id,
            order_item_id,
            product_variant_id: variant,
            quantity: remainder,
        };

        let allocations = match policy.allocate(&request, &available) {
            Ok(allocations) => allocations,
            Err(DomainError::InsufficientInventory { allocatable, .. }) => {
                shortages.push(Shortage {
                    order_item_id,
                    product_variant_id: variant,
                    requested: remainder,
                    allocatable,
                });
                if allow_partial && allocatable > 0 {
                    policy.allocate(&request.with_quantity(allocatable), &available)?
                } else {
                    Vec::new()
                }
            }
            Err(e) => return Err(e.into()),
        };

        // Later items of the same variant must see these reservations.
        for allocation in &allocations {
            ledger.reserve(allocation.inventory_unit_id, allocation.quantity)?;
        }
        planned.extend(allocations);
    }

    if !allow_partial && !shortages.is_empty() {
        planned.clear();
    }
    for allocation in &planned {
        order
            .item_mut(allocation.order_item_id)?
            .add_allocated(allocation.quantity)?;
        tx.save_allocation(allocation.clone());
    }

    let (disposition, target) = if order.is_fully_allocated() {
        (Disposition::FullyAllocated, OrderStatus::Allocated)
    } else if allow_partial && order.total_allocated() > 0 {
        (
            Disposition::PartiallyAllocated,
            OrderStatus::PartiallyAllocated,
        )
    } else {
        (Disposition::Backordered, OrderStatus::Backordered)
    };

    let previous = order.status;
    let resolved = previous == OrderStatus::Backordered && target != OrderStatus::Backordered;
    if resolved {
        order.resolve_backorder(target)?;
    } else if previous != target {
        order.transition_to(target)?;
    }

    if previous != target || !planned.is_empty() {
        let event_type = match disposition {
            Disposition::FullyAllocated => EventType::OrderAllocated,
            Disposition::PartiallyAllocated => EventType::OrderPartiallyAllocated,
            _ => EventType::OrderBackordered,
        };
        emitter.emit(
            tx,
            event_type,
            order_id,
            json!({
                "allocations": planned,
                "shortages": shortages,
                "allowPartial": allow_partial,
                "previousStatus": previous,
            }),
        );
        if resolved {
            emitter.emit(
                tx,
                EventType::OrderBackorderResolved,
                order_id,
                json!({ "status": target }),
            );
        }
    }
    tx.save_order(order.clone());

    Ok(AllocationOutcome {
        order_id,
        disposition,
        status: order.status,
        allocated: planned,
        shortages,
        replayed: false,
    })
}

fn release_in<Tx: StoreTx>(
    tx: &mut Tx,
    emitter: &Emitter,
    order_id: OrderId,
    reason: Option<&str>,
) -> Result<ReleaseOutcome> {
    let mut order = load_order(tx, order_id)?;
    if order.status == OrderStatus::Cancelled {
        return Ok(ReleaseOutcome {
            order_id,
            released: Vec::new(),
            quantity: 0,
            already_cancelled: true,
        });
    }
    OrderStatus::assert_transition(order.status, OrderStatus::Cancelled)?;

    let allocations: Vec<Allocation> = tx
        .allocations_for_order(order_id)
        .into_iter()
        .filter(|a| a.is_active())
        .collect();
    let mut unit_ids: Vec<InventoryUnitId> =
        allocations.iter().map(|a| a.inventory_unit_id).collect();
    unit_ids.sort();
    unit_ids.dedup();
    let mut ledger = units_ledger(&*tx, &unit_ids);

    let mut released = Vec::with_capacity(allocations.len());
    let mut quantity = 0;
    for mut allocation in allocations {
        ledger.release(allocation.inventory_unit_id, allocation.quantity)?;
        allocation.release()?;
        quantity += allocation.quantity;
        released.push(allocation.id);
        tx.save_allocation(allocation);
    }

    for item in &mut order.items {
        item.release_unshipped();
    }
    order.transition_to(OrderStatus::Cancelled)?;

    for mut task in tx
        .tasks_for_order(order_id)
        .into_iter()
        .filter(|t| t.status.is_active())
    {
        task.cancel()?;
        tx.save_task(task);
    }
    for mut bin in tx
        .bins_for_order(order_id)
        .into_iter()
        .filter(|b| matches!(b.status, BinStatus::Staged | BinStatus::Packing))
    {
        bin.cancel()?;
        tx.save_bin(bin);
    }
    tx.save_order(order);

    emitter.emit(
        tx,
        EventType::AllocationsReleased,
        order_id,
        json!({ "allocations": released, "quantity": quantity }),
    );
    emitter.emit(
        tx,
        EventType::OrderCancelled,
        order_id,
        json!({ "reason": reason }),
    );

    Ok(ReleaseOutcome {
        order_id,
        released,
        quantity,
        already_cancelled: false,
    })
}

pub(crate) fn load_order<Tx: StoreTx>(tx: &Tx, order_id: OrderId) -> Result<Order> {
    tx.order(order_id)
        .ok_or_else(|| OrchestratorError::from(DomainError::not_found("order", order_id)))
}

/// Ledger over every unit of a variant and the allocations against them.
pub(crate) fn variant_ledger<Tx: StoreTx>(
    tx: &Tx,
    product_variant_id: ProductVariantId,
) -> InventoryLedger {
    let units = tx.units_for_variant(product_variant_id);
    let ids: Vec<InventoryUnitId> = units.iter().map(|u| u.id).collect();
    let allocations = tx.active_allocations_for_units(&ids);
    InventoryLedger::new(units, &allocations)
}

/// Ledger over the given units only.
pub(crate) fn units_ledger<Tx: StoreTx>(tx: &Tx, unit_ids: &[InventoryUnitId]) -> InventoryLedger {
    let units: Vec<InventoryUnit> = unit_ids.iter().filter_map(|id| tx.unit(*id)).collect();
    let allocations = tx.active_allocations_for_units(unit_ids);
    InventoryLedger::new(units, &allocations)
}

fn with_zones<Tx: StoreTx>(tx: &Tx, mut available: Vec<AvailableUnit>) -> Vec<AvailableUnit> {
    for unit in &mut available {
        unit.zone = tx.location(unit.location_id).and_then(|l| l.zone);
    }
    available
}

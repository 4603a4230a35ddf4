//! Packing and shipment.

use std::collections::HashMap;

use common::{
    AllocationId, InventoryUnitId, OrderId, PackageId, ProductVariantId, UserId, WorkTaskId,
};
use domain::{
    AllocationStatus, BinStatus, DomainError, OrderStatus, Package, PackageDetails, TaskItem,
    TaskKind, TaskStatus, WorkTask,
};
use event_log::{EventPublisher, EventType, publish_best_effort};
use serde::Serialize;
use serde_json::json;
use store::{
    AllocationRepository, BinRepository, FulfillmentStore, InventoryRepository, OrderRepository,
    PackageRepository, StoreTx, TaskRepository,
};

use crate::allocation::{load_order, units_ledger};
use crate::error::Result;
use crate::events::Emitter;
use crate::picking::load_task;

/// Progress after one scanned unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanVerification {
    pub item: TaskItem,
    pub verified_items: u32,
    pub total_items: u32,
    /// Every item is verified; the task can complete once evidence is in.
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Shipment {
    pub order_id: OrderId,
    pub package_id: PackageId,
    pub tracking_number: String,
    /// Units removed from stock.
    pub consumed: u32,
    /// Reserved units returned to availability because they were never picked.
    pub returned: u32,
}

/// Drives packing tasks and shipment.
pub struct PackingOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    store: S,
    publisher: P,
}

impl<S, P> PackingOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Opens a packing task mirroring the order's completed picking task.
    ///
    /// Each item must be verified for the quantity actually picked. A bin
    /// still staged is claimed on the way.
    #[tracing::instrument(skip(self))]
    pub async fn start_packing(
        &self,
        order_id: OrderId,
        user_id: Option<UserId>,
    ) -> Result<WorkTask> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<WorkTask> {
                let mut order = load_order(tx, order_id)?;
                OrderStatus::assert_transition(order.status, OrderStatus::Packing)?;

                let tasks = tx.tasks_for_order(order_id);
                if tasks
                    .iter()
                    .any(|t| t.kind == TaskKind::Packing && t.status.is_active())
                {
                    return Err(DomainError::conflict(
                        "work task",
                        format!("order {order_id} already has an open packing task"),
                    )
                    .into());
                }
                let pick_task = tasks
                    .iter()
                    .rev()
                    .find(|t| t.kind == TaskKind::Picking && t.status == TaskStatus::Completed)
                    .ok_or_else(|| {
                        DomainError::precondition(format!(
                            "order {order_id} has no completed picking task"
                        ))
                    })?;

                let mut task = WorkTask::packing_from(pick_task)?;
                if let Some(user_id) = user_id {
                    task.assign(user_id)?;
                }

                if let Some(mut bin) = tx
                    .bins_for_order(order_id)
                    .into_iter()
                    .find(|b| b.task_id == pick_task.id)
                    && bin.status == BinStatus::Staged
                {
                    bin.claim(user_id)?;
                    emitter.emit(
                        tx,
                        EventType::PickBinClaimed,
                        order_id,
                        json!({ "binId": bin.id, "barcode": bin.barcode }),
                    );
                    tx.save_bin(bin);
                }

                order.transition_to(OrderStatus::Packing)?;
                emitter.emit(
                    tx,
                    EventType::PackingStarted,
                    order_id,
                    json!({
                        "taskId": task.id,
                        "sourceTaskId": pick_task.id,
                        "items": task.items.iter().map(|i| json!({
                            "taskItemId": i.id,
                            "productVariantId": i.product_variant_id,
                            "quantity": i.quantity_required,
                        })).collect::<Vec<_>>(),
                    }),
                );
                tx.save_order(order);
                tx.save_task(task.clone());
                Ok(task)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        tracing::info!(%order_id, task_id = %committed.value.id, "packing started");
        Ok(committed.value)
    }

    /// Counts one scanned unit of `product_variant_id` against the task.
    #[tracing::instrument(skip(self))]
    pub async fn verify_item_scan(
        &self,
        task_id: WorkTaskId,
        product_variant_id: ProductVariantId,
        user_id: Option<UserId>,
    ) -> Result<ScanVerification> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<ScanVerification> {
                let mut task = load_packing_task(tx, task_id)?;
                let item = task.verify_scan(product_variant_id, user_id)?.clone();
                let verification = ScanVerification {
                    item,
                    verified_items: task.completed_items,
                    total_items: task.items.len() as u32,
                    ready: task.is_finished(),
                };
                emitter.emit(
                    tx,
                    EventType::PackingItemVerified,
                    verification.item.order_id,
                    json!({
                        "taskId": task_id,
                        "taskItemId": verification.item.id,
                        "productVariantId": product_variant_id,
                        "verified": verification.item.quantity_completed,
                        "required": verification.item.quantity_required,
                    }),
                );
                tx.save_task(task);
                Ok(verification)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        Ok(committed.value)
    }

    /// Closes the box.
    ///
    /// Requires a weight and at least one photograph, then full
    /// verification. Allocations still ALLOCATED (short picks) are promoted
    /// to PICKED, the bin is completed and the order becomes PACKED.
    /// Retrying on a completed task returns the recorded package.
    #[tracing::instrument(skip(self, details))]
    pub async fn complete_packing(
        &self,
        task_id: WorkTaskId,
        details: PackageDetails,
        user_id: Option<UserId>,
    ) -> Result<Package> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<(Package, bool)> {
                let mut task = load_packing_task(tx, task_id)?;
                let order_id = task.order_ids.first().copied().ok_or_else(|| {
                    DomainError::precondition(format!("task {task_id} covers no order"))
                })?;
                if task.status == TaskStatus::Completed
                    && let Some(package) = tx.package_for_order(order_id)
                    && package.task_id == task_id
                {
                    return Ok((package, true));
                }
                let mut order = load_order(tx, order_id)?;

                let package = Package::new(order_id, &task, details, user_id)?;
                task.complete()?;

                let mut promoted = 0;
                for mut allocation in tx
                    .allocations_for_order(order_id)
                    .into_iter()
                    .filter(|a| a.status == AllocationStatus::Allocated)
                {
                    if allocation.mark_picked()? {
                        promoted += 1;
                    }
                    tx.save_allocation(allocation);
                }
                if promoted > 0 {
                    tracing::warn!(%order_id, promoted, "allocations promoted at packing");
                }

                if let Some(source) = task.source_task_id
                    && let Some(mut bin) = tx
                        .bins_for_order(order_id)
                        .into_iter()
                        .find(|b| b.task_id == source)
                {
                    if bin.status == BinStatus::Staged {
                        bin.claim(user_id)?;
                    }
                    bin.complete()?;
                    tx.save_bin(bin);
                }

                order.transition_to(OrderStatus::Packed)?;
                emitter.emit(
                    tx,
                    EventType::PackingCompleted,
                    order_id,
                    json!({
                        "taskId": task_id,
                        "packageId": package.id,
                        "weightGrams": package.weight_grams,
                        "dimensions": package.dimensions,
                        "images": package.images.len(),
                        "promotedAllocations": promoted,
                    }),
                );
                emitter.emit(
                    tx,
                    EventType::OrderPacked,
                    order_id,
                    json!({ "packageId": package.id }),
                );

                tx.save_package(package.clone());
                tx.save_task(task);
                tx.save_order(order);
                Ok((package, false))
            })
            .await?;
        let replayed = committed.value.1;
        let committed = committed.map(|(package, _)| package);
        if replayed {
            tracing::info!(package_id = %committed.value.id, "packing already completed");
            return Ok(committed.value);
        }
        publish_best_effort(&self.publisher, &committed.events).await;

        metrics::counter!("packing_completed_total").increment(1);
        tracing::info!(package_id = %committed.value.id, "packing completed");
        Ok(committed.value)
    }

    /// Ships a packed order.
    ///
    /// Picked quantity is removed from stock; reserved quantity that was
    /// never picked returns to availability. Every allocation of the order
    /// is released.
    #[tracing::instrument(skip(self))]
    pub async fn ship_order(
        &self,
        order_id: OrderId,
        tracking_number: String,
        user_id: Option<UserId>,
    ) -> Result<Shipment> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<Shipment> {
                let mut order = load_order(tx, order_id)?;
                if !order.status.is_shippable() {
                    return Err(
                        DomainError::transition("order", order.status, OrderStatus::Shipped).into(),
                    );
                }
                if tracking_number.trim().is_empty() {
                    return Err(DomainError::precondition("tracking number is required").into());
                }
                let package = tx.package_for_order(order_id).ok_or_else(|| {
                    DomainError::precondition(format!("order {order_id} has no package"))
                })?;

                let picked = picked_by_allocation(&tx.tasks_for_order(order_id));
                let allocations: Vec<_> = tx
                    .allocations_for_order(order_id)
                    .into_iter()
                    .filter(|a| a.is_active())
                    .collect();
                let mut unit_ids: Vec<InventoryUnitId> =
                    allocations.iter().map(|a| a.inventory_unit_id).collect();
                unit_ids.sort();
                unit_ids.dedup();
                let mut ledger = units_ledger(&*tx, &unit_ids);

                let mut consumed = 0;
                let mut returned = 0;
                for mut allocation in allocations {
                    let taken = picked
                        .get(&allocation.id)
                        .copied()
                        .unwrap_or(allocation.quantity)
                        .min(allocation.quantity);
                    let leftover = allocation.quantity - taken;
                    if taken > 0 {
                        ledger.consume(allocation.inventory_unit_id, taken)?;
                    }
                    if leftover > 0 {
                        ledger.release(allocation.inventory_unit_id, leftover)?;
                    }
                    allocation.release()?;
                    consumed += taken;
                    returned += leftover;
                    tx.save_allocation(allocation);
                }
                for unit in ledger.take_dirty() {
                    tx.save_unit(unit);
                }

                for item in &mut order.items {
                    let pending = item.picked - item.shipped;
                    if pending > 0 {
                        item.add_shipped(pending)?;
                    }
                }
                order.tracking_number = Some(tracking_number.clone());
                order.transition_to(OrderStatus::Shipped)?;
                tx.save_order(order);

                emitter.emit(
                    tx,
                    EventType::OrderShipped,
                    order_id,
                    json!({
                        "trackingNumber": tracking_number,
                        "packageId": package.id,
                        "consumed": consumed,
                        "returned": returned,
                    }),
                );
                Ok(Shipment {
                    order_id,
                    package_id: package.id,
                    tracking_number,
                    consumed,
                    returned,
                })
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        metrics::counter!("orders_shipped_total").increment(1);
        tracing::info!(
            %order_id,
            consumed = committed.value.consumed,
            returned = committed.value.returned,
            "order shipped"
        );
        Ok(committed.value)
    }
}

fn load_packing_task<Tx: StoreTx>(tx: &Tx, task_id: WorkTaskId) -> Result<WorkTask> {
    let task = load_task(tx, task_id)?;
    if task.kind != TaskKind::Packing {
        return Err(
            DomainError::precondition(format!("task {task_id} is not a packing task")).into(),
        );
    }
    Ok(task)
}

/// Quantity confirmed per allocation across completed picking tasks.
fn picked_by_allocation(tasks: &[WorkTask]) -> HashMap<AllocationId, u32> {
    let mut picked = HashMap::new();
    for task in tasks
        .iter()
        .filter(|t| t.kind == TaskKind::Picking && t.status == TaskStatus::Completed)
    {
        for item in &task.items {
            if let Some(allocation_id) = item.allocation_id {
                *picked.entry(allocation_id).or_insert(0) += item.quantity_completed;
            }
        }
    }
    picked
}

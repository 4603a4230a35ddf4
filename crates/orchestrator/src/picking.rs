//! Picking: pick lists, item confirmation, task lifecycle and pick bins.

use common::{
    AllocationId, LocationId, OrderId, PickBinId, ProductVariantId, TaskItemId, UserId,
    WorkTaskId,
};
use domain::{
    BinStatus, BlockReason, DomainError, Order, OrderStatus, PickBin, TaskItem, TaskItemStatus,
    TaskKind, TaskStatus, WorkTask,
};
use event_log::{EventPublisher, EventType, publish_best_effort};
use serde::Serialize;
use serde_json::json;
use store::{
    AllocationRepository, BinRepository, FulfillmentStore, LocationRepository, OrderRepository,
    StoreTx, TaskRepository,
};

use crate::allocation::load_order;
use crate::error::{OrchestratorError, Result};
use crate::events::Emitter;

/// One stop on a pick walk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickListLine {
    pub task_item_id: TaskItemId,
    pub sequence: u32,
    pub location_id: LocationId,
    pub location_code: Option<String>,
    pub zone: Option<String>,
    pub product_variant_id: ProductVariantId,
    pub allocation_id: Option<AllocationId>,
    pub quantity: u32,
}

/// A generated picking task, its lines sorted by walk sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickList {
    pub task_id: WorkTaskId,
    pub order_id: OrderId,
    pub lines: Vec<PickListLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PickConfirmation {
    pub item: TaskItem,
    pub task_status: TaskStatus,
    pub completed_items: u32,
    pub total_items: u32,
    /// The bin created when this confirmation finished the task.
    pub bin: Option<PickBin>,
}

/// Result of scanning a bin barcode at a packing station.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BinLookup {
    pub bin: PickBin,
    pub order: Order,
    /// The bin was claimed by an earlier scan.
    pub already_packing: bool,
}

/// Drives picking tasks from pick list to staged bin.
pub struct PickingOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    store: S,
    publisher: P,
}

impl<S, P> PickingOrchestrator<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    pub fn new(store: S, publisher: P) -> Self {
        Self { store, publisher }
    }

    /// Builds a picking task from the order's active allocations.
    ///
    /// Lines follow the locations' pick sequence; locations without one go
    /// last. The order moves to PICKING.
    #[tracing::instrument(skip(self))]
    pub async fn generate_pick_list(
        &self,
        order_id: OrderId,
        user_id: Option<UserId>,
    ) -> Result<PickList> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<PickList> {
                let mut order = load_order(tx, order_id)?;
                if !matches!(
                    order.status,
                    OrderStatus::Pending | OrderStatus::Confirmed | OrderStatus::Allocated
                ) {
                    return Err(
                        DomainError::transition("order", order.status, OrderStatus::Picking).into(),
                    );
                }
                if tx
                    .tasks_for_order(order_id)
                    .iter()
                    .any(|t| t.kind == TaskKind::Picking && t.status.is_active())
                {
                    return Err(DomainError::conflict(
                        "work task",
                        format!("order {order_id} already has an open picking task"),
                    )
                    .into());
                }

                let allocations: Vec<_> = tx
                    .allocations_for_order(order_id)
                    .into_iter()
                    .filter(|a| a.is_active())
                    .collect();
                if allocations.is_empty() {
                    return Err(DomainError::precondition(format!(
                        "order {order_id} has no allocations to pick"
                    ))
                    .into());
                }

                let mut stops: Vec<_> = allocations
                    .into_iter()
                    .map(|a| (tx.location(a.location_id), a))
                    .collect();
                stops.sort_by_key(|(location, _)| {
                    location.as_ref().map_or(u32::MAX, |l| l.pick_sequence)
                });

                let items = stops
                    .iter()
                    .map(|(_, a)| {
                        TaskItem::new(
                            order_id,
                            a.order_item_id,
                            a.product_variant_id,
                            a.location_id,
                            a.quantity,
                        )
                        .for_allocation(a.id)
                    })
                    .collect();
                let task = WorkTask::new(TaskKind::Picking, items);

                let lines: Vec<PickListLine> = task
                    .items
                    .iter()
                    .zip(&stops)
                    .map(|(item, (location, _))| PickListLine {
                        task_item_id: item.id,
                        sequence: item.sequence,
                        location_id: item.location_id,
                        location_code: location.as_ref().map(|l| l.code.clone()),
                        zone: location.as_ref().and_then(|l| l.zone.clone()),
                        product_variant_id: item.product_variant_id,
                        allocation_id: item.allocation_id,
                        quantity: item.quantity_required,
                    })
                    .collect();

                order.transition_to(OrderStatus::Picking)?;
                emitter.emit(
                    tx,
                    EventType::OrderProcessing,
                    order_id,
                    json!({ "status": order.status }),
                );
                emitter.emit(
                    tx,
                    EventType::PicklistGenerated,
                    order_id,
                    json!({ "taskId": task.id, "lines": lines }),
                );

                let pick_list = PickList {
                    task_id: task.id,
                    order_id,
                    lines,
                };
                tx.save_task(task);
                tx.save_order(order);
                Ok(pick_list)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        metrics::counter!("picklists_generated_total").increment(1);
        tracing::info!(
            %order_id,
            task_id = %committed.value.task_id,
            lines = committed.value.lines.len(),
            "pick list generated"
        );
        Ok(committed.value)
    }

    /// Confirms a picked item. `quantity` defaults to the full requirement;
    /// less records a short pick.
    ///
    /// The confirmation that finishes the task also completes it, moves the
    /// order to PICKED and stages its bin, in the same unit of work.
    #[tracing::instrument(skip(self))]
    pub async fn confirm_pick_item(
        &self,
        task_item_id: TaskItemId,
        quantity: Option<u32>,
        user_id: Option<UserId>,
    ) -> Result<PickConfirmation> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<PickConfirmation> {
                let mut task = tx
                    .task_for_item(task_item_id)
                    .ok_or_else(|| DomainError::not_found("task item", task_item_id))?;
                if task.kind != TaskKind::Picking {
                    return Err(DomainError::precondition(format!(
                        "task {} is not a picking task",
                        task.id
                    ))
                    .into());
                }

                let item = task.record_item(task_item_id, quantity, user_id)?.clone();
                let mut order = load_order(tx, item.order_id)?;
                if item.quantity_completed > 0 {
                    order
                        .item_mut(item.order_item_id)?
                        .add_picked(item.quantity_completed)?;
                }

                // Short picks keep their allocation ALLOCATED until packing.
                if item.status == TaskItemStatus::Completed
                    && let Some(allocation_id) = item.allocation_id
                    && let Some(mut allocation) = tx
                        .allocations_for_order(item.order_id)
                        .into_iter()
                        .find(|a| a.id == allocation_id)
                {
                    allocation.mark_picked()?;
                    tx.save_allocation(allocation);
                }

                emitter.emit(
                    tx,
                    EventType::PicklistItemPicked,
                    item.order_id,
                    json!({
                        "taskId": task.id,
                        "taskItemId": item.id,
                        "productVariantId": item.product_variant_id,
                        "quantity": item.quantity_completed,
                        "status": item.status,
                        "shortfall": item.shortfall(),
                    }),
                );

                let mut bin = None;
                if task.is_finished() {
                    task.complete()?;
                    order.transition_to(OrderStatus::Picked)?;
                    emitter.emit(
                        tx,
                        EventType::PicklistCompleted,
                        order.id,
                        json!({ "taskId": task.id, "completedItems": task.completed_items }),
                    );
                    emitter.emit(
                        tx,
                        EventType::OrderPicked,
                        order.id,
                        json!({ "taskId": task.id }),
                    );
                    bin = Some(stage_bin(tx, &emitter, &task, order.id)?);
                }

                let confirmation = PickConfirmation {
                    item,
                    task_status: task.status,
                    completed_items: task.completed_items,
                    total_items: task.items.len() as u32,
                    bin,
                };
                tx.save_order(order);
                tx.save_task(task);
                Ok(confirmation)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;

        let confirmation = committed.value;
        let outcome = if confirmation.item.status == TaskItemStatus::Short {
            "short"
        } else {
            "complete"
        };
        metrics::counter!("pick_items_confirmed_total", "outcome" => outcome).increment(1);
        if confirmation.bin.is_some() {
            metrics::counter!("pick_bins_created_total").increment(1);
        }
        Ok(confirmation)
    }

    /// Stages a bin for a completed picking task that has none yet.
    #[tracing::instrument(skip(self))]
    pub async fn create_pick_bin(
        &self,
        task_id: WorkTaskId,
        user_id: Option<UserId>,
    ) -> Result<PickBin> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<PickBin> {
                let task = load_task(tx, task_id)?;
                let order_id = task.order_ids.first().copied().ok_or_else(|| {
                    DomainError::precondition(format!("task {task_id} covers no order"))
                })?;
                stage_bin(tx, &emitter, &task, order_id)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        metrics::counter!("pick_bins_created_total").increment(1);
        Ok(committed.value)
    }

    /// Resolves a scanned bin barcode to its order.
    ///
    /// The first scan claims the bin for packing. Later scans return the
    /// same order with `already_packing` set.
    #[tracing::instrument(skip(self))]
    pub async fn get_order_by_bin_barcode(
        &self,
        barcode: String,
        user_id: Option<UserId>,
    ) -> Result<BinLookup> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<BinLookup> {
                let mut bin = tx
                    .bin_by_barcode(&barcode)
                    .ok_or_else(|| DomainError::not_found("pick bin", &barcode))?;
                let already_packing = match bin.status {
                    BinStatus::Staged => {
                        bin.claim(user_id)?;
                        emitter.emit(
                            tx,
                            EventType::PickBinClaimed,
                            bin.order_id,
                            json!({ "binId": bin.id, "barcode": bin.barcode }),
                        );
                        tx.save_bin(bin.clone());
                        false
                    }
                    BinStatus::Packing => true,
                    status => {
                        return Err(
                            DomainError::transition("pick bin", status, BinStatus::Packing).into(),
                        );
                    }
                };
                let order = load_order(tx, bin.order_id)?;
                Ok(BinLookup {
                    bin,
                    order,
                    already_packing,
                })
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        Ok(committed.value)
    }

    #[tracing::instrument(skip(self))]
    pub async fn assign_task(&self, task_id: WorkTaskId, user_id: UserId) -> Result<WorkTask> {
        self.update_task(task_id, Some(user_id), EventType::TaskAssigned, |task| {
            task.assign(user_id)?;
            Ok(json!({ "assignedTo": user_id }))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn block_task(
        &self,
        task_id: WorkTaskId,
        reason: BlockReason,
        user_id: Option<UserId>,
    ) -> Result<WorkTask> {
        self.update_task(task_id, user_id, EventType::TaskBlocked, move |task| {
            task.block(reason)?;
            Ok(json!({ "reason": reason }))
        })
        .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn resume_task(
        &self,
        task_id: WorkTaskId,
        user_id: Option<UserId>,
    ) -> Result<WorkTask> {
        self.update_task(task_id, user_id, EventType::TaskResumed, |task| {
            task.resume()?;
            Ok(json!({ "status": task.status }))
        })
        .await
    }

    /// Cancels a picking task nobody has started confirming; the order
    /// returns to ALLOCATED with its reservations intact.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_pick_task(
        &self,
        task_id: WorkTaskId,
        user_id: Option<UserId>,
    ) -> Result<WorkTask> {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<WorkTask> {
                let mut task = load_task(tx, task_id)?;
                if task.kind != TaskKind::Picking {
                    return Err(DomainError::precondition(format!(
                        "task {task_id} is not a picking task"
                    ))
                    .into());
                }
                if task.items.iter().any(|i| i.quantity_completed > 0) {
                    return Err(DomainError::precondition(
                        "picking task has confirmed items; block it instead",
                    )
                    .into());
                }
                task.cancel()?;

                for &order_id in &task.order_ids {
                    let mut order = load_order(tx, order_id)?;
                    if order.status == OrderStatus::Picking {
                        order.transition_to(OrderStatus::Allocated)?;
                        tx.save_order(order);
                    }
                    emitter.emit(
                        tx,
                        EventType::PicklistCancelled,
                        order_id,
                        json!({ "taskId": task_id }),
                    );
                }
                tx.save_task(task.clone());
                Ok(task)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        Ok(committed.value)
    }

    pub async fn task(&self, task_id: WorkTaskId) -> Result<WorkTask> {
        self.store.read(move |tx| load_task(tx, task_id)).await
    }

    pub async fn bin(&self, bin_id: PickBinId) -> Result<PickBin> {
        self.store
            .read(move |tx| tx.bin(bin_id))
            .await
            .ok_or_else(|| DomainError::not_found("pick bin", bin_id).into())
    }

    async fn update_task<F>(
        &self,
        task_id: WorkTaskId,
        user_id: Option<UserId>,
        event_type: EventType,
        apply: F,
    ) -> Result<WorkTask>
    where
        F: FnOnce(&mut WorkTask) -> Result<serde_json::Value> + Send,
    {
        let emitter = Emitter::new(user_id);
        let committed = self
            .store
            .transaction(move |tx| -> Result<WorkTask> {
                let mut task = load_task(tx, task_id)?;
                let mut payload = apply(&mut task)?;
                if let Some(fields) = payload.as_object_mut() {
                    fields.insert("taskId".into(), json!(task.id));
                    fields.insert("kind".into(), json!(task.kind));
                }
                for &order_id in &task.order_ids {
                    emitter.emit(tx, event_type, order_id, payload.clone());
                }
                tx.save_task(task.clone());
                Ok(task)
            })
            .await?;
        publish_best_effort(&self.publisher, &committed.events).await;
        tracing::debug!(%task_id, event = %event_type, "task updated");
        Ok(committed.value)
    }
}

pub(crate) fn load_task<Tx: StoreTx>(tx: &Tx, task_id: WorkTaskId) -> Result<WorkTask> {
    tx.task(task_id)
        .ok_or_else(|| OrchestratorError::from(DomainError::not_found("work task", task_id)))
}

/// Creates the single bin of a completed picking task for one order.
fn stage_bin<Tx: StoreTx>(
    tx: &mut Tx,
    emitter: &Emitter,
    task: &WorkTask,
    order_id: OrderId,
) -> Result<PickBin> {
    if tx
        .bins_for_order(order_id)
        .iter()
        .any(|b| b.task_id == task.id)
    {
        return Err(DomainError::conflict(
            "pick bin",
            format!("task {} already has a bin", task.id),
        )
        .into());
    }
    let bin_number = tx.next_bin_number();
    let bin = PickBin::from_task(task, order_id, bin_number)?;
    emitter.emit(
        tx,
        EventType::PickBinCreated,
        order_id,
        json!({
            "binId": bin.id,
            "barcode": bin.barcode,
            "taskId": task.id,
            "lines": bin.lines,
        }),
    );
    tx.save_bin(bin.clone());
    tracing::info!(%order_id, barcode = %bin.barcode, "pick bin staged");
    Ok(bin)
}

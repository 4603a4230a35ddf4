//! Work tasks: picking and packing units of operator work.

use chrono::{DateTime, Utc};
use common::{
    AllocationId, LocationId, OrderId, OrderItemId, ProductVariantId, TaskItemId, UserId,
    WorkTaskId,
};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, Result};

/// Why a task was blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockReason {
    LocationInaccessible,
    ItemMissing,
    EquipmentFailure,
    Other,
}

/// The status of a work task.
///
/// State transitions:
/// ```text
/// Pending ──► Assigned ──► InProgress ──► Completed
///    │           │             │
///    └───────────┴──► Blocked ◄┘
///                        │
/// any non-terminal ──────┴──► Cancelled
/// ```
///
/// Recording the first item moves Pending or Assigned straight to
/// InProgress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    #[default]
    Pending,
    Assigned,
    InProgress,
    Blocked { reason: BlockReason },
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn can_transition_to(&self, to: TaskStatus) -> bool {
        use TaskStatus::*;
        match self {
            Pending => matches!(to, Assigned | InProgress | Blocked { .. } | Cancelled),
            Assigned => matches!(to, Assigned | InProgress | Blocked { .. } | Cancelled),
            InProgress => matches!(to, Blocked { .. } | Completed | Cancelled),
            Blocked { .. } => matches!(to, Pending | Assigned | InProgress | Cancelled),
            Completed | Cancelled => false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Assigned => "ASSIGNED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Blocked { .. } => "BLOCKED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    Picking,
    Packing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskItemStatus {
    #[default]
    Pending,
    Completed,
    /// Confirmed below the required quantity. Terminal for the item.
    Short,
}

impl TaskItemStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, TaskItemStatus::Completed | TaskItemStatus::Short)
    }
}

/// One line of a work task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskItem {
    pub id: TaskItemId,
    pub order_id: OrderId,
    pub order_item_id: OrderItemId,
    pub allocation_id: Option<AllocationId>,
    pub product_variant_id: ProductVariantId,
    pub location_id: LocationId,
    /// Position in the walk, starting at 1.
    pub sequence: u32,
    pub quantity_required: u32,
    pub quantity_completed: u32,
    pub status: TaskItemStatus,
    pub completed_by: Option<UserId>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskItem {
    pub fn new(
        order_id: OrderId,
        order_item_id: OrderItemId,
        product_variant_id: ProductVariantId,
        location_id: LocationId,
        quantity_required: u32,
    ) -> Self {
        Self {
            id: TaskItemId::new(),
            order_id,
            order_item_id,
            allocation_id: None,
            product_variant_id,
            location_id,
            sequence: 0,
            quantity_required,
            quantity_completed: 0,
            status: TaskItemStatus::Pending,
            completed_by: None,
            completed_at: None,
        }
    }

    pub fn for_allocation(mut self, allocation_id: AllocationId) -> Self {
        self.allocation_id = Some(allocation_id);
        self
    }

    /// Quantity confirmed below the requirement.
    pub fn shortfall(&self) -> u32 {
        self.quantity_required - self.quantity_completed
    }
}

/// A unit of operator work composed of task items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkTask {
    pub id: WorkTaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub order_ids: Vec<OrderId>,
    /// For packing tasks, the picking task they were built from.
    pub source_task_id: Option<WorkTaskId>,
    pub items: Vec<TaskItem>,
    pub completed_items: u32,
    pub assigned_to: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl WorkTask {
    /// Creates a pending task. Items are numbered in the given order; items
    /// requiring nothing are completed up front.
    pub fn new(kind: TaskKind, mut items: Vec<TaskItem>) -> Self {
        let mut order_ids = Vec::new();
        for (index, item) in items.iter_mut().enumerate() {
            item.sequence = index as u32 + 1;
            if item.quantity_required == 0 {
                item.status = TaskItemStatus::Completed;
            }
            if !order_ids.contains(&item.order_id) {
                order_ids.push(item.order_id);
            }
        }

        let mut task = Self {
            id: WorkTaskId::new(),
            kind,
            status: TaskStatus::Pending,
            order_ids,
            source_task_id: None,
            items,
            completed_items: 0,
            assigned_to: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        };
        task.recount();
        task
    }

    /// Builds a packing task mirroring a picking task item for item.
    pub fn packing_from(pick_task: &WorkTask) -> Result<Self> {
        if pick_task.kind != TaskKind::Picking || pick_task.status != TaskStatus::Completed {
            return Err(DomainError::precondition(
                "packing requires a completed picking task",
            ));
        }
        let items = pick_task
            .items
            .iter()
            .map(|pick| {
                let mut item = TaskItem::new(
                    pick.order_id,
                    pick.order_item_id,
                    pick.product_variant_id,
                    pick.location_id,
                    pick.quantity_completed,
                );
                item.allocation_id = pick.allocation_id;
                item
            })
            .collect();
        let mut task = Self::new(TaskKind::Packing, items);
        task.source_task_id = Some(pick_task.id);
        Ok(task)
    }

    pub fn item(&self, item_id: TaskItemId) -> Option<&TaskItem> {
        self.items.iter().find(|i| i.id == item_id)
    }

    pub fn covers_order(&self, order_id: OrderId) -> bool {
        self.order_ids.contains(&order_id)
    }

    /// Returns true once every item is completed or short.
    pub fn is_finished(&self) -> bool {
        self.items.iter().all(|i| i.status.is_done())
    }

    pub fn assign(&mut self, user_id: UserId) -> Result<()> {
        self.move_to(TaskStatus::Assigned)?;
        self.assigned_to = Some(user_id);
        Ok(())
    }

    pub fn start(&mut self) -> Result<()> {
        self.move_to(TaskStatus::InProgress)?;
        self.started_at.get_or_insert_with(Utc::now);
        Ok(())
    }

    pub fn block(&mut self, reason: BlockReason) -> Result<()> {
        self.move_to(TaskStatus::Blocked { reason })
    }

    /// Unblocks the task, returning it to where its progress left it.
    pub fn resume(&mut self) -> Result<()> {
        if !matches!(self.status, TaskStatus::Blocked { .. }) {
            return Err(DomainError::transition(
                "work task",
                self.status,
                TaskStatus::InProgress,
            ));
        }
        let to = if self.started_at.is_some() {
            TaskStatus::InProgress
        } else if self.assigned_to.is_some() {
            TaskStatus::Assigned
        } else {
            TaskStatus::Pending
        };
        self.move_to(to)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.move_to(TaskStatus::Cancelled)
    }

    /// Completes the task once every item is done.
    pub fn complete(&mut self) -> Result<()> {
        if !self.is_finished() {
            let open = self.items.len() as u32 - self.done_items();
            return Err(DomainError::precondition(format!(
                "{open} task items are still pending"
            )));
        }
        if matches!(self.status, TaskStatus::Pending | TaskStatus::Assigned) {
            self.start()?;
        }
        self.move_to(TaskStatus::Completed)?;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Confirms an item. `quantity` defaults to the required quantity; less
    /// marks the item SHORT.
    pub fn record_item(
        &mut self,
        item_id: TaskItemId,
        quantity: Option<u32>,
        user_id: Option<UserId>,
    ) -> Result<&TaskItem> {
        self.ensure_workable()?;
        let index = self
            .items
            .iter()
            .position(|i| i.id == item_id && !i.status.is_done())
            .ok_or_else(|| DomainError::not_found("task item", item_id))?;

        let required = self.items[index].quantity_required;
        let quantity = quantity.unwrap_or(required);
        if quantity > required {
            return Err(DomainError::InvalidQuantity {
                quantity,
                reason: "confirmed quantity exceeds required quantity",
            });
        }

        self.auto_start();
        let item = &mut self.items[index];
        item.quantity_completed = quantity;
        item.status = if quantity == required {
            TaskItemStatus::Completed
        } else {
            TaskItemStatus::Short
        };
        item.completed_by = user_id;
        item.completed_at = Some(Utc::now());
        self.recount();
        Ok(&self.items[index])
    }

    /// Counts one scanned unit of a variant against the first open item.
    pub fn verify_scan(
        &mut self,
        product_variant_id: ProductVariantId,
        user_id: Option<UserId>,
    ) -> Result<&TaskItem> {
        self.ensure_workable()?;
        let Some(index) = self
            .items
            .iter()
            .position(|i| i.product_variant_id == product_variant_id && !i.status.is_done())
        else {
            if self
                .items
                .iter()
                .any(|i| i.product_variant_id == product_variant_id)
            {
                return Err(DomainError::InvalidQuantity {
                    quantity: 1,
                    reason: "variant is already fully verified",
                });
            }
            return Err(DomainError::not_found(
                "task item for variant",
                product_variant_id,
            ));
        };

        self.auto_start();
        let item = &mut self.items[index];
        item.quantity_completed += 1;
        if item.quantity_completed == item.quantity_required {
            item.status = TaskItemStatus::Completed;
            item.completed_by = user_id;
            item.completed_at = Some(Utc::now());
        }
        self.recount();
        Ok(&self.items[index])
    }

    fn ensure_workable(&self) -> Result<()> {
        match self.status {
            TaskStatus::Pending | TaskStatus::Assigned | TaskStatus::InProgress => Ok(()),
            other => Err(DomainError::transition(
                "work task",
                other,
                TaskStatus::InProgress,
            )),
        }
    }

    fn auto_start(&mut self) {
        if matches!(self.status, TaskStatus::Pending | TaskStatus::Assigned) {
            self.status = TaskStatus::InProgress;
            self.started_at.get_or_insert_with(Utc::now);
        }
    }

    fn move_to(&mut self, to: TaskStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::transition("work task", self.status, to));
        }
        self.status = to;
        Ok(())
    }

    fn done_items(&self) -> u32 {
        self.items.iter().filter(|i| i.status.is_done()).count() as u32
    }

    fn recount(&mut self) {
        self.completed_items = self
            .items
            .iter()
            .filter(|i| i.status == TaskItemStatus::Completed)
            .count() as u32;
    }
}

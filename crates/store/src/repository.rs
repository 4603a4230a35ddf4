//! Per-entity repository capabilities available inside a unit of work.
//!
//! Reads return owned copies; writes replace the stored entity by id. All
//! calls happen inside [`FulfillmentStore::transaction`](crate::FulfillmentStore),
//! so they observe and produce one consistent snapshot.

use common::{
    IdempotencyKey, InventoryUnitId, LocationId, OrderId, PickBinId, ProductVariantId, TaskItemId,
    WorkTaskId,
};
use domain::{
    Allocation, InventoryUnit, Location, Order, OrderStatus, Package, PickBin, WorkTask,
};
use event_log::FulfillmentEvent;

pub trait InventoryRepository {
    fn unit(&self, id: InventoryUnitId) -> Option<InventoryUnit>;

    /// Every unit of a variant, whatever its status.
    fn units_for_variant(&self, product_variant_id: ProductVariantId) -> Vec<InventoryUnit>;

    fn save_unit(&mut self, unit: InventoryUnit);
}

pub trait AllocationRepository {
    /// Allocations of an order in insertion order.
    fn allocations_for_order(&self, order_id: OrderId) -> Vec<Allocation>;

    /// Non-released allocations against any of the given units.
    fn active_allocations_for_units(&self, unit_ids: &[InventoryUnitId]) -> Vec<Allocation>;

    /// Inserts a new allocation or replaces an existing one.
    fn save_allocation(&mut self, allocation: Allocation);
}

pub trait OrderRepository {
    fn order(&self, id: OrderId) -> Option<Order>;

    fn orders_with_status(&self, statuses: &[OrderStatus]) -> Vec<Order>;

    fn save_order(&mut self, order: Order);
}

pub trait TaskRepository {
    fn task(&self, id: WorkTaskId) -> Option<WorkTask>;

    /// Tasks covering an order, oldest first.
    fn tasks_for_order(&self, order_id: OrderId) -> Vec<WorkTask>;

    /// The task holding a task item.
    fn task_for_item(&self, item_id: TaskItemId) -> Option<WorkTask>;

    fn save_task(&mut self, task: WorkTask);
}

pub trait BinRepository {
    fn bin(&self, id: PickBinId) -> Option<PickBin>;

    fn bin_by_barcode(&self, barcode: &str) -> Option<PickBin>;

    fn bins_for_order(&self, order_id: OrderId) -> Vec<PickBin>;

    fn save_bin(&mut self, bin: PickBin);

    /// Allocates the next globally unique bin number.
    fn next_bin_number(&mut self) -> u64;
}

pub trait LocationRepository {
    fn location(&self, id: LocationId) -> Option<Location>;

    fn location_by_code(&self, code: &str) -> Option<Location>;

    fn save_location(&mut self, location: Location);
}

pub trait PackageRepository {
    fn package_for_order(&self, order_id: OrderId) -> Option<Package>;

    fn save_package(&mut self, package: Package);
}

/// Stored results of operations invoked with an idempotency key.
pub trait IdempotencyRepository {
    fn recorded(&self, scope: &str, key: &IdempotencyKey) -> Option<serde_json::Value>;

    fn record(&mut self, scope: &str, key: &IdempotencyKey, result: serde_json::Value);
}

/// Events written to the log together with the unit of work.
pub trait EventStaging {
    fn stage(&mut self, event: FulfillmentEvent);
}

/// Everything an orchestrator can touch inside one unit of work.
pub trait StoreTx:
    InventoryRepository
    + AllocationRepository
    + OrderRepository
    + TaskRepository
    + BinRepository
    + LocationRepository
    + PackageRepository
    + IdempotencyRepository
    + EventStaging
{
}

impl<T> StoreTx for T where
    T: InventoryRepository
        + AllocationRepository
        + OrderRepository
        + TaskRepository
        + BinRepository
        + LocationRepository
        + PackageRepository
        + IdempotencyRepository
        + EventStaging
{
}

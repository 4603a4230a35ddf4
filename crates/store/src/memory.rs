use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use common::{
    AllocationId, IdempotencyKey, InventoryUnitId, LocationId, OrderId, PickBinId,
    ProductVariantId, TaskItemId, WorkTaskId,
};
use domain::{
    Allocation, InventoryUnit, Location, Order, OrderStatus, Package, PickBin, WorkTask,
};
use event_log::{EventLog, FulfillmentEvent, InMemoryEventLog};
use tokio::sync::Mutex;

use crate::{
    StoreError,
    repository::{
        AllocationRepository, BinRepository, EventStaging, IdempotencyRepository,
        InventoryRepository, LocationRepository, OrderRepository, PackageRepository,
        TaskRepository,
    },
    store::{Committed, FulfillmentStore},
};

/// Rows kept in insertion order with an id index.
#[derive(Debug, Clone)]
struct Table<K, V> {
    rows: Vec<V>,
    index: HashMap<K, usize>,
}

impl<K, V> Default for Table<K, V> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            index: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> Table<K, V> {
    fn get(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&i| &self.rows[i])
    }

    fn upsert(&mut self, key: K, value: V) {
        match self.index.get(&key) {
            Some(&i) => self.rows[i] = value,
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push(value);
            }
        }
    }

    fn iter(&self) -> impl Iterator<Item = &V> {
        self.rows.iter()
    }
}

/// The full state of an in-memory store, and the unit-of-work surface.
#[derive(Debug, Clone, Default)]
pub struct MemoryState {
    units: BTreeMap<InventoryUnitId, InventoryUnit>,
    allocations: Table<AllocationId, Allocation>,
    orders: HashMap<OrderId, Order>,
    tasks: Table<WorkTaskId, WorkTask>,
    bins: Table<PickBinId, PickBin>,
    locations: HashMap<LocationId, Location>,
    packages: HashMap<OrderId, Package>,
    idempotency: HashMap<(String, String), serde_json::Value>,
    bin_sequence: u64,
    staged: Vec<FulfillmentEvent>,
}

impl InventoryRepository for MemoryState {
    fn unit(&self, id: InventoryUnitId) -> Option<InventoryUnit> {
        self.units.get(&id).cloned()
    }

    fn units_for_variant(&self, product_variant_id: ProductVariantId) -> Vec<InventoryUnit> {
        self.units
            .values()
            .filter(|u| u.product_variant_id == product_variant_id)
            .cloned()
            .collect()
    }

    fn save_unit(&mut self, unit: InventoryUnit) {
        self.units.insert(unit.id, unit);
    }
}

impl AllocationRepository for MemoryState {
    fn allocations_for_order(&self, order_id: OrderId) -> Vec<Allocation> {
        self.allocations
            .iter()
            .filter(|a| a.order_id == order_id)
            .cloned()
            .collect()
    }

    fn active_allocations_for_units(&self, unit_ids: &[InventoryUnitId]) -> Vec<Allocation> {
        self.allocations
            .iter()
            .filter(|a| a.is_active() && unit_ids.contains(&a.inventory_unit_id))
            .cloned()
            .collect()
    }

    fn save_allocation(&mut self, allocation: Allocation) {
        self.allocations.upsert(allocation.id, allocation);
    }
}

impl OrderRepository for MemoryState {
    fn order(&self, id: OrderId) -> Option<Order> {
        self.orders.get(&id).cloned()
    }

    fn orders_with_status(&self, statuses: &[OrderStatus]) -> Vec<Order> {
        self.orders
            .values()
            .filter(|o| statuses.contains(&o.status))
            .cloned()
            .collect()
    }

    fn save_order(&mut self, order: Order) {
        self.orders.insert(order.id, order);
    }
}

impl TaskRepository for MemoryState {
    fn task(&self, id: WorkTaskId) -> Option<WorkTask> {
        self.tasks.get(&id).cloned()
    }

    fn tasks_for_order(&self, order_id: OrderId) -> Vec<WorkTask> {
        self.tasks
            .iter()
            .filter(|t| t.covers_order(order_id))
            .cloned()
            .collect()
    }

    fn task_for_item(&self, item_id: TaskItemId) -> Option<WorkTask> {
        self.tasks
            .iter()
            .find(|t| t.item(item_id).is_some())
            .cloned()
    }

    fn save_task(&mut self, task: WorkTask) {
        self.tasks.upsert(task.id, task);
    }
}

impl BinRepository for MemoryState {
    fn bin(&self, id: PickBinId) -> Option<PickBin> {
        self.bins.get(&id).cloned()
    }

    fn bin_by_barcode(&self, barcode: &str) -> Option<PickBin> {
        self.bins.iter().find(|b| b.barcode == barcode).cloned()
    }

    fn bins_for_order(&self, order_id: OrderId) -> Vec<PickBin> {
        self.bins
            .iter()
            .filter(|b| b.order_id == order_id)
            .cloned()
            .collect()
    }

    fn save_bin(&mut self, bin: PickBin) {
        self.bins.upsert(bin.id, bin);
    }

    fn next_bin_number(&mut self) -> u64 {
        self.bin_sequence += 1;
        self.bin_sequence
    }
}

impl LocationRepository for MemoryState {
    fn location(&self, id: LocationId) -> Option<Location> {
        self.locations.get(&id).cloned()
    }

    fn location_by_code(&self, code: &str) -> Option<Location> {
        self.locations.values().find(|l| l.code == code).cloned()
    }

    fn save_location(&mut self, location: Location) {
        self.locations.insert(location.id, location);
    }
}

impl PackageRepository for MemoryState {
    fn package_for_order(&self, order_id: OrderId) -> Option<Package> {
        self.packages.get(&order_id).cloned()
    }

    fn save_package(&mut self, package: Package) {
        self.packages.insert(package.order_id, package);
    }
}

impl IdempotencyRepository for MemoryState {
    fn recorded(&self, scope: &str, key: &IdempotencyKey) -> Option<serde_json::Value> {
        self.idempotency
            .get(&(scope.to_string(), key.as_str().to_string()))
            .cloned()
    }

    fn record(&mut self, scope: &str, key: &IdempotencyKey, result: serde_json::Value) {
        self.idempotency
            .insert((scope.to_string(), key.as_str().to_string()), result);
    }
}

impl EventStaging for MemoryState {
    fn stage(&mut self, event: FulfillmentEvent) {
        self.staged.push(event);
    }
}

/// In-memory store with serializable units of work.
///
/// A unit of work runs against a private copy of the state while holding the
/// store lock. On success the staged events are appended to the event log
/// and the copy replaces the state; on any failure the copy is dropped.
pub struct InMemoryStore<L = InMemoryEventLog> {
    state: Arc<Mutex<MemoryState>>,
    log: Arc<L>,
}

impl<L> Clone for InMemoryStore<L> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            log: Arc::clone(&self.log),
        }
    }
}

impl InMemoryStore<InMemoryEventLog> {
    /// Creates an empty store with its own in-memory event log.
    pub fn new() -> Self {
        Self::with_log(InMemoryEventLog::new())
    }
}

impl Default for InMemoryStore<InMemoryEventLog> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: EventLog> InMemoryStore<L> {
    /// Creates an empty store writing events to `log`.
    pub fn with_log(log: L) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            log: Arc::new(log),
        }
    }

    /// The event log this store commits to.
    pub fn log(&self) -> &L {
        &self.log
    }
}

#[async_trait]
impl<L: EventLog + 'static> FulfillmentStore for InMemoryStore<L> {
    type Tx = MemoryState;

    async fn transaction<T, E, F>(&self, f: F) -> Result<Committed<T>, E>
    where
        F: FnOnce(&mut Self::Tx) -> Result<T, E> + Send,
        T: Send,
        E: From<StoreError> + Send,
    {
        let mut state = self.state.lock().await;
        let mut tx = state.clone();
        tx.staged.clear();

        let value = f(&mut tx)?;

        let events = std::mem::take(&mut tx.staged);
        if !events.is_empty() {
            self.log
                .append(events.clone())
                .await
                .map_err(StoreError::from)?;
        }
        *state = tx;

        metrics::counter!("store_commits_total").increment(1);
        tracing::debug!(events = events.len(), "unit of work committed");
        Ok(Committed { value, events })
    }

    async fn read<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Self::Tx) -> T + Send,
        T: Send,
    {
        let state = self.state.lock().await;
        f(&state)
    }
}

//! End-to-end fulfillment flows against the in-memory store.

use std::sync::Arc;

use common::{IdempotencyKey, InventoryUnitId, LocationId, OrderId, ProductVariantId, UserId};
use domain::{
    AllocationStatus, BinStatus, ErrorKind, InventoryLedger, InventoryUnit, Location, Order,
    OrderItem, OrderStatus, PackageDetails, PickBin, TaskStatus, UnitStatus, verify_conservation,
};
use event_log::{BroadcastPublisher, EventFilter, EventLog, EventType};
use orchestrator::{Disposition, EngineConfig, FulfillmentEngine, Job, OrchestratorError};
use serde_json::json;
use store::{
    AllocationRepository, BinRepository, FulfillmentStore, InMemoryStore, InventoryRepository,
    LocationRepository, OrderRepository,
};

type Engine = FulfillmentEngine<InMemoryStore, BroadcastPublisher>;

struct TestHarness {
    store: InMemoryStore,
    publisher: BroadcastPublisher,
    engine: Engine,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryStore::new();
        let publisher = BroadcastPublisher::new(256);
        let engine =
            FulfillmentEngine::new(store.clone(), publisher.clone(), &EngineConfig::default());
        Self {
            store,
            publisher,
            engine,
        }
    }

    async fn location(&self, code: &str, pick_sequence: u32) -> LocationId {
        let location = Location::new(code, pick_sequence);
        let id = location.id;
        self.store
            .transaction(move |tx| {
                tx.save_location(location);
                Ok::<_, OrchestratorError>(())
            })
            .await
            .unwrap();
        id
    }

    async fn stock(
        &self,
        variant: ProductVariantId,
        location_id: LocationId,
        quantity: u32,
    ) -> InventoryUnitId {
        let unit = InventoryUnit::new(variant, location_id, quantity);
        let id = unit.id;
        self.store
            .transaction(move |tx| {
                tx.save_unit(unit);
                Ok::<_, OrchestratorError>(())
            })
            .await
            .unwrap();
        id
    }

    async fn place(&self, order: Order) -> OrderId {
        let id = order.id;
        self.store
            .transaction(move |tx| {
                tx.save_order(order);
                Ok::<_, OrchestratorError>(())
            })
            .await
            .unwrap();
        id
    }

    async fn order(&self, id: OrderId) -> Order {
        self.engine.allocation.order(id).await.unwrap()
    }

    async fn unit(&self, id: InventoryUnitId) -> InventoryUnit {
        self.store.read(move |tx| tx.unit(id)).await.unwrap()
    }

    async fn available(&self, variant: ProductVariantId) -> u32 {
        self.store
            .read(move |tx| {
                let units = tx.units_for_variant(variant);
                let ids: Vec<_> = units.iter().map(|u| u.id).collect();
                let allocations = tx.active_allocations_for_units(&ids);
                InventoryLedger::new(units, &allocations).total_available(variant)
            })
            .await
    }

    async fn active_allocations(&self, order_id: OrderId) -> usize {
        self.store
            .read(move |tx| {
                tx.allocations_for_order(order_id)
                    .iter()
                    .filter(|a| a.is_active())
                    .count()
            })
            .await
    }

    async fn event_types(&self, order_id: OrderId) -> Vec<EventType> {
        self.store
            .log()
            .events_for_order(order_id)
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.event_type)
            .collect()
    }

    /// Allocates, generates the pick list and confirms every line in full.
    async fn pick_all(&self, order_id: OrderId) -> PickBin {
        self.engine
            .allocation
            .allocate_order(order_id, true, None)
            .await
            .unwrap();
        let pick_list = self
            .engine
            .picking
            .generate_pick_list(order_id, None)
            .await
            .unwrap();
        let mut bin = None;
        for line in &pick_list.lines {
            bin = self
                .engine
                .picking
                .confirm_pick_item(line.task_item_id, None, None)
                .await
                .unwrap()
                .bin;
        }
        bin.expect("last confirmation stages the bin")
    }

    async fn global_event_types(&self) -> Vec<EventType> {
        self.store
            .log()
            .all_events()
            .await
            .into_iter()
            .filter(|e| e.order_id.is_none())
            .map(|e| e.event_type)
            .collect()
    }

    fn details() -> PackageDetails {
        PackageDetails {
            weight_grams: Some(850),
            dimensions: None,
            images: vec!["packing/photo-1.jpg".to_string()],
        }
    }
}

#[tokio::test]
async fn full_allocation_reserves_stock() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 4)])).await;

    let outcome = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();

    assert_eq!(outcome.disposition, Disposition::FullyAllocated);
    assert_eq!(outcome.status, OrderStatus::Allocated);
    assert_eq!(outcome.allocated.len(), 1);
    assert_eq!(h.available(variant).await, 6);
    assert_eq!(h.order(order_id).await.items[0].allocated, 4);
    assert_eq!(h.event_types(order_id).await, vec![EventType::OrderAllocated]);
}

#[tokio::test]
async fn rerun_only_requests_the_remainder() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 3).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 5)])).await;

    let first = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert_eq!(first.disposition, Disposition::PartiallyAllocated);
    assert_eq!(first.shortages[0].allocatable, 3);

    h.stock(variant, shelf, 10).await;
    let second = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert_eq!(second.disposition, Disposition::FullyAllocated);
    assert_eq!(second.allocated.iter().map(|a| a.quantity).sum::<u32>(), 2);

    let third = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert!(third.allocated.is_empty());
    assert_eq!(h.active_allocations(order_id).await, 2);
    assert_eq!(h.available(variant).await, 8);
}

#[tokio::test]
async fn partial_disallowed_backorders_without_reserving() {
    let h = TestHarness::new();
    let first = ProductVariantId::new();
    let second = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(first, shelf, 10).await;
    h.stock(second, shelf, 1).await;
    let order_id = h
        .place(Order::new(vec![
            OrderItem::new(first, 2),
            OrderItem::new(second, 3),
        ]))
        .await;

    let outcome = h
        .engine
        .allocation
        .allocate_order(order_id, false, None)
        .await
        .unwrap();

    assert_eq!(outcome.disposition, Disposition::Backordered);
    assert!(outcome.allocated.is_empty());
    assert_eq!(h.active_allocations(order_id).await, 0);
    assert_eq!(h.available(first).await, 10);
    assert_eq!(h.available(second).await, 1);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Backordered);
}

#[tokio::test]
async fn idempotency_key_replays_the_first_outcome() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 2).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 5)])).await;
    let key = IdempotencyKey::new("allocate-7f3a");

    let first = h
        .engine
        .allocation
        .allocate_order(order_id, true, Some(&key))
        .await
        .unwrap();
    assert!(!first.replayed);

    h.stock(variant, shelf, 10).await;
    let retry = h
        .engine
        .allocation
        .allocate_order(order_id, true, Some(&key))
        .await
        .unwrap();

    assert!(retry.replayed);
    assert_eq!(retry.disposition, Disposition::PartiallyAllocated);
    assert_eq!(retry.allocated, first.allocated);
    assert_eq!(h.active_allocations(order_id).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_allocations_never_oversell() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let unit_id = h.stock(variant, shelf, 10).await;

    let mut order_ids = Vec::new();
    for _ in 0..10 {
        order_ids.push(h.place(Order::new(vec![OrderItem::new(variant, 2)])).await);
    }

    let mut handles = Vec::new();
    for order_id in order_ids {
        let allocation = Arc::clone(&h.engine.allocation);
        handles.push(tokio::spawn(async move {
            allocation.allocate_order(order_id, false, None).await
        }));
    }

    let mut full = 0;
    let mut backordered = 0;
    for handle in handles {
        match handle.await.unwrap().unwrap().disposition {
            Disposition::FullyAllocated => full += 1,
            Disposition::Backordered => backordered += 1,
            other => panic!("unexpected disposition {other:?}"),
        }
    }
    assert_eq!(full, 5);
    assert_eq!(backordered, 5);
    assert_eq!(h.available(variant).await, 0);

    let (units, allocations) = h
        .store
        .read(move |tx| {
            (
                tx.unit(unit_id).into_iter().collect::<Vec<_>>(),
                tx.active_allocations_for_units(&[unit_id]),
            )
        })
        .await;
    assert!(verify_conservation(&units, &allocations).is_empty());
}

#[tokio::test]
async fn receipt_surfaces_backorders_by_priority() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let routine = h
        .place(Order::new(vec![OrderItem::new(variant, 2)]).with_priority(1))
        .await;
    let urgent = h
        .place(Order::new(vec![OrderItem::new(variant, 2)]).with_priority(5))
        .await;
    for id in [routine, urgent] {
        let outcome = h
            .engine
            .allocation
            .allocate_order(id, true, None)
            .await
            .unwrap();
        assert_eq!(outcome.disposition, Disposition::Backordered);
    }

    let receipt = h
        .engine
        .allocation
        .receive_inventory(InventoryUnit::new(variant, shelf, 3), None)
        .await
        .unwrap();
    let candidates: Vec<_> = receipt.candidates.iter().map(|c| c.order_id).collect();
    assert_eq!(candidates, vec![urgent, routine]);

    let outcome = h
        .engine
        .allocation
        .allocate_order(urgent, true, None)
        .await
        .unwrap();
    assert_eq!(outcome.disposition, Disposition::FullyAllocated);
    assert_eq!(
        h.event_types(urgent).await,
        vec![
            EventType::OrderBackordered,
            EventType::OrderAllocated,
            EventType::OrderBackorderResolved,
        ]
    );
}

#[tokio::test]
async fn no_candidates_without_stock() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 1)])).await;
    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();

    assert!(h.engine.allocation.check_backordered_orders(variant).await.is_empty());
}

#[tokio::test]
async fn release_restores_availability_exactly() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 4).await;
    h.stock(variant, shelf, 4).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 6)])).await;
    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert_eq!(h.available(variant).await, 2);

    let released = h
        .engine
        .allocation
        .release_allocations(order_id, Some("customer request".into()), None)
        .await
        .unwrap();
    assert_eq!(released.released.len(), 2);
    assert_eq!(released.quantity, 6);
    assert_eq!(h.available(variant).await, 8);

    let order = h.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.items[0].allocated, 0);

    let again = h
        .engine
        .allocation
        .release_allocations(order_id, None, None)
        .await
        .unwrap();
    assert!(again.already_cancelled);
    assert_eq!(h.available(variant).await, 8);
}

#[tokio::test]
async fn held_orders_are_skipped_until_released() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 5).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;

    h.engine
        .allocation
        .hold_order(order_id, "address check".into(), None)
        .await
        .unwrap();
    let skipped = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert_eq!(skipped.disposition, Disposition::OnHold);
    assert_eq!(h.available(variant).await, 5);

    let released = h
        .engine
        .allocation
        .release_hold(order_id, None)
        .await
        .unwrap();
    assert_eq!(released.status, OrderStatus::Confirmed);
    let outcome = h
        .engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    assert_eq!(outcome.disposition, Disposition::FullyAllocated);
}

#[tokio::test]
async fn pick_list_follows_walk_sequence() {
    let h = TestHarness::new();
    let far = ProductVariantId::new();
    let near = ProductVariantId::new();
    let back = h.location("C-09", 90).await;
    let front = h.location("A-01", 10).await;
    h.stock(far, back, 5).await;
    h.stock(near, front, 5).await;
    let order_id = h
        .place(Order::new(vec![
            OrderItem::new(far, 1),
            OrderItem::new(near, 1),
        ]))
        .await;
    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();

    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();

    let codes: Vec<_> = pick_list
        .lines
        .iter()
        .map(|l| l.location_code.clone().unwrap())
        .collect();
    assert_eq!(codes, vec!["A-01", "C-09"]);
    assert_eq!(pick_list.lines[0].sequence, 1);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Picking);

    let err = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
}

#[tokio::test]
async fn order_ships_end_to_end() {
    let h = TestHarness::new();
    let packer = UserId::new();
    let mug = ProductVariantId::new();
    let lid = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let mug_unit = h.stock(mug, shelf, 10).await;
    h.stock(lid, shelf, 10).await;
    let order_id = h
        .place(Order::new(vec![OrderItem::new(mug, 2), OrderItem::new(lid, 1)]))
        .await;
    let mut events = h.publisher.subscribe(EventFilter::order(order_id));

    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();

    let mut bin = None;
    for line in &pick_list.lines {
        let confirmation = h
            .engine
            .picking
            .confirm_pick_item(line.task_item_id, None, None)
            .await
            .unwrap();
        bin = confirmation.bin;
    }
    let bin = bin.expect("last confirmation stages the bin");
    assert_eq!(bin.total_quantity(), 3);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Picked);

    let lookup = h
        .engine
        .picking
        .get_order_by_bin_barcode(bin.barcode.clone(), Some(packer))
        .await
        .unwrap();
    assert!(!lookup.already_packing);
    assert_eq!(lookup.order.id, order_id);
    let repeat = h
        .engine
        .picking
        .get_order_by_bin_barcode(bin.barcode.clone(), Some(packer))
        .await
        .unwrap();
    assert!(repeat.already_packing);

    let task = h
        .engine
        .packing
        .start_packing(order_id, Some(packer))
        .await
        .unwrap();
    for variant in [mug, mug, lid] {
        h.engine
            .packing
            .verify_item_scan(task.id, variant, Some(packer))
            .await
            .unwrap();
    }
    let over = h
        .engine
        .packing
        .verify_item_scan(task.id, lid, Some(packer))
        .await
        .unwrap_err();
    assert_eq!(over.kind(), ErrorKind::InvalidQuantity);

    let package = h
        .engine
        .packing
        .complete_packing(task.id, TestHarness::details(), Some(packer))
        .await
        .unwrap();
    assert_eq!(package.weight_grams, 850);

    let shipment = h
        .engine
        .packing
        .ship_order(order_id, "1Z999AA10123456784".into(), Some(packer))
        .await
        .unwrap();
    assert_eq!(shipment.consumed, 3);
    assert_eq!(shipment.returned, 0);

    let order = h.order(order_id).await;
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.tracking_number.as_deref(), Some("1Z999AA10123456784"));
    assert!(order.items.iter().all(|i| i.shipped == i.quantity));
    assert_eq!(h.unit(mug_unit).await.quantity, 8);
    assert_eq!(h.available(mug).await, 8);
    assert_eq!(h.active_allocations(order_id).await, 0);

    let bin_status = h
        .store
        .read({
            let barcode = bin.barcode.clone();
            move |tx| tx.bin_by_barcode(&barcode).map(|b| b.status)
        })
        .await;
    assert_eq!(bin_status, Some(BinStatus::Completed));

    let first = events.try_next().expect("allocation was published");
    assert_eq!(first.event_type, EventType::OrderAllocated);
    let mut last = first;
    while let Some(event) = events.try_next() {
        last = event;
    }
    assert_eq!(last.event_type, EventType::OrderShipped);
}

#[tokio::test]
async fn short_pick_ships_what_was_picked() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let unit_id = h.stock(variant, shelf, 10).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 5)])).await;

    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();
    let confirmation = h
        .engine
        .picking
        .confirm_pick_item(pick_list.lines[0].task_item_id, Some(3), None)
        .await
        .unwrap();
    assert_eq!(confirmation.task_status, TaskStatus::Completed);
    assert_eq!(confirmation.bin.as_ref().map(|b| b.total_quantity()), Some(3));

    let allocations = h.engine.allocation.allocations(order_id).await;
    assert_eq!(allocations[0].status, AllocationStatus::Allocated);

    let task = h
        .engine
        .packing
        .start_packing(order_id, None)
        .await
        .unwrap();
    assert_eq!(task.items[0].quantity_required, 3);
    for _ in 0..3 {
        h.engine
            .packing
            .verify_item_scan(task.id, variant, None)
            .await
            .unwrap();
    }
    h.engine
        .packing
        .complete_packing(task.id, TestHarness::details(), None)
        .await
        .unwrap();
    let allocations = h.engine.allocation.allocations(order_id).await;
    assert_eq!(allocations[0].status, AllocationStatus::Picked);

    let shipment = h
        .engine
        .packing
        .ship_order(order_id, "TRK-1".into(), None)
        .await
        .unwrap();
    assert_eq!(shipment.consumed, 3);
    assert_eq!(shipment.returned, 2);
    assert_eq!(h.unit(unit_id).await.quantity, 7);
    assert_eq!(h.available(variant).await, 7);

    let item = &h.order(order_id).await.items[0];
    assert_eq!((item.picked, item.shipped), (3, 3));
}

#[tokio::test]
async fn evidence_gate_is_checked_before_verification() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;

    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();
    h.engine
        .picking
        .confirm_pick_item(pick_list.lines[0].task_item_id, None, None)
        .await
        .unwrap();
    let task = h
        .engine
        .packing
        .start_packing(order_id, None)
        .await
        .unwrap();

    let no_photo = PackageDetails {
        images: Vec::new(),
        ..TestHarness::details()
    };
    let err = h
        .engine
        .packing
        .complete_packing(task.id, no_photo, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    assert!(err.to_string().contains("photograph"));

    let err = h
        .engine
        .packing
        .complete_packing(task.id, TestHarness::details(), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("verified"));
    assert_eq!(h.order(order_id).await.status, OrderStatus::Packing);
}

#[tokio::test]
async fn cancelling_during_picking_cancels_the_task() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 3).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 3)])).await;

    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();

    h.engine
        .allocation
        .release_allocations(order_id, None, None)
        .await
        .unwrap();

    let task = h.engine.picking.task(pick_list.task_id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(h.available(variant).await, 3);
}

#[tokio::test]
async fn unstarted_pick_task_can_be_cancelled() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 3).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 3)])).await;
    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    let pick_list = h
        .engine
        .picking
        .generate_pick_list(order_id, None)
        .await
        .unwrap();

    let task = h
        .engine
        .picking
        .cancel_pick_task(pick_list.task_id, None)
        .await
        .unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Allocated);
    assert_eq!(h.active_allocations(order_id).await, 1);
}

#[tokio::test]
async fn redelivered_job_is_deduplicated() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let key = IdempotencyKey::new("job-42");

    let job = Job::parse("allocateOrder", json!({ "orderId": order_id })).unwrap();
    let first = h.engine.jobs.dispatch(job.clone(), Some(&key)).await.unwrap();
    let second = h.engine.jobs.dispatch(job, Some(&key)).await.unwrap();

    assert!(!first.deduplicated);
    assert!(second.deduplicated);
    assert_eq!(first.result, second.result);
    assert_eq!(h.active_allocations(order_id).await, 1);
    assert_eq!(h.available(variant).await, 8);
}

#[tokio::test]
async fn backorder_job_retries_candidates() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    h.engine
        .allocation
        .allocate_order(order_id, true, None)
        .await
        .unwrap();
    h.stock(variant, shelf, 5).await;

    let job = Job::parse(
        "checkBackorderedOrders",
        json!({ "productVariantId": variant }),
    )
    .unwrap();
    let outcome = h.engine.jobs.dispatch(job, None).await.unwrap();

    assert_eq!(
        outcome.result["retried"]["fullyAllocated"],
        json!([order_id])
    );
    assert_eq!(h.order(order_id).await.status, OrderStatus::Allocated);
}

#[tokio::test]
async fn idempotency_key_reused_for_another_order_conflicts() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let first = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let second = h.place(Order::new(vec![OrderItem::new(variant, 3)])).await;
    let key = IdempotencyKey::new("allocate-shared");

    h.engine
        .allocation
        .allocate_order(first, true, Some(&key))
        .await
        .unwrap();
    let err = h
        .engine
        .allocation
        .allocate_order(second, true, Some(&key))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.order(second).await.status, OrderStatus::Pending);
    assert_eq!(h.active_allocations(second).await, 0);
    assert_eq!(h.available(variant).await, 8);
}

#[tokio::test]
async fn order_without_matched_demand_is_not_allocated() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let unmatched = h.place(Order::new(vec![OrderItem::unmatched(2)])).await;
    let empty = h.place(Order::new(vec![OrderItem::new(variant, 0)])).await;

    for order_id in [unmatched, empty] {
        let err = h
            .engine
            .allocation
            .allocate_order(order_id, true, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
        assert_eq!(h.order(order_id).await.status, OrderStatus::Pending);
        assert!(h.event_types(order_id).await.is_empty());
    }
    assert_eq!(h.available(variant).await, 10);
}

#[tokio::test]
async fn batch_reports_failures_without_stopping() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 10).await;
    let first = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let held = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let last = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let missing = OrderId::new();
    h.engine
        .allocation
        .hold_order(held, "fraud review".into(), None)
        .await
        .unwrap();

    let report = h
        .engine
        .allocation
        .allocate_orders(&[first, missing, held, last], true, None)
        .await;

    assert_eq!(report.fully_allocated, vec![first, last]);
    assert_eq!(report.on_hold, vec![held]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].order_id, missing);
    assert_eq!(report.failed[0].kind, ErrorKind::NotFound);
    assert_eq!(h.active_allocations(held).await, 0);
    assert_eq!(h.available(variant).await, 6);
}

#[tokio::test]
async fn completed_bin_cannot_be_scanned_again() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 5).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 1)])).await;
    let bin = h.pick_all(order_id).await;

    let task = h
        .engine
        .packing
        .start_packing(order_id, None)
        .await
        .unwrap();
    h.engine
        .packing
        .verify_item_scan(task.id, variant, None)
        .await
        .unwrap();
    h.engine
        .packing
        .complete_packing(task.id, TestHarness::details(), None)
        .await
        .unwrap();
    assert_eq!(
        h.engine.picking.bin(bin.id).await.unwrap().status,
        BinStatus::Completed
    );

    let err = h
        .engine
        .picking
        .get_order_by_bin_barcode(bin.barcode, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
}

#[tokio::test]
async fn cancelled_bin_cannot_be_scanned() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 5).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 2)])).await;
    let bin = h.pick_all(order_id).await;
    assert_eq!(bin.status, BinStatus::Staged);

    h.engine
        .allocation
        .release_allocations(order_id, Some("customer cancelled".into()), None)
        .await
        .unwrap();
    assert_eq!(
        h.engine.picking.bin(bin.id).await.unwrap().status,
        BinStatus::Cancelled
    );

    let err = h
        .engine
        .picking
        .get_order_by_bin_barcode(bin.barcode, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn unknown_bin_is_not_found() {
    let h = TestHarness::new();

    let err = h
        .engine
        .picking
        .bin(common::PickBinId::new())
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn retried_packing_returns_the_recorded_package() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    h.stock(variant, shelf, 5).await;
    let order_id = h.place(Order::new(vec![OrderItem::new(variant, 1)])).await;
    h.pick_all(order_id).await;
    let task = h
        .engine
        .packing
        .start_packing(order_id, None)
        .await
        .unwrap();
    h.engine
        .packing
        .verify_item_scan(task.id, variant, None)
        .await
        .unwrap();

    let first = h
        .engine
        .packing
        .complete_packing(task.id, TestHarness::details(), None)
        .await
        .unwrap();
    let events_after_first = h.event_types(order_id).await.len();
    let retry = h
        .engine
        .packing
        .complete_packing(task.id, TestHarness::details(), None)
        .await
        .unwrap();

    assert_eq!(retry, first);
    assert_eq!(h.event_types(order_id).await.len(), events_after_first);
    assert_eq!(h.order(order_id).await.status, OrderStatus::Packed);
}

#[tokio::test]
async fn damaged_stock_leaves_and_returns_to_availability() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let unit_id = h.stock(variant, shelf, 10).await;
    let reserved = h.place(Order::new(vec![OrderItem::new(variant, 4)])).await;
    h.engine
        .allocation
        .allocate_order(reserved, true, None)
        .await
        .unwrap();

    let err = h
        .engine
        .allocation
        .adjust_unit(unit_id, 7, UnitStatus::Damaged, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InsufficientQuantity);

    let adjustment = h
        .engine
        .allocation
        .adjust_unit(unit_id, 6, UnitStatus::Damaged, Some("crushed".into()), None)
        .await
        .unwrap();
    assert_eq!(adjustment.source.quantity, 4);
    assert_eq!(adjustment.adjusted.quantity, 6);
    assert_eq!(adjustment.adjusted.status, UnitStatus::Damaged);
    assert_eq!(h.available(variant).await, 0);
    assert_eq!(h.unit(adjustment.adjusted.id).await.status, UnitStatus::Damaged);

    let waiting = h.place(Order::new(vec![OrderItem::new(variant, 3)])).await;
    let outcome = h
        .engine
        .allocation
        .allocate_order(waiting, true, None)
        .await
        .unwrap();
    assert_eq!(outcome.disposition, Disposition::Backordered);

    let receipt = h
        .engine
        .allocation
        .reclassify_unit(adjustment.adjusted.id, None)
        .await
        .unwrap();
    assert_eq!(receipt.unit_id, adjustment.adjusted.id);
    assert_eq!(receipt.candidates.len(), 1);
    assert_eq!(receipt.candidates[0].order_id, waiting);
    assert_eq!(h.available(variant).await, 6);
    assert_eq!(
        h.global_event_types().await,
        vec![EventType::InventoryAdjusted, EventType::InventoryReclassified]
    );
}

#[tokio::test]
async fn adjustment_status_must_take_stock_out_of_circulation() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let shelf = h.location("A-01", 10).await;
    let unit_id = h.stock(variant, shelf, 10).await;

    for status in [UnitStatus::Available, UnitStatus::Reserved, UnitStatus::Picked] {
        let err = h
            .engine
            .allocation
            .adjust_unit(unit_id, 1, status, None, None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    let err = h
        .engine
        .allocation
        .reclassify_unit(unit_id, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateTransition);
    assert_eq!(h.available(variant).await, 10);
}

#[tokio::test]
async fn placed_orders_open_their_audit_trail() {
    let h = TestHarness::new();
    let variant = ProductVariantId::new();
    let order = Order::new(vec![OrderItem::new(variant, 2), OrderItem::unmatched(1)]);
    let order_id = order.id;

    let placed = h
        .engine
        .allocation
        .place_order(order.clone(), None)
        .await
        .unwrap();
    assert_eq!(placed.status, OrderStatus::Pending);
    assert_eq!(h.event_types(order_id).await, vec![EventType::OrderCreated]);

    let err = h
        .engine
        .allocation
        .place_order(order, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let mut shipped = Order::new(vec![OrderItem::new(variant, 1)]);
    shipped.status = OrderStatus::Shipped;
    let err = h
        .engine
        .allocation
        .place_order(shipped, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
}

#[tokio::test]
async fn duplicate_location_conflicts() {
    let h = TestHarness::new();
    let location = Location::new("B-12", 20);

    let created = h
        .engine
        .allocation
        .create_location(location.clone())
        .await
        .unwrap();
    assert_eq!(created.code, "B-12");

    let err = h
        .engine
        .allocation
        .create_location(location)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let err = h
        .engine
        .allocation
        .create_location(Location::new("B-12", 30))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

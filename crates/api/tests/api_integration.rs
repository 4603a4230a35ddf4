//! Integration tests for the API server.

use std::sync::{Arc, OnceLock};

use api::AppState;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{OrderId, ProductVariantId};
use domain::{InventoryUnit, Location, Order, OrderItem};
use event_log::InMemoryEventLog;
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::OrchestratorError;
use serde_json::{Value, json};
use store::{FulfillmentStore, InventoryRepository, LocationRepository, OrderRepository};
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            metrics_exporter_prometheus::PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

fn setup() -> (axum::Router, Arc<AppState<InMemoryEventLog>>) {
    let state = api::create_default_state(&Config::default());
    let app = api::create_app(state.clone(), get_metrics_handle());
    (app, state)
}

/// Seeds one shelf holding `on_hand` units of a variant and an order for `ordered`.
async fn seed(state: &AppState<InMemoryEventLog>, on_hand: u32, ordered: u32) -> OrderId {
    let variant = ProductVariantId::new();
    let location = Location::new("A-01", 1);
    let unit = InventoryUnit::new(variant, location.id, on_hand);
    let order = Order::new(vec![OrderItem::new(variant, ordered)]);
    let order_id = order.id;
    state
        .store
        .transaction(move |tx| {
            tx.save_location(location);
            tx.save_unit(unit);
            tx.save_order(order);
            Ok::<_, OrchestratorError>(())
        })
        .await
        .unwrap();
    order_id
}

async fn send(app: axum::Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

fn job(name: &str, key: Option<&str>, payload: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/jobs/{name}"))
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("idempotency-key", key);
    }
    builder
        .body(Body::from(serde_json::to_string(&payload).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

#[tokio::test]
async fn test_health_check() {
    let (app, _) = setup();

    let (status, json) = send(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert!(
        json["jobs"]
            .as_array()
            .unwrap()
            .contains(&json!("allocateOrder"))
    );
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let (app, _) = setup();

    let response = app.oneshot(get("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let content_type = response.headers()["content-type"].to_str().unwrap();
    assert!(content_type.starts_with("text/plain"));
}

#[tokio::test]
async fn allocate_job_reserves_stock() {
    let (app, state) = setup();
    let order_id = seed(&state, 10, 3).await;

    let (status, json) = send(
        app,
        job("allocateOrder", None, json!({ "orderId": order_id })),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["job"], "allocateOrder");
    assert_eq!(json["deduplicated"], false);
    assert_eq!(json["result"]["status"], "ALLOCATED");
}

#[tokio::test]
async fn repeated_job_key_is_deduplicated() {
    let (app, state) = setup();
    let order_id = seed(&state, 10, 3).await;
    let payload = json!({ "orderId": order_id });

    let (_, first) = send(
        app.clone(),
        job("allocateOrder", Some("delivery-1"), payload.clone()),
    )
    .await;
    let (status, second) = send(app, job("allocateOrder", Some("delivery-1"), payload)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["deduplicated"], true);
    assert_eq!(first["result"], second["result"]);
    assert_eq!(state.engine.allocation.allocations(order_id).await.len(), 1);
}

#[tokio::test]
async fn unknown_job_is_not_found() {
    let (app, _) = setup();

    let (status, json) = send(app, job("reindexEverything", None, json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");
}

#[tokio::test]
async fn malformed_payload_is_bad_request() {
    let (app, _) = setup();

    let (status, json) = send(app, job("allocateOrder", None, json!({ "orderId": 7 }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "invalid_input");
}

#[tokio::test]
async fn allocating_a_missing_order_is_not_found() {
    let (app, _) = setup();

    let (status, json) = send(
        app,
        job("allocateOrder", None, json!({ "orderId": OrderId::new() })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("not found"));
}

#[tokio::test]
async fn releasing_a_shipped_order_conflicts() {
    let (app, state) = setup();
    let order_id = seed(&state, 10, 3).await;
    state
        .store
        .transaction(move |tx| {
            let mut order = tx.order(order_id).unwrap();
            order.status = domain::OrderStatus::Shipped;
            tx.save_order(order);
            Ok::<_, OrchestratorError>(())
        })
        .await
        .unwrap();

    let (status, json) = send(
        app,
        job("releaseAllocations", None, json!({ "orderId": order_id })),
    )
    .await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "invalid_state_transition");
}

#[tokio::test]
async fn order_view_includes_allocations() {
    let (app, state) = setup();
    let order_id = seed(&state, 2, 5).await;
    send(
        app.clone(),
        job("allocateOrder", None, json!({ "orderId": order_id })),
    )
    .await;

    let (status, json) = send(app, get(&format!("/orders/{order_id}"))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "PARTIALLY_ALLOCATED");
    assert_eq!(json["allocations"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn events_endpoint_lists_the_audit_trail() {
    let (app, state) = setup();
    let order_id = seed(&state, 10, 3).await;
    send(
        app.clone(),
        job("allocateOrder", None, json!({ "orderId": order_id })),
    )
    .await;

    let (status, json) = send(app, get(&format!("/orders/{order_id}/events"))).await;

    assert_eq!(status, StatusCode::OK);
    let events = json.as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "order:allocated");
}

#[tokio::test]
async fn invalid_order_id_is_bad_request() {
    let (app, _) = setup();

    let (status, json) = send(app, get("/orders/not-a-uuid/events")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("Invalid ID format"));
}

fn post(uri: &str, payload: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&payload).unwrap()))
        .unwrap()
}

async fn create_location(app: &axum::Router, code: &str) -> Value {
    let (status, json) = send(
        app.clone(),
        post("/locations", json!({ "code": code, "pickSequence": 1, "zone": "A" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    json
}

#[tokio::test]
async fn orders_flow_from_intake_to_allocation_over_http() {
    let (app, _) = setup();
    let variant = ProductVariantId::new();
    let location = create_location(&app, "A-01").await;

    let (status, receipt) = send(
        app.clone(),
        post(
            "/inventory/receipts",
            json!({ "productVariantId": variant, "locationId": location["id"], "quantity": 5 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(receipt["candidates"].as_array().unwrap().is_empty());

    let (status, order) = send(
        app.clone(),
        post(
            "/orders",
            json!({ "priority": 2, "items": [{ "productVariantId": variant, "quantity": 3 }] }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(order["status"], "PENDING");
    assert_eq!(order["priority"], 2);

    let (status, json) = send(
        app.clone(),
        job("allocateOrder", None, json!({ "orderId": order["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["result"]["status"], "ALLOCATED");

    let order_id = order["id"].as_str().unwrap();
    let (_, events) = send(app, get(&format!("/orders/{order_id}/events"))).await;
    let types: Vec<&str> = events
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["order:created", "order:allocated"]);
}

#[tokio::test]
async fn receipt_reports_backorders_it_unblocks() {
    let (app, _) = setup();
    let variant = ProductVariantId::new();
    let location = create_location(&app, "B-07").await;
    let (_, order) = send(
        app.clone(),
        post(
            "/orders",
            json!({ "items": [{ "productVariantId": variant, "quantity": 4 }] }),
        ),
    )
    .await;
    let (_, json) = send(
        app.clone(),
        job("allocateOrder", None, json!({ "orderId": order["id"] })),
    )
    .await;
    assert_eq!(json["result"]["status"], "BACKORDERED");

    let (status, receipt) = send(
        app,
        post(
            "/inventory/receipts",
            json!({ "productVariantId": variant, "locationId": location["id"], "quantity": 4 }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::CREATED);
    let candidates = receipt["candidates"].as_array().unwrap();
    assert_eq!(candidates.len(), 1);
    assert_eq!(candidates[0]["orderId"], order["id"]);
    assert_eq!(candidates[0]["awaiting"], 4);
}

#[tokio::test]
async fn receipt_at_unknown_location_is_not_found() {
    let (app, _) = setup();

    let (status, json) = send(
        app,
        post(
            "/inventory/receipts",
            json!({
                "productVariantId": ProductVariantId::new(),
                "locationId": common::LocationId::new(),
                "quantity": 1,
            }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["kind"], "not_found");
}

#[tokio::test]
async fn damaged_stock_can_be_adjusted_and_returned() {
    let (app, _) = setup();
    let variant = ProductVariantId::new();
    let location = create_location(&app, "C-02").await;
    let (_, receipt) = send(
        app.clone(),
        post(
            "/inventory/receipts",
            json!({ "productVariantId": variant, "locationId": location["id"], "quantity": 10 }),
        ),
    )
    .await;
    let unit_id = receipt["unitId"].as_str().unwrap();

    let (status, adjustment) = send(
        app.clone(),
        post(
            &format!("/inventory/{unit_id}/adjust"),
            json!({ "quantity": 3, "status": "DAMAGED", "reason": "forklift" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(adjustment["source"]["quantity"], 7);
    assert_eq!(adjustment["adjusted"]["quantity"], 3);
    assert_eq!(adjustment["adjusted"]["status"], "DAMAGED");

    let damaged_id = adjustment["adjusted"]["id"].as_str().unwrap();
    let (status, _) = send(
        app.clone(),
        post(&format!("/inventory/{damaged_id}/reclassify"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = send(
        app,
        post(&format!("/inventory/{damaged_id}/reclassify"), json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(json["kind"], "invalid_state_transition");
}

#[tokio::test]
async fn adjusting_into_available_is_rejected() {
    let (app, _) = setup();
    let variant = ProductVariantId::new();
    let location = create_location(&app, "D-01").await;
    let (_, receipt) = send(
        app.clone(),
        post(
            "/inventory/receipts",
            json!({ "productVariantId": variant, "locationId": location["id"], "quantity": 2 }),
        ),
    )
    .await;
    let unit_id = receipt["unitId"].as_str().unwrap();

    let (status, json) = send(
        app,
        post(
            &format!("/inventory/{unit_id}/adjust"),
            json!({ "quantity": 1, "status": "AVAILABLE" }),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "precondition_failed");
}

#[tokio::test]
async fn empty_order_is_bad_request() {
    let (app, _) = setup();

    let (status, json) = send(app, post("/orders", json!({ "items": [] }))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "invalid_input");
}

#[tokio::test]
async fn unmatched_only_order_cannot_be_allocated() {
    let (app, _) = setup();
    let (status, order) = send(
        app.clone(),
        post("/orders", json!({ "items": [{ "quantity": 2 }] })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, json) = send(
        app.clone(),
        job("allocateOrder", None, json!({ "orderId": order["id"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["kind"], "precondition_failed");

    let order_id = order["id"].as_str().unwrap();
    let (_, view) = send(app, get(&format!("/orders/{order_id}"))).await;
    assert_eq!(view["status"], "PENDING");
}

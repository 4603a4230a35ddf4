//! Order intake and read endpoints: current state and audit trail.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use common::{OrderId, ProductVariantId};
use domain::{Allocation, Order, OrderItem, OrderStatus};
use event_log::{EventLog, FulfillmentEvent};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::error::ApiError;

#[derive(Serialize)]
pub struct OrderResponse {
    #[serde(flatten)]
    pub order: Order,
    pub allocations: Vec<Allocation>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub status: Option<OrderStatus>,
    pub items: Vec<CreateOrderItem>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderItem {
    /// Absent while the storefront SKU is unmatched.
    #[serde(default)]
    pub product_variant_id: Option<ProductVariantId>,
    pub quantity: u32,
}

/// POST /orders: places a new PENDING (or CONFIRMED) order.
pub async fn create<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    if request.items.is_empty() {
        return Err(ApiError::BadRequest("an order needs at least one item".to_string()));
    }
    let items = request
        .items
        .into_iter()
        .map(|item| match item.product_variant_id {
            Some(variant) => OrderItem::new(variant, item.quantity),
            None => OrderItem::unmatched(item.quantity),
        })
        .collect();
    let mut order = Order::new(items);
    order.priority = request.priority;
    if let Some(status) = request.status {
        order.status = status;
    }

    let order = state.engine.allocation.place_order(order, None).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}: returns the order with its allocations.
pub async fn get<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let order = state.engine.allocation.order(order_id).await?;
    let allocations = state.engine.allocation.allocations(order_id).await;
    Ok(Json(OrderResponse { order, allocations }))
}

/// GET /orders/{id}/events: returns the order's events in commit order.
pub async fn events<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<FulfillmentEvent>>, ApiError> {
    let order_id = parse_order_id(&id)?;
    let events = state.store.log().events_for_order(order_id).await?;
    Ok(Json(events))
}

fn parse_order_id(id: &str) -> Result<OrderId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(OrderId::from(uuid))
}

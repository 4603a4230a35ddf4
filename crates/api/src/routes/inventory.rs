//! Stock receipt, adjustment and reclassification.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::NaiveDate;
use common::{InventoryUnitId, LocationId, ProductVariantId};
use domain::{InventoryUnit, UnitStatus};
use event_log::EventLog;
use orchestrator::{ReceiptOutcome, UnitAdjustment};
use serde::Deserialize;

use crate::AppState;
use crate::error::ApiError;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveRequest {
    pub product_variant_id: ProductVariantId,
    pub location_id: LocationId,
    pub quantity: u32,
    #[serde(default)]
    pub lot_number: Option<String>,
    #[serde(default)]
    pub expiry_date: Option<NaiveDate>,
    #[serde(default)]
    pub unit_cost: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub quantity: u32,
    pub status: UnitStatus,
    #[serde(default)]
    pub reason: Option<String>,
}

/// POST /inventory/receipts: records received stock and lists the
/// backorders it may unblock.
pub async fn receive<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Json(request): Json<ReceiveRequest>,
) -> Result<(StatusCode, Json<ReceiptOutcome>), ApiError> {
    let mut unit = InventoryUnit::new(
        request.product_variant_id,
        request.location_id,
        request.quantity,
    );
    unit.lot_number = request.lot_number;
    unit.expiry_date = request.expiry_date;
    unit.unit_cost = request.unit_cost;

    let outcome = state.engine.allocation.receive_inventory(unit, None).await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /inventory/{id}/adjust: moves unreserved stock to DAMAGED,
/// QUARANTINE or IN_TRANSIT.
pub async fn adjust<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
    Json(request): Json<AdjustRequest>,
) -> Result<Json<UnitAdjustment>, ApiError> {
    let unit_id = parse_unit_id(&id)?;
    let adjustment = state
        .engine
        .allocation
        .adjust_unit(
            unit_id,
            request.quantity,
            request.status,
            request.reason,
            None,
        )
        .await?;
    Ok(Json(adjustment))
}

/// POST /inventory/{id}/reclassify: returns damaged or quarantined stock.
pub async fn reclassify<L: EventLog + 'static>(
    State(state): State<Arc<AppState<L>>>,
    Path(id): Path<String>,
) -> Result<Json<ReceiptOutcome>, ApiError> {
    let unit_id = parse_unit_id(&id)?;
    let outcome = state.engine.allocation.reclassify_unit(unit_id, None).await?;
    Ok(Json(outcome))
}

fn parse_unit_id(id: &str) -> Result<InventoryUnitId, ApiError> {
    let uuid = uuid::Uuid::parse_str(id)
        .map_err(|e| ApiError::BadRequest(format!("Invalid ID format: {e}")))?;
    Ok(InventoryUnitId::from(uuid))
}

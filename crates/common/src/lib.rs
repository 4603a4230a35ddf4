//! Shared identifier types used across the fulfillment engine crates.

mod ids;
mod idempotency;

pub use idempotency::IdempotencyKey;
pub use ids::{
    AllocationId, CorrelationId, InventoryUnitId, LocationId, OrderId, OrderItemId, PackageId,
    PickBinId, ProductVariantId, TaskItemId, UserId, WorkTaskId,
};

use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId, UserId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::EventLogError;

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Creates a new random event ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an event ID from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for EventId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// Catalog of event types emitted by the engine.
///
/// The wire name (`order:allocated`, `picklist:generated`, ...) is what
/// notification consumers filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order:created")]
    OrderCreated,
    #[serde(rename = "order:processing")]
    OrderProcessing,
    #[serde(rename = "order:allocated")]
    OrderAllocated,
    #[serde(rename = "order:partially_allocated")]
    OrderPartiallyAllocated,
    #[serde(rename = "order:backordered")]
    OrderBackordered,
    #[serde(rename = "order:backorder_resolved")]
    OrderBackorderResolved,
    #[serde(rename = "order:on_hold")]
    OrderOnHold,
    #[serde(rename = "order:hold_released")]
    OrderHoldReleased,
    #[serde(rename = "order:cancelled")]
    OrderCancelled,
    #[serde(rename = "order:picked")]
    OrderPicked,
    #[serde(rename = "order:packed")]
    OrderPacked,
    #[serde(rename = "order:shipped")]
    OrderShipped,
    #[serde(rename = "allocations:released")]
    AllocationsReleased,
    #[serde(rename = "inventory:received")]
    InventoryReceived,
    #[serde(rename = "inventory:adjusted")]
    InventoryAdjusted,
    #[serde(rename = "inventory:reclassified")]
    InventoryReclassified,
    #[serde(rename = "picklist:generated")]
    PicklistGenerated,
    #[serde(rename = "picklist:item_picked")]
    PicklistItemPicked,
    #[serde(rename = "picklist:completed")]
    PicklistCompleted,
    #[serde(rename = "picklist:cancelled")]
    PicklistCancelled,
    #[serde(rename = "task:assigned")]
    TaskAssigned,
    #[serde(rename = "task:blocked")]
    TaskBlocked,
    #[serde(rename = "task:resumed")]
    TaskResumed,
    #[serde(rename = "pickbin:created")]
    PickBinCreated,
    #[serde(rename = "pickbin:claimed")]
    PickBinClaimed,
    #[serde(rename = "packing:started")]
    PackingStarted,
    #[serde(rename = "packing:item_verified")]
    PackingItemVerified,
    #[serde(rename = "packing:completed")]
    PackingCompleted,
}

impl EventType {
    /// Every event type in the catalog.
    pub const ALL: [EventType; 28] = [
        EventType::OrderCreated,
        EventType::OrderProcessing,
        EventType::OrderAllocated,
        EventType::OrderPartiallyAllocated,
        EventType::OrderBackordered,
        EventType::OrderBackorderResolved,
        EventType::OrderOnHold,
        EventType::OrderHoldReleased,
        EventType::OrderCancelled,
        EventType::OrderPicked,
        EventType::OrderPacked,
        EventType::OrderShipped,
        EventType::AllocationsReleased,
        EventType::InventoryReceived,
        EventType::InventoryAdjusted,
        EventType::InventoryReclassified,
        EventType::PicklistGenerated,
        EventType::PicklistItemPicked,
        EventType::PicklistCompleted,
        EventType::PicklistCancelled,
        EventType::TaskAssigned,
        EventType::TaskBlocked,
        EventType::TaskResumed,
        EventType::PickBinCreated,
        EventType::PickBinClaimed,
        EventType::PackingStarted,
        EventType::PackingItemVerified,
        EventType::PackingCompleted,
    ];

    /// Returns the wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::OrderCreated => "order:created",
            EventType::OrderProcessing => "order:processing",
            EventType::OrderAllocated => "order:allocated",
            EventType::OrderPartiallyAllocated => "order:partially_allocated",
            EventType::OrderBackordered => "order:backordered",
            EventType::OrderBackorderResolved => "order:backorder_resolved",
            EventType::OrderOnHold => "order:on_hold",
            EventType::OrderHoldReleased => "order:hold_released",
            EventType::OrderCancelled => "order:cancelled",
            EventType::OrderPicked => "order:picked",
            EventType::OrderPacked => "order:packed",
            EventType::OrderShipped => "order:shipped",
            EventType::AllocationsReleased => "allocations:released",
            EventType::InventoryReceived => "inventory:received",
            EventType::InventoryAdjusted => "inventory:adjusted",
            EventType::InventoryReclassified => "inventory:reclassified",
            EventType::PicklistGenerated => "picklist:generated",
            EventType::PicklistItemPicked => "picklist:item_picked",
            EventType::PicklistCompleted => "picklist:completed",
            EventType::PicklistCancelled => "picklist:cancelled",
            EventType::TaskAssigned => "task:assigned",
            EventType::TaskBlocked => "task:blocked",
            EventType::TaskResumed => "task:resumed",
            EventType::PickBinCreated => "pickbin:created",
            EventType::PickBinClaimed => "pickbin:claimed",
            EventType::PackingStarted => "packing:started",
            EventType::PackingItemVerified => "packing:item_verified",
            EventType::PackingCompleted => "packing:completed",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = EventLogError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EventType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| EventLogError::UnknownEventType(s.to_string()))
    }
}

/// An immutable record of something that happened during fulfillment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FulfillmentEvent {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The order the event concerns, if any (receipts have none).
    pub order_id: Option<OrderId>,

    /// What happened.
    #[serde(rename = "type")]
    pub event_type: EventType,

    /// Event-specific data as JSON.
    pub payload: serde_json::Value,

    /// Groups the events produced by one logical operation.
    pub correlation_id: Option<CorrelationId>,

    /// The operator who triggered the operation, if any.
    pub user_id: Option<UserId>,

    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FulfillmentEvent {
    /// Creates a new event builder for the given event type.
    pub fn builder(event_type: EventType) -> FulfillmentEventBuilder {
        FulfillmentEventBuilder {
            event_type,
            event_id: None,
            order_id: None,
            payload: None,
            correlation_id: None,
            user_id: None,
            timestamp: None,
        }
    }
}

/// Builder for constructing fulfillment events.
#[derive(Debug)]
pub struct FulfillmentEventBuilder {
    event_type: EventType,
    event_id: Option<EventId>,
    order_id: Option<OrderId>,
    payload: Option<serde_json::Value>,
    correlation_id: Option<CorrelationId>,
    user_id: Option<UserId>,
    timestamp: Option<DateTime<Utc>>,
}

impl FulfillmentEventBuilder {
    /// Sets the event ID. If not set, a new ID will be generated.
    pub fn event_id(mut self, id: EventId) -> Self {
        self.event_id = Some(id);
        self
    }

    /// Sets the order the event concerns.
    pub fn order_id(mut self, order_id: OrderId) -> Self {
        self.order_id = Some(order_id);
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Sets the correlation id.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Sets the acting user, if known.
    pub fn user_id(mut self, user_id: Option<UserId>) -> Self {
        self.user_id = user_id;
        self
    }

    /// Sets the timestamp. If not set, the current time will be used.
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builds the event. A missing payload becomes an empty JSON object.
    pub fn build(self) -> FulfillmentEvent {
        FulfillmentEvent {
            id: self.event_id.unwrap_or_default(),
            order_id: self.order_id,
            event_type: self.event_type,
            payload: self
                .payload
                .unwrap_or_else(|| serde_json::Value::Object(Default::default())),
            correlation_id: self.correlation_id,
            user_id: self.user_id,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

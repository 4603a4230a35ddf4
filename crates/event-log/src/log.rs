use std::collections::HashSet;
use std::pin::Pin;

use async_trait::async_trait;
use common::OrderId;
use futures_core::Stream;

use crate::{EventLogError, EventQuery, EventType, FulfillmentEvent, Result};

/// A stream of events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<FulfillmentEvent>> + Send>>;

/// Core trait for event log implementations.
///
/// The log is append-only: events are never updated or deleted. All
/// implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends events to the log.
    ///
    /// Events are appended atomically - either all succeed or none do.
    /// Fails with `DuplicateEvent` if any event id is already present.
    async fn append(&self, events: Vec<FulfillmentEvent>) -> Result<()>;

    /// Retrieves all events for an order in log order.
    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<FulfillmentEvent>>;

    /// Retrieves events matching a query.
    async fn query_events(&self, query: EventQuery) -> Result<Vec<FulfillmentEvent>>;

    /// Retrieves events by type.
    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<FulfillmentEvent>>;

    /// Streams all events in the log, in insertion order.
    async fn stream_all_events(&self) -> Result<EventStream>;

    /// Returns the total number of events in the log.
    async fn event_count(&self) -> Result<u64>;
}

/// Extension trait providing convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Appends a single event to the log.
    async fn append_event(&self, event: FulfillmentEvent) -> Result<()> {
        self.append(vec![event]).await
    }

    /// Returns the most recent event of a type for an order, if any.
    async fn latest_for_order(
        &self,
        order_id: OrderId,
        event_type: EventType,
    ) -> Result<Option<FulfillmentEvent>> {
        let events = self
            .query_events(EventQuery::for_order(order_id).event_type(event_type))
            .await?;
        Ok(events.into_iter().last())
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}

/// Validates events before appending.
pub fn validate_events_for_append(events: &[FulfillmentEvent]) -> Result<()> {
    if events.is_empty() {
        return Err(EventLogError::InvalidAppend(
            "Cannot append empty event list".to_string(),
        ));
    }

    let mut seen = HashSet::with_capacity(events.len());
    for event in events {
        if !seen.insert(event.id) {
            return Err(EventLogError::DuplicateEvent(event.id));
        }
    }

    Ok(())
}

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::{
    EventLogError, EventQuery, EventType, FulfillmentEvent, Result,
    log::{EventLog, EventStream, validate_events_for_append},
};

/// In-memory event log implementation for tests and single-process runs.
///
/// Provides the same interface as the PostgreSQL implementation. Insertion
/// order is log order.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    events: Arc<RwLock<Vec<FulfillmentEvent>>>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event in log order.
    pub async fn all_events(&self) -> Vec<FulfillmentEvent> {
        self.events.read().await.clone()
    }

    /// Clears all events.
    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn append(&self, events: Vec<FulfillmentEvent>) -> Result<()> {
        validate_events_for_append(&events)?;

        let mut log = self.events.write().await;

        // Unique constraint simulation
        if let Some(dup) = events
            .iter()
            .find(|new| log.iter().any(|existing| existing.id == new.id))
        {
            return Err(EventLogError::DuplicateEvent(dup.id));
        }

        let appended = events.len() as u64;
        log.extend(events);
        metrics::counter!("event_log_appends_total").increment(appended);

        Ok(())
    }

    async fn events_for_order(&self, order_id: OrderId) -> Result<Vec<FulfillmentEvent>> {
        let log = self.events.read().await;
        Ok(log
            .iter()
            .filter(|e| e.order_id == Some(order_id))
            .cloned()
            .collect())
    }

    async fn query_events(&self, query: EventQuery) -> Result<Vec<FulfillmentEvent>> {
        let log = self.events.read().await;
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(usize::MAX);

        Ok(log
            .iter()
            .filter(|e| query.matches(e))
            .skip(offset)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn get_events_by_type(&self, event_type: EventType) -> Result<Vec<FulfillmentEvent>> {
        let log = self.events.read().await;
        Ok(log
            .iter()
            .filter(|e| e.event_type == event_type)
            .cloned()
            .collect())
    }

    async fn stream_all_events(&self) -> Result<EventStream> {
        use futures_util::stream;

        let events = self.events.read().await.clone();
        let stream = stream::iter(events.into_iter().map(Ok));
        Ok(Box::pin(stream))
    }

    async fn event_count(&self) -> Result<u64> {
        Ok(self.events.read().await.len() as u64)
    }
}

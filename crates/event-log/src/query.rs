use chrono::{DateTime, Utc};
use common::{CorrelationId, OrderId};

use crate::{EventType, FulfillmentEvent};

/// Builder for constructing event queries.
///
/// Allows filtering events by order, event type, correlation and time range.
/// Results are always returned in log order (oldest first).
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    /// Filter by order ID.
    pub order_id: Option<OrderId>,

    /// Filter by event types (any of these types).
    pub event_types: Option<Vec<EventType>>,

    /// Filter by correlation ID.
    pub correlation_id: Option<CorrelationId>,

    /// Filter by events after this timestamp (inclusive).
    pub from_timestamp: Option<DateTime<Utc>>,

    /// Filter by events before this timestamp (inclusive).
    pub to_timestamp: Option<DateTime<Utc>>,

    /// Maximum number of events to return.
    pub limit: Option<usize>,

    /// Number of events to skip.
    pub offset: Option<usize>,
}

impl EventQuery {
    /// Creates a new empty query.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query for a specific order.
    pub fn for_order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            ..Default::default()
        }
    }

    /// Creates a query for events of a specific type.
    pub fn for_event_type(event_type: EventType) -> Self {
        Self {
            event_types: Some(vec![event_type]),
            ..Default::default()
        }
    }

    /// Filters by order ID.
    pub fn order_id(mut self, id: OrderId) -> Self {
        self.order_id = Some(id);
        self
    }

    /// Filters by event type.
    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_types = Some(vec![event_type]);
        self
    }

    /// Filters by multiple event types (any of these).
    pub fn event_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

    /// Filters by correlation ID.
    pub fn correlation_id(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Filters events from this timestamp (inclusive).
    pub fn from_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.from_timestamp = Some(timestamp);
        self
    }

    /// Filters events up to this timestamp (inclusive).
    pub fn to_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.to_timestamp = Some(timestamp);
        self
    }

    /// Limits the number of results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Skips a number of results.
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Returns true if the event passes every filter of this query.
    ///
    /// Limit and offset are not part of matching.
    pub fn matches(&self, event: &FulfillmentEvent) -> bool {
        if let Some(id) = self.order_id
            && event.order_id != Some(id)
        {
            return false;
        }
        if let Some(ref types) = self.event_types
            && !types.contains(&event.event_type)
        {
            return false;
        }
        if let Some(correlation_id) = self.correlation_id
            && event.correlation_id != Some(correlation_id)
        {
            return false;
        }
        if let Some(from) = self.from_timestamp
            && event.timestamp < from
        {
            return false;
        }
        if let Some(to) = self.to_timestamp
            && event.timestamp > to
        {
            return false;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_query_matches_everything() {
        let event = FulfillmentEvent::builder(EventType::OrderPicked)
            .order_id(OrderId::new())
            .build();
        assert!(EventQuery::new().matches(&event));
    }

    #[test]
    fn order_filter_excludes_other_orders() {
        let order_id = OrderId::new();
        let mine = FulfillmentEvent::builder(EventType::OrderPicked)
            .order_id(order_id)
            .build();
        let other = FulfillmentEvent::builder(EventType::OrderPicked)
            .order_id(OrderId::new())
            .build();
        let orderless = FulfillmentEvent::builder(EventType::InventoryReceived).build();

        let query = EventQuery::for_order(order_id);
        assert!(query.matches(&mine));
        assert!(!query.matches(&other));
        assert!(!query.matches(&orderless));
    }

    #[test]
    fn type_filter_accepts_any_listed_type() {
        let query = EventQuery::new()
            .event_types(vec![EventType::OrderPacked, EventType::OrderShipped]);

        let packed = FulfillmentEvent::builder(EventType::OrderPacked).build();
        let picked = FulfillmentEvent::builder(EventType::OrderPicked).build();
        assert!(query.matches(&packed));
        assert!(!query.matches(&picked));
    }

    #[test]
    fn builder_chain_sets_paging() {
        let query = EventQuery::new().limit(10).offset(5);
        assert_eq!(query.limit, Some(10));
        assert_eq!(query.offset, Some(5));
    }
}

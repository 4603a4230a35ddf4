//! Real-time fan-out of committed events.
//!
//! Publishing is advisory: the persisted log is authoritative, so a failed
//! publish is logged and counted, never propagated.

use async_trait::async_trait;
use common::OrderId;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{EventType, FulfillmentEvent};

/// Errors a fan-out channel can report.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The channel has been shut down.
    #[error("Fan-out channel closed")]
    Closed,

    /// Transport-specific failure.
    #[error("Publish failed: {0}")]
    Transport(String),
}

/// Pushes committed events to real-time consumers.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event.
    async fn publish(&self, event: &FulfillmentEvent) -> Result<(), PublishError>;
}

/// Publishes every event, logging and swallowing failures.
///
/// Returns the number of events that failed to publish.
pub async fn publish_best_effort<P>(publisher: &P, events: &[FulfillmentEvent]) -> usize
where
    P: EventPublisher + ?Sized,
{
    let mut failures = 0;
    for event in events {
        if let Err(error) = publisher.publish(event).await {
            failures += 1;
            metrics::counter!("event_fanout_failures_total").increment(1);
            tracing::warn!(
                event_id = %event.id,
                event_type = %event.event_type,
                %error,
                "event fan-out failed; persisted log is unaffected"
            );
        }
    }
    failures
}

/// Publisher that drops every event. Used when no real-time consumers exist.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPublisher;

#[async_trait]
impl EventPublisher for NoopPublisher {
    async fn publish(&self, _event: &FulfillmentEvent) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Consumer-side filter: by order and/or by event type.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub order_id: Option<OrderId>,
    pub event_types: Option<Vec<EventType>>,
}

impl EventFilter {
    /// A filter that accepts every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Accepts only events for one order.
    pub fn order(order_id: OrderId) -> Self {
        Self {
            order_id: Some(order_id),
            event_types: None,
        }
    }

    /// Restricts the filter to the given event types.
    pub fn with_types(mut self, event_types: Vec<EventType>) -> Self {
        self.event_types = Some(event_types);
        self
    }

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
        true
    }
}

/// In-process pub/sub backed by a tokio broadcast channel.
///
/// Publishing with no live subscribers is not an error.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<FulfillmentEvent>,
}

impl BroadcastPublisher {
    /// Creates a publisher whose subscribers may lag by at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events matching the filter.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        Subscription {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    /// Returns the number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl EventPublisher for BroadcastPublisher {
    async fn publish(&self, event: &FulfillmentEvent) -> Result<(), PublishError> {
        // A send error only means nobody is listening right now.
        let _ = self.sender.send(event.clone());
        Ok(())
    }
}

/// A filtered stream of published events.
#[derive(Debug)]
pub struct Subscription {
    receiver: broadcast::Receiver<FulfillmentEvent>,
    filter: EventFilter,
}

impl Subscription {
    /// Waits for the next matching event.
    ///
    /// Returns `None` once the publisher is dropped. Events missed because the
    /// subscriber lagged are skipped; consumers re-read the log to catch up.
    pub async fn next(&mut self) -> Option<FulfillmentEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "subscriber lagged behind fan-out channel");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event if one is already buffered.
    pub fn try_next(&mut self) -> Option<FulfillmentEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

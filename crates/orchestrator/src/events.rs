//! Staging of fulfillment events inside a unit of work.

use common::{CorrelationId, OrderId, UserId};
use event_log::{EventType, FulfillmentEvent};
use serde_json::Value;
use store::EventStaging;

/// Stamps every event of one logical operation with the same correlation
/// id and acting user.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Emitter {
    correlation_id: CorrelationId,
    user_id: Option<UserId>,
}

impl Emitter {
    pub(crate) fn new(user_id: Option<UserId>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            user_id,
        }
    }

    pub(crate) fn emit<T>(&self, tx: &mut T, event_type: EventType, order_id: OrderId, payload: Value)
    where
        T: EventStaging + ?Sized,
    {
        let event = FulfillmentEvent::builder(event_type)
            .order_id(order_id)
            .correlation_id(self.correlation_id)
            .user_id(self.user_id)
            .payload_raw(payload)
            .build();
        tx.stage(event);
    }

    /// Stages an event that concerns no single order.
    pub(crate) fn emit_global<T>(&self, tx: &mut T, event_type: EventType, payload: Value)
    where
        T: EventStaging + ?Sized,
    {
        let event = FulfillmentEvent::builder(event_type)
            .correlation_id(self.correlation_id)
            .user_id(self.user_id)
            .payload_raw(payload)
            .build();
        tx.stage(event);
    }
}

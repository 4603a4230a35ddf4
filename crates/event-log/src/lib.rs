//! Append-only log of fulfillment events.
//!
//! The log is the system of record for "what happened" to an order. Every
//! orchestrator operation appends one or more [`FulfillmentEvent`]s and then
//! hands the same events to an [`EventPublisher`] for best-effort real-time
//! fan-out. Publish failures never affect the persisted log.

pub mod error;
pub mod event;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod publisher;
pub mod query;

pub use error::{EventLogError, Result};
pub use event::{EventId, EventType, FulfillmentEvent, FulfillmentEventBuilder};
pub use log::{EventLog, EventLogExt, EventStream};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use publisher::{
    BroadcastPublisher, EventFilter, EventPublisher, NoopPublisher, PublishError, Subscription,
    publish_best_effort,
};
pub use query::EventQuery;

//! HTTP shell for the fulfillment engine.
//!
//! Exposes job intake (`POST /jobs/{name}`), order placement and reads with
//! their audit trail, location and stock intake, health and Prometheus
//! metrics. Handlers only translate requests into orchestrator calls.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use event_log::{BroadcastPublisher, EventLog, InMemoryEventLog};
use metrics_exporter_prometheus::PrometheusHandle;
use orchestrator::FulfillmentEngine;
use store::InMemoryStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<L: EventLog + 'static> {
    pub engine: FulfillmentEngine<InMemoryStore<L>, BroadcastPublisher>,
    pub store: InMemoryStore<L>,
    pub publisher: BroadcastPublisher,
}

impl<L: EventLog + 'static> AppState<L> {
    /// Wires the orchestrators to a store backed by `log`.
    pub fn new(log: L, config: &Config) -> Self {
        let store = InMemoryStore::with_log(log);
        let publisher = BroadcastPublisher::new(config.event_channel_capacity);
        let engine = FulfillmentEngine::new(store.clone(), publisher.clone(), &config.engine());
        Self {
            engine,
            store,
            publisher,
        }
    }
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<L: EventLog + 'static>(
    state: Arc<AppState<L>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/jobs/{name}", post(routes::jobs::dispatch::<L>))
        .route("/locations", post(routes::locations::create::<L>))
        .route("/inventory/receipts", post(routes::inventory::receive::<L>))
        .route("/inventory/{id}/adjust", post(routes::inventory::adjust::<L>))
        .route(
            "/inventory/{id}/reclassify",
            post(routes::inventory::reclassify::<L>),
        )
        .route("/orders", post(routes::orders::create::<L>))
        .route("/orders/{id}", get(routes::orders::get::<L>))
        .route("/orders/{id}/events", get(routes::orders::events::<L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over an in-memory event log.
pub fn create_default_state(config: &Config) -> Arc<AppState<InMemoryEventLog>> {
    Arc::new(AppState::new(InMemoryEventLog::new(), config))
}

//! Fulfillment orchestration.
//!
//! Three orchestrators move an order through the warehouse:
//!
//! 1. [`AllocationOrchestrator`] reserves stock (or backorders the order)
//! 2. [`PickingOrchestrator`] walks the pick list and stages a pick bin
//! 3. [`PackingOrchestrator`] verifies, boxes and ships
//!
//! Each operation runs as one unit of work against a [`FulfillmentStore`]
//! and publishes the events it committed. [`JobDispatcher`] exposes the
//! allocation operations as named, deduplicated background jobs.

pub mod allocation;
pub mod error;
mod events;
pub mod jobs;
pub mod packing;
pub mod picking;

use std::sync::Arc;

use domain::PolicyConfig;
use event_log::EventPublisher;
use store::FulfillmentStore;

pub use allocation::{
    ALLOCATE_ORDER_SCOPE, AllocationOrchestrator, AllocationOutcome, BackorderCandidate,
    BatchAllocationReport, BatchFailure, Disposition, ReceiptOutcome, ReleaseOutcome, Shortage,
    UnitAdjustment,
};
pub use error::{OrchestratorError, Result};
pub use jobs::{
    AllocateOrderJob, AllocateOrdersJob, CheckBackorderedOrdersJob, Job, JobDispatcher,
    JobOutcome, ReleaseAllocationsJob,
};
pub use packing::{PackingOrchestrator, ScanVerification, Shipment};
pub use picking::{BinLookup, PickConfirmation, PickList, PickListLine, PickingOrchestrator};

/// Settings shared by the orchestrators.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub policy: PolicyConfig,
    /// Used by jobs that do not say whether partial allocation is allowed.
    pub allow_partial_default: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            policy: PolicyConfig::default(),
            allow_partial_default: true,
        }
    }
}

/// The orchestrators wired to one store and one publisher.
pub struct FulfillmentEngine<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    pub allocation: Arc<AllocationOrchestrator<S, P>>,
    pub picking: PickingOrchestrator<S, P>,
    pub packing: PackingOrchestrator<S, P>,
    pub jobs: JobDispatcher<S, P>,
}

impl<S, P> FulfillmentEngine<S, P>
where
    S: FulfillmentStore + Clone,
    P: EventPublisher + Clone,
{
    pub fn new(store: S, publisher: P, config: &EngineConfig) -> Self {
        let allocation = Arc::new(AllocationOrchestrator::new(
            store.clone(),
            publisher.clone(),
            &config.policy,
        ));
        Self {
            picking: PickingOrchestrator::new(store.clone(), publisher.clone()),
            packing: PackingOrchestrator::new(store.clone(), publisher),
            jobs: JobDispatcher::new(store, allocation.clone(), config.allow_partial_default),
            allocation,
        }
    }
}

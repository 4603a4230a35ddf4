//! Named background jobs and their dispatcher.
//!
//! A job runner delivers `(name, payload, key)` triples at least once. The
//! dispatcher decodes the payload, runs the matching orchestrator call and
//! records the result under the job key, so a redelivered job returns the
//! recorded result without running again. Allocation jobs also pass the key
//! down to `allocate_order`, where it is stored atomically with the
//! reservations.

use std::sync::Arc;

use common::{IdempotencyKey, OrderId, ProductVariantId, UserId};
use event_log::EventPublisher;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use store::{FulfillmentStore, IdempotencyRepository};

use crate::allocation::AllocationOrchestrator;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateOrderJob {
    pub order_id: OrderId,
    #[serde(default)]
    pub allow_partial: Option<bool>,
    /// Overrides the job key as the operation's idempotency key.
    #[serde(default)]
    pub idempotency_key: Option<IdempotencyKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AllocateOrdersJob {
    pub order_ids: Vec<OrderId>,
    #[serde(default)]
    pub allow_partial: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseAllocationsJob {
    pub order_id: OrderId,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckBackorderedOrdersJob {
    pub product_variant_id: ProductVariantId,
}

/// A decoded job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "name", content = "payload", rename_all = "camelCase")]
pub enum Job {
    AllocateOrder(AllocateOrderJob),
    AllocateOrders(AllocateOrdersJob),
    ReleaseAllocations(ReleaseAllocationsJob),
    CheckBackorderedOrders(CheckBackorderedOrdersJob),
}

impl Job {
    pub const NAMES: [&'static str; 4] = [
        "allocateOrder",
        "allocateOrders",
        "releaseAllocations",
        "checkBackorderedOrders",
    ];

    /// Decodes a job from its name and JSON payload.
    pub fn parse(name: &str, payload: Value) -> Result<Self> {
        if !Self::NAMES.contains(&name) {
            return Err(OrchestratorError::UnknownJob(name.to_string()));
        }
        serde_json::from_value(json!({ "name": name, "payload": payload })).map_err(|e| {
            OrchestratorError::InvalidPayload {
                job: name.to_string(),
                reason: e.to_string(),
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Job::AllocateOrder(_) => "allocateOrder",
            Job::AllocateOrders(_) => "allocateOrders",
            Job::ReleaseAllocations(_) => "releaseAllocations",
            Job::CheckBackorderedOrders(_) => "checkBackorderedOrders",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobOutcome {
    pub job: &'static str,
    /// The result was recorded by an earlier delivery of the same job.
    pub deduplicated: bool,
    pub result: Value,
}

/// Runs jobs against the allocation orchestrator.
pub struct JobDispatcher<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    store: S,
    allocation: Arc<AllocationOrchestrator<S, P>>,
    allow_partial_default: bool,
}

impl<S, P> JobDispatcher<S, P>
where
    S: FulfillmentStore,
    P: EventPublisher,
{
    pub fn new(
        store: S,
        allocation: Arc<AllocationOrchestrator<S, P>>,
        allow_partial_default: bool,
    ) -> Self {
        Self {
            store,
            allocation,
            allow_partial_default,
        }
    }

    #[tracing::instrument(skip(self, job), fields(job = job.name()))]
    pub async fn dispatch(
        &self,
        job: Job,
        job_key: Option<&IdempotencyKey>,
    ) -> Result<JobOutcome> {
        let name = job.name();
        metrics::counter!("jobs_dispatched_total", "job" => name).increment(1);
        let scope = format!("job:{name}");

        if let Some(key) = job_key
            && let Some(result) = self.store.read(|tx| tx.recorded(&scope, key)).await
        {
            metrics::counter!("jobs_deduplicated_total").increment(1);
            tracing::info!(%key, "job already ran; returning recorded result");
            return Ok(JobOutcome {
                job: name,
                deduplicated: true,
                result,
            });
        }

        let result = self.run(job, job_key).await?;

        if let Some(key) = job_key {
            let recorded = result.clone();
            self.store
                .transaction(|tx| -> Result<()> {
                    tx.record(&scope, key, recorded);
                    Ok(())
                })
                .await?;
        }
        Ok(JobOutcome {
            job: name,
            deduplicated: false,
            result,
        })
    }

    async fn run(&self, job: Job, job_key: Option<&IdempotencyKey>) -> Result<Value> {
        let allow_partial =
            |requested: Option<bool>| requested.unwrap_or(self.allow_partial_default);
        let value = match job {
            Job::AllocateOrder(job) => {
                let key = job.idempotency_key.or_else(|| job_key.cloned());
                let outcome = self
                    .allocation
                    .allocate_order(job.order_id, allow_partial(job.allow_partial), key.as_ref())
                    .await?;
                serde_json::to_value(outcome)?
            }
            Job::AllocateOrders(job) => {
                let report = self
                    .allocation
                    .allocate_orders(&job.order_ids, allow_partial(job.allow_partial), job_key)
                    .await;
                serde_json::to_value(report)?
            }
            Job::ReleaseAllocations(job) => {
                let outcome = self
                    .allocation
                    .release_allocations(job.order_id, job.reason, job.user_id)
                    .await?;
                serde_json::to_value(outcome)?
            }
            Job::CheckBackorderedOrders(job) => {
                let candidates = self
                    .allocation
                    .check_backordered_orders(job.product_variant_id)
                    .await;
                let order_ids: Vec<OrderId> = candidates.iter().map(|c| c.order_id).collect();
                let retry_key = job_key.map(|k| k.derive("retry"));
                let retried = self
                    .allocation
                    .allocate_orders(&order_ids, self.allow_partial_default, retry_key.as_ref())
                    .await;
                json!({ "candidates": candidates, "retried": retried })
            }
        };
        Ok(value)
    }
}

//! Allocation policy engine.
//!
//! A policy decides which units satisfy a demand. Policies are pure: they
//! order the candidate units and take `min(unit remaining, demand remaining)`
//! from each in turn. Committing the result is the caller's job.

use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    allocation::{Allocation, AllocationRequest, AvailableUnit},
    error::{DomainError, Result},
};

/// A strategy for choosing units to satisfy an allocation request.
pub trait AllocationPolicy: Send + Sync + Debug {
    /// Returns the policy name.
    fn name(&self) -> &'static str;

    /// Sorts candidate units into consumption order.
    fn order(&self, units: &mut [AvailableUnit]);

    /// Fully satisfies `request` from `available` or fails with
    /// `InsufficientInventory` carrying the allocatable amount.
    fn allocate(
        &self,
        request: &AllocationRequest,
        available: &[AvailableUnit],
    ) -> Result<Vec<Allocation>> {
        let mut units = available.to_vec();
        self.order(&mut units);
        take_greedily(request, &units)
    }
}

/// Greedy fill shared by every policy.
fn take_greedily(request: &AllocationRequest, units: &[AvailableUnit]) -> Result<Vec<Allocation>> {
    if request.quantity == 0 {
        return Err(DomainError::InvalidQuantity {
            quantity: request.quantity,
            reason: "allocation request must be positive",
        });
    }

    let allocatable: u32 = units
        .iter()
        .filter(|u| u.product_variant_id == request.product_variant_id)
        .map(|u| u.available)
        .fold(0, u32::saturating_add);
    if allocatable < request.quantity {
        return Err(DomainError::InsufficientInventory {
            product_variant_id: request.product_variant_id,
            requested: request.quantity,
            allocatable,
        });
    }

    let mut remaining = request.quantity;
    let mut allocations = Vec::new();
    for unit in units {
        if remaining == 0 {
            break;
        }
        if unit.product_variant_id != request.product_variant_id || unit.available == 0 {
            continue;
        }
        let take = unit.available.min(remaining);
        allocations.push(Allocation::new(request, unit, take));
        remaining -= take;
    }
    Ok(allocations)
}

/// First in, first out: oldest receipt first.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fifo;

impl AllocationPolicy for Fifo {
    fn name(&self) -> &'static str {
        "fifo"
    }

    fn order(&self, units: &mut [AvailableUnit]) {
        units.sort_by(|a, b| {
            a.received_at
                .cmp(&b.received_at)
                .then(a.unit_id.cmp(&b.unit_id))
        });
    }
}

/// First expired, first out. Units without an expiry date go last.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fefo;

impl AllocationPolicy for Fefo {
    fn name(&self) -> &'static str {
        "fefo"
    }

    fn order(&self, units: &mut [AvailableUnit]) {
        units.sort_by(|a, b| {
            let by_expiry = match (a.expiry_date, b.expiry_date) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            };
            by_expiry
                .then(a.received_at.cmp(&b.received_at))
                .then(a.unit_id.cmp(&b.unit_id))
        });
    }
}

/// Prefers units in preferred zones, ordering each partition with a delegate.
#[derive(Debug, Clone)]
pub struct ZonePriority {
    preferred: HashSet<String>,
    delegate: Arc<dyn AllocationPolicy>,
}

impl ZonePriority {
    /// Creates a zone-priority policy that falls back to FIFO.
    pub fn new(preferred: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self::with_delegate(preferred, Arc::new(Fifo))
    }

    pub fn with_delegate(
        preferred: impl IntoIterator<Item = impl Into<String>>,
        delegate: Arc<dyn AllocationPolicy>,
    ) -> Self {
        Self {
            preferred: preferred.into_iter().map(Into::into).collect(),
            delegate,
        }
    }

    fn in_preferred_zone(&self, unit: &AvailableUnit) -> bool {
        unit.zone
            .as_ref()
            .is_some_and(|zone| self.preferred.contains(zone))
    }
}

impl AllocationPolicy for ZonePriority {
    fn name(&self) -> &'static str {
        "zone"
    }

    fn order(&self, units: &mut [AvailableUnit]) {
        self.delegate.order(units);
        // Stable, so the delegate's order survives inside each partition
        units.sort_by_key(|u| !self.in_preferred_zone(u));
    }
}

/// Configured allocation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Fifo,
    Fefo,
    Zone,
}

impl std::str::FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(Strategy::Fifo),
            "fefo" => Ok(Strategy::Fefo),
            "zone" | "zone_priority" | "zone-priority" => Ok(Strategy::Zone),
            other => Err(format!("unknown allocation strategy: {other}")),
        }
    }
}

/// Policy selection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub strategy: Strategy,
    pub preferred_zones: Vec<String>,
    /// Switch to FEFO ordering when any candidate unit carries an expiry date.
    pub fefo_when_expiring: bool,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            strategy: Strategy::Fifo,
            preferred_zones: Vec::new(),
            fefo_when_expiring: true,
        }
    }
}

/// Picks the policy for a set of candidate units according to configuration.
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    primary: Arc<dyn AllocationPolicy>,
    expiring: Arc<dyn AllocationPolicy>,
    fefo_when_expiring: bool,
}

impl PolicyEngine {
    pub fn new(config: &PolicyConfig) -> Self {
        let (primary, expiring): (Arc<dyn AllocationPolicy>, Arc<dyn AllocationPolicy>) =
            match config.strategy {
                Strategy::Fifo => (Arc::new(Fifo), Arc::new(Fefo)),
                Strategy::Fefo => (Arc::new(Fefo), Arc::new(Fefo)),
                Strategy::Zone => (
                    Arc::new(ZonePriority::new(config.preferred_zones.clone())),
                    Arc::new(ZonePriority::with_delegate(
                        config.preferred_zones.clone(),
                        Arc::new(Fefo),
                    )),
                ),
            };
        Self {
            primary,
            expiring,
            fefo_when_expiring: config.fefo_when_expiring,
        }
    }

    /// Returns the policy that applies to these candidates.
    pub fn select(&self, available: &[AvailableUnit]) -> &dyn AllocationPolicy {
        if self.fefo_when_expiring && available.iter().any(|u| u.expiry_date.is_some()) {
            self.expiring.as_ref()
        } else {
            self.primary.as_ref()
        }
    }

    pub fn allocate(
        &self,
        request: &AllocationRequest,
        available: &[AvailableUnit],
    ) -> Result<Vec<Allocation>> {
        let policy = self.select(available);
        tracing::debug!(
            policy = policy.name(),
            variant = %request.product_variant_id,
            quantity = request.quantity,
            candidates = available.len(),
            "running allocation policy"
        );
        policy.allocate(request, available)
    }
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new(&PolicyConfig::default())
    }
}

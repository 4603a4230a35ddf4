//! Packages and the packing completion gate.

use chrono::{DateTime, Utc};
use common::{OrderId, PackageId, UserId, WorkTaskId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DomainError, Result},
    task::{TaskKind, WorkTask},
};

/// Outer box dimensions in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub length_mm: u32,
    pub width_mm: u32,
    pub height_mm: u32,
}

/// What a packer submits when closing a box.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageDetails {
    pub weight_grams: Option<u32>,
    pub dimensions: Option<Dimensions>,
    /// Object-storage references of packing photographs.
    #[serde(default)]
    pub images: Vec<String>,
}

impl PackageDetails {
    /// The evidence gate: a weight and at least one photograph.
    pub fn validate(&self) -> Result<u32> {
        let weight = match self.weight_grams {
            Some(w) if w > 0 => w,
            _ => return Err(DomainError::precondition("package weight is required")),
        };
        if self.images.is_empty() {
            return Err(DomainError::precondition(
                "at least one packing photograph is required",
            ));
        }
        Ok(weight)
    }
}

/// Checks a packing task may complete with these details.
///
/// The evidence gate is checked before verification, so missing evidence is
/// reported even for a fully verified task.
pub fn check_packing_gate(task: &WorkTask, details: &PackageDetails) -> Result<u32> {
    if task.kind != TaskKind::Packing {
        return Err(DomainError::precondition("not a packing task"));
    }
    let weight = details.validate()?;
    if !task.is_finished() {
        return Err(DomainError::precondition(
            "every item must be verified before packing completes",
        ));
    }
    Ok(weight)
}

/// A closed, shippable box.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: PackageId,
    pub order_id: OrderId,
    pub task_id: WorkTaskId,
    pub weight_grams: u32,
    pub dimensions: Option<Dimensions>,
    pub images: Vec<String>,
    pub packed_by: Option<UserId>,
    pub packed_at: DateTime<Utc>,
}

impl Package {
    /// Creates a package after the gate has passed.
    pub fn new(
        order_id: OrderId,
        task: &WorkTask,
        details: PackageDetails,
        packed_by: Option<UserId>,
    ) -> Result<Self> {
        let weight_grams = check_packing_gate(task, &details)?;
        Ok(Self {
            id: PackageId::new(),
            order_id,
            task_id: task.id,
            weight_grams,
            dimensions: details.dimensions,
            images: details.images,
            packed_by,
            packed_at: Utc::now(),
        })
    }
}

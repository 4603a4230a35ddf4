//! Pick bins: the hand-off between picking and packing.

use chrono::{DateTime, Utc};
use common::{OrderId, PickBinId, ProductVariantId, UserId, WorkTaskId};
use serde::{Deserialize, Serialize};

use crate::{
    error::{DomainError, Result},
    task::{TaskKind, TaskStatus, WorkTask},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BinStatus {
    #[default]
    Staged,
    Packing,
    Completed,
    Cancelled,
}

impl BinStatus {
    pub fn can_transition_to(&self, to: BinStatus) -> bool {
        use BinStatus::*;
        matches!(
            (self, to),
            (Staged, Packing | Cancelled) | (Packing, Completed | Cancelled)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinStatus::Staged => "STAGED",
            BinStatus::Packing => "PACKING",
            BinStatus::Completed => "COMPLETED",
            BinStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for BinStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Barcode printed on a bin label.
pub fn bin_barcode(bin_number: u64) -> String {
    format!("BIN-{bin_number:06}")
}

/// Picked quantity of one variant in a bin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinLine {
    pub product_variant_id: ProductVariantId,
    pub quantity: u32,
}

/// A staging container created once per completed picking task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickBin {
    pub id: PickBinId,
    pub bin_number: u64,
    pub barcode: String,
    pub order_id: OrderId,
    pub task_id: WorkTaskId,
    pub status: BinStatus,
    pub lines: Vec<BinLine>,
    pub claimed_by: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PickBin {
    /// Aggregates a completed picking task's items by variant.
    ///
    /// Lines keep the order in which each variant first appears; variants
    /// with nothing picked get no line.
    pub fn from_task(task: &WorkTask, order_id: OrderId, bin_number: u64) -> Result<Self> {
        if task.kind != TaskKind::Picking || task.status != TaskStatus::Completed {
            return Err(DomainError::precondition(
                "bins are created from completed picking tasks",
            ));
        }

        let mut lines: Vec<BinLine> = Vec::new();
        for item in task.items.iter().filter(|i| i.order_id == order_id) {
            if item.quantity_completed == 0 {
                continue;
            }
            match lines
                .iter_mut()
                .find(|l| l.product_variant_id == item.product_variant_id)
            {
                Some(line) => line.quantity += item.quantity_completed,
                None => lines.push(BinLine {
                    product_variant_id: item.product_variant_id,
                    quantity: item.quantity_completed,
                }),
            }
        }

        let now = Utc::now();
        Ok(Self {
            id: PickBinId::new(),
            bin_number,
            barcode: bin_barcode(bin_number),
            order_id,
            task_id: task.id,
            status: BinStatus::Staged,
            lines,
            claimed_by: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn total_quantity(&self) -> u32 {
        self.lines.iter().map(|l| l.quantity).fold(0, u32::saturating_add)
    }

    /// Claims a staged bin for a packing station.
    pub fn claim(&mut self, user_id: Option<UserId>) -> Result<()> {
        self.move_to(BinStatus::Packing)?;
        self.claimed_by = user_id;
        Ok(())
    }

    pub fn complete(&mut self) -> Result<()> {
        self.move_to(BinStatus::Completed)
    }

    pub fn cancel(&mut self) -> Result<()> {
        self.move_to(BinStatus::Cancelled)
    }

    fn move_to(&mut self, to: BinStatus) -> Result<()> {
        if !self.status.can_transition_to(to) {
            return Err(DomainError::transition("pick bin", self.status, to));
        }
        self.status = to;
        self.updated_at = Utc::now();
        Ok(())
    }
}

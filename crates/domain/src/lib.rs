//! Pure fulfillment domain.
//!
//! This crate provides the synchronous, I/O-free leaves of the engine:
//! - Inventory units and the ledger that tracks their reservations
//! - Allocation records and the allocation policy engine (FIFO, FEFO, zone priority)
//! - Order and work-task state machines
//! - Pick bins and the packing completion gate

pub mod allocation;
pub mod error;
pub mod inventory;
pub mod ledger;
pub mod location;
pub mod order;
pub mod packing;
pub mod pick_bin;
pub mod policy;
pub mod task;

pub use allocation::{Allocation, AllocationRequest, AllocationStatus, AvailableUnit};
pub use error::{DomainError, ErrorKind, Result};
pub use inventory::{InventoryUnit, UnitStatus};
pub use ledger::{ConservationViolation, InventoryLedger, verify_conservation};
pub use location::Location;
pub use order::{Order, OrderItem, OrderStatus};
pub use packing::{Dimensions, Package, PackageDetails, check_packing_gate};
pub use pick_bin::{BinLine, BinStatus, PickBin, bin_barcode};
pub use policy::{
    AllocationPolicy, Fefo, Fifo, PolicyConfig, PolicyEngine, Strategy, ZonePriority,
};
pub use task::{BlockReason, TaskItem, TaskItemStatus, TaskKind, TaskStatus, WorkTask};

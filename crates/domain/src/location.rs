use common::LocationId;
use serde::{Deserialize, Serialize};

/// A storage location on the warehouse floor.
///
/// `pick_sequence` orders locations along the walking path; lower is earlier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub code: String,
    pub zone: Option<String>,
    pub pick_sequence: u32,
}

impl Location {
    pub fn new(code: impl Into<String>, pick_sequence: u32) -> Self {
        Self {
            id: LocationId::new(),
            code: code.into(),
            zone: None,
            pick_sequence,
        }
    }

    pub fn in_zone(mut self, zone: impl Into<String>) -> Self {
        self.zone = Some(zone.into());
        self
    }
}

//! HTTP route handlers.

pub mod health;
pub mod inventory;
pub mod jobs;
pub mod locations;
pub mod metrics;
pub mod orders;

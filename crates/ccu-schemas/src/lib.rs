//! ccu-schemas
//!
//! Shared data model for the cell control unit:
//! - production steps and the per-order step chain
//! - order requests / order responses
//! - device telemetry (transporters and modules)
//! - the published stock snapshot
//!
//! Every type is serde-shaped the way it travels on the wire: camelCase
//! fields, upper-case enum variants. No logic beyond small accessors lives
//! here.

mod chain;
mod order;
mod step;
mod telemetry;

pub use chain::StepChain;
pub use order::*;
pub use step::*;
pub use telemetry::*;

/// Fresh opaque identifier for orders and steps.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

//! ccu-availability
//!
//! Availability derivation for transporters and modules.
//!
//! Rules are ordered and first-match-wins:
//! - transporter: fatal / paused / unknown position ⇒ BLOCKED;
//!   driving or waiting for load handling ⇒ BUSY;
//!   no action or action finished ⇒ READY; otherwise BUSY.
//! - module: fatal / paused ⇒ BLOCKED, then a per-station table for loads
//!   in progress, then the running action.
//!
//! Pure deterministic logic. No IO, no stored state; callers push the result
//! into the pairing registry. Position lookups go through [`ModuleLocator`].

mod engine;
mod types;

pub use engine::{derive_module, derive_transporter, is_road_node, last_module_serial};
pub use types::*;

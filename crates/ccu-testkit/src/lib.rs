//! ccu-testkit
//!
//! Scenario harness for the order engine: recording fakes for the outbound
//! seams and a fully paired one-of-each cell. Integration tests under
//! `tests/` exercise engine behavior end to end through it.

mod fakes;
mod harness;

pub use fakes::{Attempt, RecordingDispatcher, RecordingPublisher};
pub use harness::{
    idle_module, manufacture_step, step_id_where, transporter_at, CellHarness, AIQS, DPS, DRILL,
    FTS, HBW, MILL, MODULES, OVEN,
};

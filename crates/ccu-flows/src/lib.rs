//! ccu-flows
//!
//! Production flows and their compilation into step chains.
//!
//! - [`FlowTable`] is the catalogue of named flows (ordered station lists).
//!   It can be merged from a persisted JSON source; malformed entries are
//!   skipped and never clobber an existing flow.
//! - [`compile_production`] / [`compile_storage`] expand a flow into a
//!   [`ProductionDefinition`]: navigation and manufacture steps chained
//!   through `dependent_action_id`.
//!
//! Pure logic apart from id generation. No IO.

mod compiler;
mod table;

pub use compiler::{compile_production, compile_storage, station_command, ProductionDefinition};
pub use table::{FlowDefinition, FlowError, FlowTable, MergeReport};

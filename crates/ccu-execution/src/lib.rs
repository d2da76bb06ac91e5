//! ccu-execution
//!
//! Order execution engine for the cell.
//!
//! - Orders are compiled into step chains (`ccu-flows`), queued, and started
//!   once the warehouse can reserve their material or bay (`ccu-ledger`).
//! - Steps run strictly in chain order: a step is dispatched only after its
//!   predecessor FINISHED.
//! - Devices are chosen through the pairing registry, transporters through
//!   the router; commands leave through [`CommandDispatcher`].
//! - Telemetry flows back in through the engine, which derives availability
//!   (`ccu-availability`) and advances, retries, cancels or replans orders.
//!
//! Collaborators are traits so the daemon, the test harness and a future
//! device adapter can plug in their own. In-memory implementations of the
//! registry, the router and the node tracker ship here.

mod dispatch;
mod engine;
mod error;
mod pairing;
mod routing;

pub use dispatch::{
    CellCommand, CommandDispatcher, CommandMetadata, DispatchOutcome, NavigationRequest,
    ProcessRecord, ProductionCommand, StatePublisher,
};
pub use engine::{EngineConfig, EngineContext, OrderEngine};
pub use error::EngineError;
pub use pairing::{AvailabilityUpdate, DeviceKind, InMemoryPairing, PairedDevice, PairingRegistry};
pub use routing::{
    DirectRouter, InMemoryNodeOccupancy, NodeOccupancy, TransporterPath, TransporterRouter,
};

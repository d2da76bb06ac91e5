//! Outbound command contract.
//!
//! The engine never talks to a wire transport. Every command leaves through
//! [`CommandDispatcher`], and every dispatch reports a [`DispatchOutcome`] so
//! the retry decision is made at the call site.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use ccu_schemas::{
    Command, ModuleType, NavigationSource, OrderResponse, StockSnapshot, WorkpieceType,
};

/// Result of handing one command to the device side.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    /// Device side not ready (transporter busy, controller offline). The
    /// step goes back to ENQUEUED and is retried on the next pass.
    RetryLater { reason: String },
    /// Unrecoverable for this step. The step is marked ERROR.
    Fatal { reason: String },
}

impl DispatchOutcome {
    pub fn retry_later(reason: impl Into<String>) -> Self {
        Self::RetryLater {
            reason: reason.into(),
        }
    }

    pub fn fatal(reason: impl Into<String>) -> Self {
        Self::Fatal {
            reason: reason.into(),
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, Self::Dispatched)
    }
}

// ---------------------------------------------------------------------------
// Command payloads
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationRequest {
    pub order_id: String,
    pub step_id: String,
    pub transporter: String,
    pub source: NavigationSource,
    pub target: ModuleType,
    pub target_serial: String,
    /// Node ids from the transporter's position to the target.
    pub path: Vec<String>,
    pub workpiece_type: WorkpieceType,
}

/// One finished processing step, as reported to the output station.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub module_type: ModuleType,
    pub command: Command,
    pub finished_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandMetadata {
    /// Timed process; the module runs for `duration_secs`.
    #[serde(rename_all = "camelCase")]
    Timed {
        duration_secs: u64,
        workpiece_type: WorkpieceType,
        workpiece_id: Option<String>,
    },
    /// Input/output station: identity plus what happened to the workpiece.
    #[serde(rename_all = "camelCase")]
    Dps {
        workpiece_type: WorkpieceType,
        workpiece_id: Option<String>,
        history: Vec<ProcessRecord>,
    },
    #[serde(rename_all = "camelCase")]
    Generic {
        workpiece_type: WorkpieceType,
        workpiece_id: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductionCommand {
    pub order_id: String,
    pub step_id: String,
    pub module_serial: String,
    pub module_type: ModuleType,
    pub command: Command,
    pub metadata: CommandMetadata,
}

/// Every command the engine can emit, in one serializable shape.
///
/// Dispatcher implementations that forward to a bus or log use this; the
/// trait methods stay typed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CellCommand {
    Navigation(NavigationRequest),
    Production(ProductionCommand),
    #[serde(rename_all = "camelCase")]
    ClearModuleNode {
        transporter: String,
        module_serial: String,
    },
    #[serde(rename_all = "camelCase")]
    AnnounceDpsOutput {
        dps_serial: String,
        order_id: String,
        workpiece_type: WorkpieceType,
    },
    #[serde(rename_all = "camelCase")]
    DiscardWorkpiece { dps_serial: String },
}

// ---------------------------------------------------------------------------
// Seams
// ---------------------------------------------------------------------------

#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn send_navigation_request(&self, req: &NavigationRequest) -> DispatchOutcome;

    async fn send_production_command(&self, cmd: &ProductionCommand) -> DispatchOutcome;

    /// Move a parked transporter off a module node it is blocking.
    async fn send_clear_module_node(&self, transporter: &str, module_serial: &str)
        -> DispatchOutcome;

    /// Tell the output station a finished workpiece is on its way.
    async fn send_announce_dps_output(
        &self,
        dps_serial: &str,
        order_id: &str,
        workpiece_type: WorkpieceType,
    ) -> DispatchOutcome;

    /// Reject the workpiece waiting at the input station.
    async fn send_discard_workpiece(&self, dps_serial: &str) -> DispatchOutcome;
}

/// Retained state publication (orders, stock).
pub trait StatePublisher: Send + Sync {
    fn publish_orders(&self, active: &[OrderResponse], completed: &[OrderResponse]);

    fn publish_stock(&self, snapshot: &StockSnapshot);
}

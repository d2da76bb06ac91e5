//! Recording collaborators for the engine.
//!
//! Both fakes use `std::sync::Mutex`: the engine calls them from inside its
//! own lock and never holds them across an await.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use ccu_execution::{
    CellCommand, CommandDispatcher, DispatchOutcome, NavigationRequest, ProductionCommand,
    StatePublisher,
};
use ccu_schemas::{OrderResponse, StockSnapshot, WorkpieceType};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// One dispatch attempt and what the fake answered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attempt {
    pub command: CellCommand,
    pub outcome: DispatchOutcome,
}

/// Records every command. Answers `Dispatched` unless an outcome was
/// scripted for the next navigation or production command.
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    attempts: Mutex<Vec<Attempt>>,
    navigation_script: Mutex<VecDeque<DispatchOutcome>>,
    production_script: Mutex<VecDeque<DispatchOutcome>>,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_navigation(&self, outcome: DispatchOutcome) {
        lock(&self.navigation_script).push_back(outcome);
    }

    pub fn script_production(&self, outcome: DispatchOutcome) {
        lock(&self.production_script).push_back(outcome);
    }

    pub fn attempts(&self) -> Vec<Attempt> {
        lock(&self.attempts).clone()
    }

    /// Commands that were accepted.
    pub fn sent(&self) -> Vec<CellCommand> {
        lock(&self.attempts)
            .iter()
            .filter(|a| a.outcome.is_dispatched())
            .map(|a| a.command.clone())
            .collect()
    }

    pub fn navigations(&self) -> Vec<NavigationRequest> {
        self.sent()
            .into_iter()
            .filter_map(|c| match c {
                CellCommand::Navigation(n) => Some(n),
                _ => None,
            })
            .collect()
    }

    pub fn productions(&self) -> Vec<ProductionCommand> {
        self.sent()
            .into_iter()
            .filter_map(|c| match c {
                CellCommand::Production(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    fn record(
        &self,
        command: CellCommand,
        script: Option<&Mutex<VecDeque<DispatchOutcome>>>,
    ) -> DispatchOutcome {
        let outcome = script
            .and_then(|s| lock(s).pop_front())
            .unwrap_or(DispatchOutcome::Dispatched);
        lock(&self.attempts).push(Attempt {
            command,
            outcome: outcome.clone(),
        });
        outcome
    }
}

#[async_trait]
impl CommandDispatcher for RecordingDispatcher {
    async fn send_navigation_request(&self, req: &NavigationRequest) -> DispatchOutcome {
        self.record(CellCommand::Navigation(req.clone()), Some(&self.navigation_script))
    }

    async fn send_production_command(&self, cmd: &ProductionCommand) -> DispatchOutcome {
        self.record(CellCommand::Production(cmd.clone()), Some(&self.production_script))
    }

    async fn send_clear_module_node(
        &self,
        transporter: &str,
        module_serial: &str,
    ) -> DispatchOutcome {
        self.record(
            CellCommand::ClearModuleNode {
                transporter: transporter.to_string(),
                module_serial: module_serial.to_string(),
            },
            None,
        )
    }

    async fn send_announce_dps_output(
        &self,
        dps_serial: &str,
        order_id: &str,
        workpiece_type: WorkpieceType,
    ) -> DispatchOutcome {
        self.record(
            CellCommand::AnnounceDpsOutput {
                dps_serial: dps_serial.to_string(),
                order_id: order_id.to_string(),
                workpiece_type,
            },
            None,
        )
    }

    async fn send_discard_workpiece(&self, dps_serial: &str) -> DispatchOutcome {
        self.record(
            CellCommand::DiscardWorkpiece {
                dps_serial: dps_serial.to_string(),
            },
            None,
        )
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Every published active-order list, plus the latest of each kind.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    active_history: Mutex<Vec<Vec<OrderResponse>>>,
    completed: Mutex<Vec<OrderResponse>>,
    stock: Mutex<Vec<StockSnapshot>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_history(&self) -> Vec<Vec<OrderResponse>> {
        lock(&self.active_history).clone()
    }

    pub fn latest_completed(&self) -> Vec<OrderResponse> {
        lock(&self.completed).clone()
    }

    pub fn stock_publications(&self) -> usize {
        lock(&self.stock).len()
    }

    pub fn latest_stock(&self) -> Option<StockSnapshot> {
        lock(&self.stock).last().cloned()
    }
}

impl StatePublisher for RecordingPublisher {
    fn publish_orders(&self, active: &[OrderResponse], completed: &[OrderResponse]) {
        lock(&self.active_history).push(active.to_vec());
        *lock(&self.completed) = completed.to_vec();
    }

    fn publish_stock(&self, snapshot: &StockSnapshot) {
        lock(&self.stock).push(snapshot.clone());
    }
}

//! A small simulated cell around a real [`OrderEngine`].
//!
//! One module of each processing type, one warehouse, one input/output
//! station and one transporter, all paired and READY. Devices never move on
//! their own: tests drive progress by finishing steps explicitly, or with
//! [`CellHarness::report_running_step`], which answers the way real devices
//! report.

use std::sync::{Arc, Mutex, MutexGuard};

use ccu_execution::{
    DirectRouter, EngineConfig, EngineContext, InMemoryNodeOccupancy, InMemoryPairing, OrderEngine,
};
use ccu_flows::FlowTable;
use ccu_schemas::{
    ActionResult, ActionState, ActionStatus, Command, Load, ModuleState, ModuleType,
    OrderResponse, OrderType, StepKind, StepState, TransporterState, WorkpieceType,
};

use crate::{RecordingDispatcher, RecordingPublisher};

pub const HBW: &str = "HBW-1";
pub const DPS: &str = "DPS-1";
pub const MILL: &str = "MILL-1";
pub const DRILL: &str = "DRILL-1";
pub const AIQS: &str = "AIQS-1";
pub const OVEN: &str = "OVEN-1";
pub const FTS: &str = "FTS-1";

/// Modules paired in every harness cell.
pub const MODULES: [(&str, ModuleType); 6] = [
    (HBW, ModuleType::Hbw),
    (DPS, ModuleType::Dps),
    (MILL, ModuleType::Mill),
    (DRILL, ModuleType::Drill),
    (AIQS, ModuleType::Aiqs),
    (OVEN, ModuleType::Oven),
];

pub struct CellHarness {
    pub engine: OrderEngine,
    pub pairing: Arc<InMemoryPairing>,
    pub nodes: Arc<InMemoryNodeOccupancy>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub publisher: Arc<RecordingPublisher>,
    /// Bays the warehouse last reported, as (bay, type).
    warehouse: Mutex<Vec<(String, WorkpieceType)>>,
}

impl CellHarness {
    /// Paired cell with an empty warehouse and default flows.
    pub async fn new(cfg: EngineConfig) -> Self {
        let pairing = Arc::new(InMemoryPairing::new());
        let nodes = Arc::new(InMemoryNodeOccupancy::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let publisher = Arc::new(RecordingPublisher::new());

        for (serial, ty) in MODULES {
            pairing.register_module(serial, ty);
        }
        pairing.register_transporter(FTS);

        let ctx = EngineContext {
            pairing: pairing.clone(),
            router: Arc::new(DirectRouter::new(pairing.clone(), nodes.clone())),
            nodes: nodes.clone(),
            dispatcher: dispatcher.clone(),
            publisher: publisher.clone(),
        };
        let h = Self {
            engine: OrderEngine::new(cfg, FlowTable::with_defaults(), ctx),
            pairing,
            nodes,
            dispatcher,
            publisher,
            warehouse: Mutex::new(Vec::new()),
        };

        for (serial, ty) in MODULES {
            if ty != ModuleType::Hbw {
                h.engine.handle_module_state(&idle_module(serial)).await;
            }
        }
        h.stock_warehouse(&[]).await;
        h.engine
            .handle_transporter_state(&transporter_at(FTS, "1"))
            .await;
        h
    }

    /// Cell whose warehouse holds `n` workpieces of each color.
    pub async fn stocked(cfg: EngineConfig, n: usize) -> Self {
        let h = Self::new(cfg).await;
        let mut loads = Vec::new();
        for (col, ty) in WorkpieceType::ALL.iter().enumerate() {
            for row in 0..n {
                loads.push((format!("{}{}", (b'A' + col as u8) as char, row + 1), *ty));
            }
        }
        let loads: Vec<(&str, WorkpieceType)> =
            loads.iter().map(|(bay, ty)| (bay.as_str(), *ty)).collect();
        h.stock_warehouse(&loads).await;
        h
    }

    /// Report the warehouse with exactly these stored loads.
    pub async fn stock_warehouse(&self, loads: &[(&str, WorkpieceType)]) {
        *self.stored() = loads.iter().map(|(bay, ty)| (bay.to_string(), *ty)).collect();
        let state = ModuleState {
            loads: self.stored_loads(),
            ..idle_module(HBW)
        };
        self.engine.handle_module_state(&state).await;
    }

    fn stored(&self) -> MutexGuard<'_, Vec<(String, WorkpieceType)>> {
        self.warehouse.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn stored_loads(&self) -> Vec<Load> {
        self.stored()
            .iter()
            .map(|(bay, ty)| Load {
                load_type: Some(*ty),
                load_position: Some(bay.clone()),
                load_id: None,
            })
            .collect()
    }

    /// Bay contents after the warehouse ran `command` for an order of `ty`:
    /// DROP hands a stored piece out, PICK stores one in the first free bay.
    fn move_stock(&self, order_type: OrderType, command: Command, ty: WorkpieceType) {
        let mut stored = self.stored();
        match (order_type, command) {
            (OrderType::Production, Command::Drop) => {
                if let Some(i) = stored.iter().position(|(_, t)| *t == ty) {
                    stored.remove(i);
                }
            }
            (OrderType::Storage, Command::Pick) => {
                let bay = (1..)
                    .map(|n| format!("S{n}"))
                    .find(|b| stored.iter().all(|(held, _)| held != b))
                    .unwrap_or_default();
                stored.push((bay, ty));
            }
            _ => {}
        }
    }

    // --- driving steps -------------------------------------------------------

    pub async fn finish(&self, order_id: &str, step_id: &str) {
        self.engine
            .handle_action_update(order_id, step_id, ActionStatus::Finished, None)
            .await;
    }

    pub async fn finish_with(&self, order_id: &str, step_id: &str, result: ActionResult) {
        self.engine
            .handle_action_update(order_id, step_id, ActionStatus::Finished, Some(result))
            .await;
    }

    pub async fn fail(&self, order_id: &str, step_id: &str) {
        self.engine
            .handle_action_update(order_id, step_id, ActionStatus::Failed, None)
            .await;
    }

    /// Finish every IN_PROGRESS step of every active order, one at a time,
    /// until nothing runs any more. Returns the number of steps finished.
    pub async fn run_until_idle(&self) -> usize {
        let mut finished = 0;
        // Bounded: a flow has a few dozen steps at most.
        for _ in 0..500 {
            let next = self.engine.active_orders().await.into_iter().find_map(|o| {
                o.production_steps
                    .iter()
                    .find(|s| s.state == StepState::InProgress)
                    .map(|s| (o.order_id.clone(), s.id.clone()))
            });
            let Some((order_id, step_id)) = next else {
                break;
            };
            self.finish(&order_id, &step_id).await;
            finished += 1;
        }
        finished
    }

    /// Finish IN_PROGRESS steps until `step_id` of `order_id` is running.
    pub async fn run_until_running(&self, order_id: &str, step_id: &str) -> bool {
        for _ in 0..500 {
            let Some(order) = self.engine.order(order_id).await else {
                return false;
            };
            let Some(step) = order.production_steps.get(step_id) else {
                return false;
            };
            if step.state == StepState::InProgress {
                return true;
            }
            let running = order
                .production_steps
                .iter()
                .find(|s| s.state == StepState::InProgress)
                .map(|s| s.id.clone());
            match running {
                Some(id) => self.finish(order_id, &id).await,
                None => return false,
            }
        }
        false
    }

    /// Report the running step of `order_id` done, through telemetry only.
    ///
    /// - navigation: the transporter drives off carrying the order id, then
    ///   stands at the target module with the action FINISHED. It keeps that
    ///   order id in later reports, as real transporters do.
    /// - manufacture: the module reports the action RUNNING (BUSY), then
    ///   FINISHED. Stations hold the workpiece until they DROP it; the
    ///   warehouse reports its bays with the piece handed out or stored.
    ///
    /// Returns `false` when the order has no running step.
    pub async fn report_running_step(&self, order_id: &str) -> bool {
        let Some(order) = self.engine.order(order_id).await else {
            return false;
        };
        let Some(step) = order
            .production_steps
            .iter()
            .find(|s| s.state == StepState::InProgress)
            .cloned()
        else {
            return false;
        };
        let ty = order.workpiece_type;

        match &step.kind {
            StepKind::Navigation(_) => {
                let sent = self
                    .dispatcher
                    .navigations()
                    .into_iter()
                    .rev()
                    .find(|n| n.step_id == step.id);
                let Some(nav) = sent else {
                    return false;
                };
                let from = self.pairing.device(&nav.transporter).and_then(|d| d.last_node_id);
                let driving = TransporterState {
                    serial_number: nav.transporter.clone(),
                    order_id: Some(order_id.to_string()),
                    last_node_id: from,
                    driving: true,
                    action_state: Some(action(&step.id, Command::Dock, ActionStatus::Running)),
                    ..Default::default()
                };
                self.engine.handle_transporter_state(&driving).await;
                let arrived = TransporterState {
                    last_node_id: Some(nav.target_serial.clone()),
                    driving: false,
                    action_state: Some(action(&step.id, Command::Dock, ActionStatus::Finished)),
                    ..driving
                };
                self.engine.handle_transporter_state(&arrived).await;
            }
            StepKind::Manufacture(m) => {
                let Some(serial) = m.serial_number.clone() else {
                    return false;
                };
                let report = |state: ActionStatus, loads: Vec<Load>| ModuleState {
                    serial_number: serial.clone(),
                    order_id: Some(order_id.to_string()),
                    action_state: Some(action(&step.id, m.command, state)),
                    loads,
                    ..Default::default()
                };
                if m.module_type == ModuleType::Hbw {
                    let running = report(ActionStatus::Running, self.stored_loads());
                    self.engine.handle_module_state(&running).await;
                    self.move_stock(order.order_type, m.command, ty);
                    let finished = report(ActionStatus::Finished, self.stored_loads());
                    self.engine.handle_module_state(&finished).await;
                } else {
                    let held = vec![work_in_progress(ty)];
                    let running = report(ActionStatus::Running, held.clone());
                    self.engine.handle_module_state(&running).await;
                    let after = if m.command == Command::Drop { Vec::new() } else { held };
                    let finished = report(ActionStatus::Finished, after);
                    self.engine.handle_module_state(&finished).await;
                }
            }
        }
        true
    }

    /// [`report_running_step`](Self::report_running_step) until the order
    /// has nothing running. Returns the number of steps reported.
    pub async fn report_until_idle(&self, order_id: &str) -> usize {
        let mut reported = 0;
        for _ in 0..500 {
            if !self.report_running_step(order_id).await {
                break;
            }
            reported += 1;
        }
        reported
    }

    pub async fn order(&self, order_id: &str) -> OrderResponse {
        match self.engine.order(order_id).await {
            Some(o) => o,
            None => panic!("order {order_id} unknown to the engine"),
        }
    }
}

/// A module report with no load and no action: READY for anyone.
pub fn idle_module(serial: &str) -> ModuleState {
    ModuleState {
        serial_number: serial.to_string(),
        ..Default::default()
    }
}

fn action(step_id: &str, command: Command, state: ActionStatus) -> ActionState {
    ActionState {
        id: step_id.to_string(),
        command,
        state,
        timestamp: None,
        result: None,
    }
}

/// A workpiece being handled at a station: no stored position.
fn work_in_progress(ty: WorkpieceType) -> Load {
    Load {
        load_type: Some(ty),
        load_position: None,
        load_id: None,
    }
}

/// A standing, idle transporter at `node`.
pub fn transporter_at(serial: &str, node: &str) -> TransporterState {
    TransporterState {
        serial_number: serial.to_string(),
        last_node_id: Some(node.to_string()),
        ..Default::default()
    }
}

/// First step of `order` matching `pred`, by id.
pub fn step_id_where(
    order: &OrderResponse,
    pred: impl Fn(&ccu_schemas::Step) -> bool,
) -> Option<String> {
    order
        .production_steps
        .iter()
        .find(|s| pred(*s))
        .map(|s| s.id.clone())
}

/// Id of the manufacture step running `command` at `module_type`.
pub fn manufacture_step(
    order: &OrderResponse,
    module_type: ModuleType,
    command: ccu_schemas::Command,
) -> Option<String> {
    step_id_where(order, |s| {
        s.as_manufacture()
            .map(|m| m.module_type == module_type && m.command == command)
            .unwrap_or(false)
    })
}

//! Shared runtime state for ccu-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The engine is the only
//! owner of order state; the daemon keeps retained copies of what the engine
//! last published (watch channels) and fans commands out to device adapters
//! (broadcast channel).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use ccu_config::CellConfig;
use ccu_execution::{
    CellCommand, CommandDispatcher, DirectRouter, DispatchOutcome, EngineConfig, EngineContext,
    InMemoryNodeOccupancy, InMemoryPairing, NavigationRequest, OrderEngine, ProductionCommand,
    StatePublisher,
};
use ccu_flows::FlowTable;
use ccu_schemas::{OrderResponse, StockSnapshot, WorkpieceType};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// BusMsg: SSE event bus payload
// ---------------------------------------------------------------------------

/// Messages broadcast over the internal event bus and surfaced as SSE events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMsg {
    Heartbeat { ts_millis: i64 },
    /// A command handed to the device side.
    Command(CellCommand),
    OrdersChanged { active: usize, completed: usize },
    StockChanged { ts_millis: i64 },
    LogLine { level: String, msg: String },
}

impl BusMsg {
    pub fn event_name(&self) -> &'static str {
        match self {
            BusMsg::Heartbeat { .. } => "heartbeat",
            BusMsg::Command(_) => "command",
            BusMsg::OrdersChanged { .. } => "orders",
            BusMsg::StockChanged { .. } => "stock",
            BusMsg::LogLine { .. } => "log",
        }
    }
}

/// Static build metadata included in health responses.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Active and completed orders as last published by the engine.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OrdersView {
    pub active: Vec<OrderResponse>,
    pub completed: Vec<OrderResponse>,
}

// ---------------------------------------------------------------------------
// Outbound seams
// ---------------------------------------------------------------------------

/// Hands commands to whoever subscribed to the command channel.
///
/// No subscriber means no device adapter is attached: the engine is told to
/// retry later and the step stays ENQUEUED.
pub struct BusDispatcher {
    commands: broadcast::Sender<CellCommand>,
    bus: broadcast::Sender<BusMsg>,
}

impl BusDispatcher {
    pub fn new(commands: broadcast::Sender<CellCommand>, bus: broadcast::Sender<BusMsg>) -> Self {
        Self { commands, bus }
    }

    fn send(&self, cmd: CellCommand) -> DispatchOutcome {
        match self.commands.send(cmd.clone()) {
            Ok(adapters) => {
                debug!(adapters, "command broadcast");
                let _ = self.bus.send(BusMsg::Command(cmd));
                DispatchOutcome::Dispatched
            }
            Err(_) => DispatchOutcome::retry_later("no device adapter subscribed"),
        }
    }
}

#[async_trait]
impl CommandDispatcher for BusDispatcher {
    async fn send_navigation_request(&self, req: &NavigationRequest) -> DispatchOutcome {
        self.send(CellCommand::Navigation(req.clone()))
    }

    async fn send_production_command(&self, cmd: &ProductionCommand) -> DispatchOutcome {
        self.send(CellCommand::Production(cmd.clone()))
    }

    async fn send_clear_module_node(
        &self,
        transporter: &str,
        module_serial: &str,
    ) -> DispatchOutcome {
        self.send(CellCommand::ClearModuleNode {
            transporter: transporter.to_string(),
            module_serial: module_serial.to_string(),
        })
    }

    async fn send_announce_dps_output(
        &self,
        dps_serial: &str,
        order_id: &str,
        workpiece_type: WorkpieceType,
    ) -> DispatchOutcome {
        self.send(CellCommand::AnnounceDpsOutput {
            dps_serial: dps_serial.to_string(),
            order_id: order_id.to_string(),
            workpiece_type,
        })
    }

    async fn send_discard_workpiece(&self, dps_serial: &str) -> DispatchOutcome {
        self.send(CellCommand::DiscardWorkpiece {
            dps_serial: dps_serial.to_string(),
        })
    }
}

/// Retained publication: a late reader sees the latest value.
pub struct WatchPublisher {
    orders: watch::Sender<OrdersView>,
    stock: watch::Sender<Option<StockSnapshot>>,
    bus: broadcast::Sender<BusMsg>,
}

impl StatePublisher for WatchPublisher {
    fn publish_orders(&self, active: &[OrderResponse], completed: &[OrderResponse]) {
        self.orders.send_replace(OrdersView {
            active: active.to_vec(),
            completed: completed.to_vec(),
        });
        let _ = self.bus.send(BusMsg::OrdersChanged {
            active: active.len(),
            completed: completed.len(),
        });
    }

    fn publish_stock(&self, snapshot: &StockSnapshot) {
        self.stock.send_replace(Some(snapshot.clone()));
        let _ = self.bus.send(BusMsg::StockChanged {
            ts_millis: snapshot.ts.timestamp_millis(),
        });
    }
}

// ---------------------------------------------------------------------------
// AppState
// ---------------------------------------------------------------------------

pub struct AppState {
    /// Broadcast bus for SSE.
    pub bus: broadcast::Sender<BusMsg>,
    /// Command channel device adapters subscribe to.
    pub commands: broadcast::Sender<CellCommand>,
    pub build: BuildInfo,
    pub config_hash: Option<String>,
    pub engine: Arc<OrderEngine>,
    pub pairing: Arc<InMemoryPairing>,
    pub orders: watch::Receiver<OrdersView>,
    pub stock: watch::Receiver<Option<StockSnapshot>>,
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

impl AppState {
    /// Stock flows, default tunables, nothing paired.
    pub fn new() -> Self {
        Self::assemble(EngineConfig::default(), FlowTable::with_defaults(), None)
    }

    /// State for a loaded configuration: engine tunables, flows, and the
    /// devices listed under `pairing`.
    pub fn from_config(cfg: &CellConfig, config_hash: Option<String>) -> Result<Self> {
        let (flows, report) = cfg.flow_table()?;
        for name in &report.skipped {
            warn!(flow = %name, "configured flow skipped: malformed");
        }
        let st = Self::assemble(cfg.engine_config(), flows, config_hash);
        for (serial, module_type) in &cfg.pairing.modules {
            st.pairing.register_module(serial, *module_type);
        }
        for serial in &cfg.pairing.transporters {
            st.pairing.register_transporter(serial);
        }
        info!(
            modules = cfg.pairing.modules.len(),
            transporters = cfg.pairing.transporters.len(),
            "devices paired from config"
        );
        Ok(st)
    }

    fn assemble(engine_cfg: EngineConfig, flows: FlowTable, config_hash: Option<String>) -> Self {
        let (bus, _rx) = broadcast::channel::<BusMsg>(1024);
        let (commands, _rx) = broadcast::channel::<CellCommand>(256);
        let (orders_tx, orders) = watch::channel(OrdersView::default());
        let (stock_tx, stock) = watch::channel(None);

        let pairing = Arc::new(InMemoryPairing::new());
        let nodes = Arc::new(InMemoryNodeOccupancy::new());
        let ctx = EngineContext {
            pairing: pairing.clone(),
            router: Arc::new(DirectRouter::new(pairing.clone(), nodes.clone())),
            nodes,
            dispatcher: Arc::new(BusDispatcher::new(commands.clone(), bus.clone())),
            publisher: Arc::new(WatchPublisher {
                orders: orders_tx,
                stock: stock_tx,
                bus: bus.clone(),
            }),
        };

        Self {
            bus,
            commands,
            build: BuildInfo {
                service: "ccu-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
            config_hash,
            engine: Arc::new(OrderEngine::new(engine_cfg, flows, ctx)),
            pairing,
            orders,
            stock,
        }
    }
}

// ---------------------------------------------------------------------------
// Background tasks
// ---------------------------------------------------------------------------

/// Spawn a background task that emits a heartbeat SSE every `interval`.
pub fn spawn_heartbeat(bus: broadcast::Sender<BusMsg>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let ts = chrono::Utc::now().timestamp_millis();
            let _ = bus.send(BusMsg::Heartbeat { ts_millis: ts });
        }
    });
}

/// Spawn a background task that re-runs the engine's dispatch loops every
/// `interval`, so steps deferred with RetryLater go out once an adapter
/// attaches even when no telemetry arrives.
pub fn spawn_engine_tick(engine: Arc<OrderEngine>, interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            engine.tick().await;
        }
    });
}

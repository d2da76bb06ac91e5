//! Order execution engine.
//!
//! [`OrderEngine`] is the public face: every operation takes the engine lock,
//! runs to completion (dispatch awaits included) and publishes whatever
//! changed. Holding one lock across the awaits is what makes each
//! "is the step still ENQUEUED, then mark IN_PROGRESS" decision atomic with
//! respect to interleaved telemetry.
//!
//! Layout:
//! - `orders`   : queue, lifecycle, action-update reaction
//! - `scheduler`: ready queues, dispatch loops, drop lookahead
//! - `telemetry`: device reports → availability, stock, action updates

mod orders;
mod scheduler;
mod telemetry;

use std::collections::BTreeMap;
use std::sync::Arc;

use ccu_flows::{FlowError, FlowTable, MergeReport, ProductionDefinition};
use ccu_ledger::ReservationLedger;
use ccu_schemas::{
    ActionResult, ActionStatus, ModuleState, ModuleType, OrderRequest, OrderResponse,
    StockSnapshot, TransporterState, WorkpieceType,
};
use tokio::sync::Mutex;

use crate::{
    CommandDispatcher, EngineError, NodeOccupancy, PairingRegistry, StatePublisher,
    TransporterRouter,
};

use orders::EngineCore;

/// Tunables. See `ccu-config` for how they are loaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineConfig {
    /// PRODUCTION orders allowed in progress at once. STORAGE orders are exempt.
    pub max_parallel_production_orders: usize,
    /// Seconds a timed process runs, per station type.
    pub process_durations: BTreeMap<ModuleType, u64>,
    /// Bay capacity applied to a warehouse the first time it reports.
    pub default_bays: BTreeMap<WorkpieceType, u32>,
    /// Completed orders kept for publication; oldest are dropped first.
    pub completed_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_production_orders: 1,
            process_durations: BTreeMap::new(),
            default_bays: WorkpieceType::ALL.iter().map(|t| (*t, 3)).collect(),
            completed_history: 100,
        }
    }
}

/// Collaborators the engine schedules through. Built once at process start.
#[derive(Clone)]
pub struct EngineContext {
    pub pairing: Arc<dyn PairingRegistry>,
    pub router: Arc<dyn TransporterRouter>,
    pub nodes: Arc<dyn NodeOccupancy>,
    pub dispatcher: Arc<dyn CommandDispatcher>,
    pub publisher: Arc<dyn StatePublisher>,
}

pub struct OrderEngine {
    ctx: EngineContext,
    core: Mutex<EngineCore>,
}

impl OrderEngine {
    pub fn new(cfg: EngineConfig, flows: FlowTable, ctx: EngineContext) -> Self {
        Self {
            ctx,
            core: Mutex::new(EngineCore::new(cfg, flows)),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.ctx
    }

    // --- orders ----------------------------------------------------------

    /// Compile the request's flow (or the storage route) and submit it.
    pub async fn request_order(&self, req: OrderRequest) -> Result<OrderResponse, EngineError> {
        let mut core = self.core.lock().await;
        let res = core.request_order(&self.ctx, req).await;
        core.settle(&self.ctx).await;
        res
    }

    /// Submit a precompiled definition.
    pub async fn submit_order(
        &self,
        req: OrderRequest,
        def: ProductionDefinition,
    ) -> Result<OrderResponse, EngineError> {
        let mut core = self.core.lock().await;
        let res = core.submit_order(&self.ctx, req, def).await;
        core.settle(&self.ctx).await;
        res
    }

    /// Cancel queued orders. Returns the ids actually cancelled; orders
    /// already in progress are left alone.
    pub async fn cancel_orders(&self, ids: &[String]) -> Vec<String> {
        let mut core = self.core.lock().await;
        let cancelled = core.cancel_orders(ids);
        core.settle(&self.ctx).await;
        cancelled
    }

    /// Force-cancel an active order whatever its step states.
    pub async fn reset_order(&self, order_id: &str) -> Result<(), EngineError> {
        let mut core = self.core.lock().await;
        let res = core.reset_order(&self.ctx, order_id);
        core.settle(&self.ctx).await;
        res
    }

    /// React to a step completion report.
    pub async fn handle_action_update(
        &self,
        order_id: &str,
        action_id: &str,
        state: ActionStatus,
        result: Option<ActionResult>,
    ) {
        let mut core = self.core.lock().await;
        core.handle_action_update(&self.ctx, order_id, action_id, state, result)
            .await;
        core.settle(&self.ctx).await;
    }

    /// Re-run both dispatch loops. Useful after external changes the engine
    /// cannot see (a device paired, a path freed).
    pub async fn tick(&self) {
        let mut core = self.core.lock().await;
        core.settle(&self.ctx).await;
    }

    // --- telemetry -------------------------------------------------------

    pub async fn handle_transporter_state(&self, state: &TransporterState) {
        let mut core = self.core.lock().await;
        core.handle_transporter_state(&self.ctx, state).await;
        core.settle(&self.ctx).await;
    }

    pub async fn handle_module_state(&self, state: &ModuleState) {
        let mut core = self.core.lock().await;
        core.handle_module_state(&self.ctx, state).await;
        core.settle(&self.ctx).await;
    }

    // --- flows -----------------------------------------------------------

    pub async fn reload_flows(&self, source: &serde_json::Value) -> Result<MergeReport, FlowError> {
        let mut core = self.core.lock().await;
        core.flows.merge_json(source)
    }

    pub async fn flows(&self) -> FlowTable {
        self.core.lock().await.flows.clone()
    }

    // --- views -----------------------------------------------------------

    pub async fn queued_orders(&self) -> Vec<OrderResponse> {
        self.core.lock().await.queue.iter().cloned().collect()
    }

    pub async fn active_orders(&self) -> Vec<OrderResponse> {
        self.core.lock().await.active.clone()
    }

    pub async fn completed_orders(&self) -> Vec<OrderResponse> {
        self.core.lock().await.completed.iter().cloned().collect()
    }

    /// Any order the engine knows, wherever it sits.
    pub async fn order(&self, order_id: &str) -> Option<OrderResponse> {
        self.core.lock().await.find_any(order_id).cloned()
    }

    pub async fn stock(&self) -> StockSnapshot {
        self.core.lock().await.ledger.snapshot(chrono::Utc::now())
    }

    /// Read access to the ledger, for inspection.
    pub async fn with_ledger<R>(&self, f: impl FnOnce(&ReservationLedger) -> R) -> R {
        let core = self.core.lock().await;
        f(&core.ledger)
    }
}

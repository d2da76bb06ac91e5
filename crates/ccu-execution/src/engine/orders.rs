use std::collections::VecDeque;

use ccu_flows::{compile_storage, FlowTable, ProductionDefinition};
use ccu_ledger::ReservationLedger;
use ccu_schemas::{
    ActionResult, ActionStatus, Command, ModuleType, OrderRequest, OrderResponse, OrderType,
    StepKind, StepState,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::{EngineConfig, EngineContext};
use crate::{DispatchOutcome, EngineError};

/// One schedulable step, by id. The step itself stays in its order's chain.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) struct ReadyEntry {
    pub order_id: String,
    pub step_id: String,
}

impl ReadyEntry {
    pub(super) fn new(order_id: &str, step_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            step_id: step_id.to_string(),
        }
    }
}

/// Everything the engine owns. Only ever touched under the engine lock.
pub(super) struct EngineCore {
    pub(super) cfg: EngineConfig,
    pub(super) flows: FlowTable,
    pub(super) ledger: ReservationLedger,
    /// Accepted, not yet started. FIFO.
    pub(super) queue: VecDeque<OrderResponse>,
    pub(super) active: Vec<OrderResponse>,
    pub(super) completed: VecDeque<OrderResponse>,
    pub(super) nav_ready: Vec<ReadyEntry>,
    pub(super) mfg_ready: Vec<ReadyEntry>,
    orders_dirty: bool,
    stock_dirty: bool,
}

impl EngineCore {
    pub(super) fn new(cfg: EngineConfig, flows: FlowTable) -> Self {
        Self {
            cfg,
            flows,
            ledger: ReservationLedger::new(),
            queue: VecDeque::new(),
            active: Vec::new(),
            completed: VecDeque::new(),
            nav_ready: Vec::new(),
            mfg_ready: Vec::new(),
            orders_dirty: false,
            stock_dirty: false,
        }
    }

    pub(super) fn mark_orders(&mut self) {
        self.orders_dirty = true;
    }

    pub(super) fn mark_stock(&mut self) {
        self.stock_dirty = true;
    }

    pub(super) fn active_index(&self, order_id: &str) -> Option<usize> {
        self.active.iter().position(|o| o.order_id == order_id)
    }

    pub(super) fn find_any(&self, order_id: &str) -> Option<&OrderResponse> {
        self.queue
            .iter()
            .chain(self.active.iter())
            .chain(self.completed.iter())
            .find(|o| o.order_id == order_id)
    }

    fn production_in_progress(&self) -> usize {
        self.active
            .iter()
            .filter(|o| o.order_type == OrderType::Production && o.state == StepState::InProgress)
            .count()
    }

    fn archive(&mut self, order: OrderResponse) {
        self.completed.push_back(order);
        while self.completed.len() > self.cfg.completed_history {
            self.completed.pop_front();
        }
        self.mark_orders();
    }

    pub(super) fn purge_ready(&mut self, order_id: &str) {
        self.nav_ready.retain(|e| e.order_id != order_id);
        self.mfg_ready.retain(|e| e.order_id != order_id);
    }

    /// Run both dispatch loops, then publish whatever changed.
    pub(super) async fn settle(&mut self, ctx: &EngineContext) {
        self.trigger_navigation_steps(ctx).await;
        self.trigger_manufacture_steps(ctx).await;

        if std::mem::take(&mut self.orders_dirty) {
            let completed = self.completed.make_contiguous();
            ctx.publisher.publish_orders(&self.active, completed);
        }
        if std::mem::take(&mut self.stock_dirty) {
            ctx.publisher.publish_stock(&self.ledger.snapshot(Utc::now()));
        }
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    pub(super) async fn request_order(
        &mut self,
        ctx: &EngineContext,
        req: OrderRequest,
    ) -> Result<OrderResponse, EngineError> {
        let def = match req.order_type {
            OrderType::Production => self
                .flows
                .compile(&req.flow_name(), req.dependent_action_id.clone())?,
            OrderType::Storage => compile_storage(),
        };
        self.submit_order(ctx, req, def).await
    }

    pub(super) async fn submit_order(
        &mut self,
        ctx: &EngineContext,
        req: OrderRequest,
        def: ProductionDefinition,
    ) -> Result<OrderResponse, EngineError> {
        if def.navigation_steps.is_empty() {
            warn!(
                order_type = ?req.order_type,
                workpiece = %req.workpiece_type,
                "order rejected: definition has no navigation steps"
            );
            if req.order_type == OrderType::Storage {
                self.discard_at_input(ctx).await;
            }
            return Err(EngineError::EmptyDefinition {
                order_type: req.order_type,
            });
        }

        let order = OrderResponse::enqueued(&req, def.into_chain(), Utc::now());
        info!(
            order_id = %order.order_id,
            order_type = ?order.order_type,
            workpiece = %order.workpiece_type,
            steps = order.production_steps.len(),
            "order enqueued"
        );
        let snapshot = order.clone();
        self.queue.push_back(order);
        self.mark_orders();

        self.start_queued(ctx);
        Ok(self
            .find_any(&snapshot.order_id)
            .cloned()
            .unwrap_or(snapshot))
    }

    async fn discard_at_input(&self, ctx: &EngineContext) {
        let Some(dps) = ctx.pairing.all_ready(ModuleType::Dps).into_iter().next() else {
            warn!("no ready input station to discard the workpiece at");
            return;
        };
        match ctx.dispatcher.send_discard_workpiece(&dps).await {
            DispatchOutcome::Dispatched => info!(dps = %dps, "workpiece discard requested"),
            other => warn!(dps = %dps, outcome = ?other, "workpiece discard not sent"),
        }
    }

    // -----------------------------------------------------------------------
    // Start
    // -----------------------------------------------------------------------

    /// Start every queued order that can start now, in arrival order.
    pub(super) fn start_queued(&mut self, ctx: &EngineContext) {
        let mut i = 0;
        while i < self.queue.len() {
            match self.start_order(ctx, i) {
                Ok(true) => {}
                Ok(false) => i += 1,
                Err(e) => {
                    error!(error = %e, "order start refused");
                    i += 1;
                }
            }
        }
    }

    /// Try to start the queued order at `idx`. `Ok(false)` leaves it queued.
    fn start_order(&mut self, ctx: &EngineContext, idx: usize) -> Result<bool, EngineError> {
        let (order_id, order_type, ty) = {
            let o = &self.queue[idx];
            (o.order_id.clone(), o.order_type, o.workpiece_type)
        };

        if order_type == OrderType::Production
            && self.production_in_progress() >= self.cfg.max_parallel_production_orders
        {
            debug!(order_id = %order_id, "production capacity reached; order stays queued");
            return Ok(false);
        }

        let transporters = ctx.pairing.transporter_count();
        let granted = match order_type {
            OrderType::Production => self.ledger.reserve_workpiece(&order_id, ty, transporters)?,
            OrderType::Storage => self.ledger.reserve_empty_bay(&order_id, ty, transporters)?,
        };
        let Some(warehouse) = granted else {
            debug!(order_id = %order_id, workpiece = %ty, "nothing to reserve; order stays queued");
            return Ok(false);
        };

        let Some(mut order) = self.queue.remove(idx) else {
            return Ok(false);
        };
        order.state = StepState::InProgress;
        order.started_at = Some(Utc::now());
        let ready = order.production_steps.independent_ids();
        info!(order_id = %order_id, warehouse = %warehouse, "order started");

        self.active.push(order);
        self.mark_orders();
        self.mark_stock();
        self.schedule_steps(ctx, &order_id, &ready);
        Ok(true)
    }

    // -----------------------------------------------------------------------
    // Cancel / reset
    // -----------------------------------------------------------------------

    pub(super) fn cancel_orders(&mut self, ids: &[String]) -> Vec<String> {
        let mut cancelled = Vec::new();
        for id in ids {
            let Some(pos) = self.queue.iter().position(|o| &o.order_id == id) else {
                if self.active_index(id).is_some() {
                    info!(order_id = %id, "cancel ignored: order already in progress");
                } else {
                    debug!(order_id = %id, "cancel ignored: unknown order");
                }
                continue;
            };
            let Some(mut order) = self.queue.remove(pos) else {
                continue;
            };
            let now = Utc::now();
            order.production_steps.cancel_open(now);
            order.state = StepState::Cancelled;
            order.stopped_at = Some(now);
            if self.ledger.remove_reservation(id) {
                self.mark_stock();
            }
            info!(order_id = %id, "queued order cancelled");
            self.archive(order);
            cancelled.push(id.clone());
        }
        cancelled
    }

    pub(super) fn reset_order(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
    ) -> Result<(), EngineError> {
        let idx = self
            .active_index(order_id)
            .ok_or_else(|| EngineError::OrderNotActive {
                order_id: order_id.to_string(),
            })?;

        let mut order = self.active.remove(idx);
        let now = Utc::now();
        let cancelled = order.production_steps.cancel_open(now);
        order.state = StepState::Cancelled;
        order.stopped_at = Some(now);

        self.purge_ready(order_id);
        if self.ledger.remove_reservation(order_id) {
            self.mark_stock();
        }
        ctx.pairing.release_order(order_id);
        warn!(order_id, cancelled_steps = cancelled.len(), "order reset");

        self.archive(order);
        self.start_queued(ctx);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Action updates
    // -----------------------------------------------------------------------

    pub(super) async fn handle_action_update(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
        action_id: &str,
        state: ActionStatus,
        result: Option<ActionResult>,
    ) {
        if !matches!(state, ActionStatus::Finished | ActionStatus::Failed) {
            return;
        }
        let Some(idx) = self.active_index(order_id) else {
            debug!(order_id, step_id = action_id, "update for inactive order ignored");
            return;
        };

        let now = Utc::now();
        let kind = {
            let Some(step) = self.active[idx].production_steps.get_mut(action_id) else {
                debug!(order_id, step_id = action_id, "update for unknown step ignored");
                return;
            };
            if !step.is_open() {
                debug!(order_id, step_id = action_id, state = ?step.state, "late update ignored");
                return;
            }
            step.stopped_at = Some(now);
            if state == ActionStatus::Failed {
                step.state = StepState::Error;
            } else {
                step.state = StepState::Finished;
            }
            step.kind.clone()
        };
        self.mark_orders();

        if state == ActionStatus::Failed {
            // The device needs an operator; the order is not advanced.
            error!(order_id, step_id = action_id, "step failed on device");
            return;
        }
        info!(order_id, step_id = action_id, "step finished");

        let mut warehouse_step = false;
        if let StepKind::Manufacture(m) = &kind {
            if m.command == Command::CheckQuality && result == Some(ActionResult::Failed) {
                let serial = m.serial_number.as_deref();
                self.handle_quality_check_failure(ctx, order_id, action_id, serial)
                    .await;
                return;
            }
            match (m.module_type, m.command) {
                (ModuleType::Hbw, Command::Pick | Command::Drop) => {
                    if self.ledger.remove_reservation(order_id) {
                        self.mark_stock();
                    }
                    warehouse_step = true;
                }
                (_, Command::Drop) => {
                    if let Some(serial) = &m.serial_number {
                        ctx.pairing.release_module(serial);
                    }
                }
                _ => {}
            }
            // A station took the load off the transporter.
            if m.command == Command::Pick {
                if let Some(t) = ctx.pairing.transporter_for_order(order_id) {
                    ctx.pairing.release_module(&t);
                }
            }
        }

        if self.active[idx].production_steps.is_last(action_id) {
            self.finish_order(ctx, idx);
            self.start_queued(ctx);
            return;
        }

        let next = self.active[idx]
            .production_steps
            .dependent_of(action_id)
            .filter(|s| s.state == StepState::Enqueued)
            .map(|s| s.id.clone());
        if let Some(next) = next {
            self.schedule_steps(ctx, order_id, &[next]);
        }
        if warehouse_step {
            self.start_queued(ctx);
        }
    }

    fn finish_order(&mut self, ctx: &EngineContext, idx: usize) {
        let mut order = self.active.remove(idx);
        order.state = StepState::Finished;
        order.stopped_at = Some(Utc::now());

        ctx.pairing.release_order(&order.order_id);
        if self.ledger.remove_reservation(&order.order_id) {
            self.mark_stock();
        }
        self.purge_ready(&order.order_id);
        info!(order_id = %order.order_id, "order finished");
        self.archive(order);
    }

    /// Abandon the order and enqueue a replacement for the same material.
    /// The replacement's first step hangs off the failed check.
    async fn handle_quality_check_failure(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
        step_id: &str,
        module_serial: Option<&str>,
    ) {
        if let Some(serial) = module_serial {
            ctx.pairing.release_module(serial);
        }
        let Some(idx) = self.active_index(order_id) else {
            return;
        };

        let mut order = self.active.remove(idx);
        let now = Utc::now();
        let cancelled = order.production_steps.cancel_open(now);
        order.state = StepState::Error;
        order.stopped_at = Some(now);

        ctx.pairing.release_order(order_id);
        if self.ledger.remove_reservation(order_id) {
            self.mark_stock();
        }
        self.purge_ready(order_id);
        warn!(
            order_id,
            step_id,
            cancelled_steps = cancelled.len(),
            "quality check failed; order replaced"
        );

        let replacement = OrderRequest {
            order_type: OrderType::Production,
            workpiece_type: order.workpiece_type,
            workpiece_id: None,
            flow: order.flow.clone(),
            dependent_action_id: Some(step_id.to_string()),
        };
        self.archive(order);

        match self.request_order(ctx, replacement).await {
            Ok(r) => info!(
                order_id = %r.order_id,
                replaces = order_id,
                "replacement order enqueued"
            ),
            Err(e) => error!(replaces = order_id, error = %e, "replacement order rejected"),
        }
    }
}

//! Ready queues and the two dispatch loops.
//!
//! A step reaches a ready queue once its predecessor finished (or it has
//! none). Each drain pass walks the queue front to back; entries that cannot
//! run yet stay queued for the next pass, entries that dispatched or died
//! leave it.

use std::collections::BTreeSet;

use ccu_flows::station_command;
use ccu_ledger::ReservationConflict;
use ccu_schemas::{
    Command, ManufactureStep, ModuleType, NavigationSource, OrderType, Step, StepKind, StepState,
    WorkpieceType,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::orders::{EngineCore, ReadyEntry};
use super::EngineContext;
use crate::{CommandMetadata, DispatchOutcome, NavigationRequest, ProcessRecord, ProductionCommand};

enum Route {
    Navigation,
    Manufacture,
    Drop,
}

enum Attempt {
    Dispatched { transporter: Option<String> },
    /// Not runnable yet; stays in the ready queue.
    Wait,
    /// Dispatched elsewhere, dead, or no longer relevant.
    Done,
}

impl EngineCore {
    /// Put enqueued steps of `order_id` into the matching ready queue.
    pub(super) fn schedule_steps(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
        step_ids: &[String],
    ) {
        for step_id in step_ids {
            let route = {
                let Some(idx) = self.active_index(order_id) else {
                    return;
                };
                let Some(step) = self.active[idx].production_steps.get(step_id) else {
                    continue;
                };
                if step.state != StepState::Enqueued {
                    continue;
                }
                match &step.kind {
                    StepKind::Navigation(_) => Route::Navigation,
                    StepKind::Manufacture(m) if m.command == Command::Drop => Route::Drop,
                    StepKind::Manufacture(_) => Route::Manufacture,
                }
            };
            let entry = ReadyEntry::new(order_id, step_id);
            match route {
                Route::Navigation => push_unique(&mut self.nav_ready, entry),
                Route::Manufacture => push_unique(&mut self.mfg_ready, entry),
                Route::Drop => self.generate_next_action_for_drop(ctx, order_id, step_id),
            }
        }
    }

    /// A drop needs a transporter under the module.
    ///
    /// After a navigation step the transporter is already there. After a
    /// processing step, a ready transporter parked at that module gets its
    /// bay reserved and the drop goes straight out; otherwise a fetch leg
    /// (module → module) is spliced in front of the drop.
    fn generate_next_action_for_drop(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
        drop_id: &str,
    ) {
        let Some(idx) = self.active_index(order_id) else {
            return;
        };
        let chain = &self.active[idx].production_steps;
        let Some(drop_module) = chain.get(drop_id).map(|s| s.module_type()) else {
            return;
        };
        let predecessor = chain
            .predecessor(drop_id)
            .and_then(|p| p.as_manufacture())
            .map(|m| (m.module_type, m.serial_number.clone()));

        let Some((pred_type, pred_serial)) = predecessor else {
            push_unique(&mut self.mfg_ready, ReadyEntry::new(order_id, drop_id));
            return;
        };

        if let Some(serial) = pred_serial.as_deref() {
            if let Some(transporter) = ctx.pairing.parked_transporter(serial) {
                if ctx.pairing.reserve_transporter_bay(&transporter, order_id) {
                    debug!(
                        order_id,
                        step_id = drop_id,
                        transporter = %transporter,
                        module = serial,
                        "transporter parked at module; drop goes direct"
                    );
                    push_unique(&mut self.mfg_ready, ReadyEntry::new(order_id, drop_id));
                    return;
                }
            }
        }

        let fetch = Step::navigation(NavigationSource::Module(pred_type), drop_module, None);
        let fetch_id = fetch.id.clone();
        if !self.active[idx].production_steps.insert_before(drop_id, fetch) {
            return;
        }
        debug!(order_id, step_id = %fetch_id, before = drop_id, "fetch leg spliced before drop");
        self.mark_orders();
        push_unique(&mut self.nav_ready, ReadyEntry::new(order_id, &fetch_id));
    }

    // -----------------------------------------------------------------------
    // Navigation
    // -----------------------------------------------------------------------

    pub(super) async fn trigger_navigation_steps(&mut self, ctx: &EngineContext) {
        let entries = std::mem::take(&mut self.nav_ready);
        let mut keep = Vec::with_capacity(entries.len());
        let mut in_flight = BTreeSet::new();
        let mut blockers: Vec<(String, String)> = Vec::new();

        for entry in entries {
            match self.try_navigation(ctx, &entry, &mut blockers).await {
                Attempt::Dispatched { transporter } => {
                    in_flight.extend(transporter);
                }
                Attempt::Wait => keep.push(entry),
                Attempt::Done => {}
            }
        }
        keep.append(&mut self.nav_ready);
        self.nav_ready = keep;

        blockers.sort();
        blockers.dedup();
        for (transporter, module) in blockers {
            if in_flight.contains(&transporter) {
                continue;
            }
            info!(transporter = %transporter, module = %module, "clearing module node");
            let outcome = ctx.dispatcher.send_clear_module_node(&transporter, &module).await;
            if !outcome.is_dispatched() {
                warn!(transporter = %transporter, outcome = ?outcome, "clear node not sent");
            }
        }
    }

    async fn try_navigation(
        &mut self,
        ctx: &EngineContext,
        entry: &ReadyEntry,
        blockers: &mut Vec<(String, String)>,
    ) -> Attempt {
        let order_id = entry.order_id.as_str();
        let step_id = entry.step_id.as_str();

        let Some(idx) = self.active_index(order_id) else {
            return Attempt::Done;
        };
        let (nav, order_type, ty, announce) = {
            let order = &self.active[idx];
            let chain = &order.production_steps;
            let Some(step) = chain.get(step_id) else {
                return Attempt::Done;
            };
            if step.state != StepState::Enqueued {
                return Attempt::Done;
            }
            if !chain.is_unblocked(step_id) {
                return Attempt::Wait;
            }
            let Some(nav) = step.as_navigation().cloned() else {
                return Attempt::Done;
            };
            let announce = nav.target == ModuleType::Dps
                && chain
                    .dependent_of(step_id)
                    .and_then(|s| s.as_manufacture())
                    .map(|m| m.command == Command::Pick)
                    .unwrap_or(false);
            (nav, order.order_type, order.workpiece_type, announce)
        };

        let resolved = self.resolve_navigation_target(ctx, order_id, order_type, ty, nav.target);
        let target = match resolved {
            Ok(Some(t)) => t,
            Ok(None) => {
                debug!(order_id, step_id, target = %nav.target, "no module for navigation yet");
                return Attempt::Wait;
            }
            Err(e) => {
                error!(order_id, step_id, error = %e, "reservation invariant violated");
                return Attempt::Wait;
            }
        };
        if !ctx.pairing.is_ready_for_order(&target, order_id) {
            debug!(order_id, step_id, module = %target, "target module not ready");
            return Attempt::Wait;
        }

        let Some(path) = ctx.router.select_path(&self.active[idx], &target, &nav) else {
            if let Some(t) = ctx.router.transporter_blocking(&target) {
                blockers.push((t, target));
            }
            return Attempt::Wait;
        };

        let transporter = path.transporter.clone();
        let fresh_transporter =
            ctx.pairing.transporter_for_order(order_id).as_deref() != Some(transporter.as_str());
        let fresh_module = nav.target != ModuleType::Hbw
            && ctx.pairing.module_for_order(order_id, Some(nav.target)).as_deref()
                != Some(target.as_str());

        set_step_state(&mut self.active[idx], step_id, StepState::InProgress);
        ctx.pairing.assign_module(&transporter, order_id);
        if fresh_module {
            ctx.pairing.assign_module(&target, order_id);
        }

        let req = NavigationRequest {
            order_id: order_id.to_string(),
            step_id: step_id.to_string(),
            transporter: transporter.clone(),
            source: nav.source,
            target: nav.target,
            target_serial: target.clone(),
            path: path.path,
            workpiece_type: ty,
        };

        match ctx.dispatcher.send_navigation_request(&req).await {
            DispatchOutcome::Dispatched => {
                self.mark_orders();
                info!(
                    order_id,
                    step_id,
                    transporter = %transporter,
                    target = %target,
                    "navigation dispatched"
                );
                if announce {
                    let outcome = ctx
                        .dispatcher
                        .send_announce_dps_output(&target, order_id, ty)
                        .await;
                    if !outcome.is_dispatched() {
                        warn!(
                            order_id,
                            dps = %target,
                            outcome = ?outcome,
                            "output announcement not sent"
                        );
                    }
                }
                Attempt::Dispatched {
                    transporter: Some(transporter),
                }
            }
            DispatchOutcome::RetryLater { reason } => {
                warn!(
                    order_id,
                    step_id,
                    transporter = %transporter,
                    reason = %reason,
                    "navigation not ready; requeued"
                );
                self.revert_to_enqueued(idx, step_id);
                release_navigation_claims(ctx, &req, fresh_transporter, fresh_module);
                Attempt::Wait
            }
            DispatchOutcome::Fatal { reason } => {
                error!(order_id, step_id, reason = %reason, "navigation dispatch failed");
                set_step_state(&mut self.active[idx], step_id, StepState::Error);
                release_navigation_claims(ctx, &req, fresh_transporter, fresh_module);
                self.mark_orders();
                Attempt::Done
            }
        }
    }

    /// Module instance a navigation step should drive to.
    ///
    /// Warehouse: the one holding this order's reservation (reserving now if
    /// needed). Elsewhere: the module the order already holds, else any ready
    /// module of the type.
    fn resolve_navigation_target(
        &mut self,
        ctx: &EngineContext,
        order_id: &str,
        order_type: OrderType,
        ty: WorkpieceType,
        target: ModuleType,
    ) -> Result<Option<String>, ReservationConflict> {
        if target == ModuleType::Hbw {
            let had = self.ledger.warehouse_for_order(order_id).is_some();
            let transporters = ctx.pairing.transporter_count();
            let granted = match order_type {
                OrderType::Production => self.ledger.reserve_workpiece(order_id, ty, transporters)?,
                OrderType::Storage => self.ledger.reserve_empty_bay(order_id, ty, transporters)?,
            };
            if !had && granted.is_some() {
                self.mark_stock();
            }
            return Ok(granted);
        }

        if let Some(serial) = ctx.pairing.module_for_order(order_id, None) {
            match ctx.pairing.module_type(&serial) {
                Some(t) if t == target => return Ok(Some(serial)),
                found => {
                    if let Some(held) = ctx.pairing.module_for_order(order_id, Some(target)) {
                        return Ok(Some(held));
                    }
                    warn!(
                        order_id,
                        module = %serial,
                        expected = %target,
                        found = ?found,
                        "order holds a module of another type; looking up afresh"
                    );
                }
            }
        }
        Ok(ctx.pairing.ready_for_module_type(target, Some(order_id)))
    }

    // -----------------------------------------------------------------------
    // Manufacture
    // -----------------------------------------------------------------------

    pub(super) async fn trigger_manufacture_steps(&mut self, ctx: &EngineContext) {
        let entries = std::mem::take(&mut self.mfg_ready);
        let mut keep = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Attempt::Wait = self.try_manufacture(ctx, &entry).await {
                keep.push(entry);
            }
        }
        keep.append(&mut self.mfg_ready);
        self.mfg_ready = keep;
    }

    async fn try_manufacture(&mut self, ctx: &EngineContext, entry: &ReadyEntry) -> Attempt {
        let order_id = entry.order_id.as_str();
        let step_id = entry.step_id.as_str();

        let Some(idx) = self.active_index(order_id) else {
            return Attempt::Done;
        };
        let (m, ty, workpiece_id) = {
            let order = &self.active[idx];
            let Some(step) = order.production_steps.get(step_id) else {
                return Attempt::Done;
            };
            if step.state != StepState::Enqueued {
                return Attempt::Done;
            }
            if !order.production_steps.is_unblocked(step_id) {
                return Attempt::Wait;
            }
            let Some(m) = step.as_manufacture().cloned() else {
                return Attempt::Done;
            };
            (m, order.workpiece_type, order.workpiece_id.clone())
        };

        let Some(serial) = self.resolve_module(ctx, order_id, m.module_type) else {
            debug!(order_id, step_id, module_type = %m.module_type, "no ready module");
            return Attempt::Wait;
        };

        let metadata = self.command_metadata(idx, &m, ty, workpiece_id);
        let fresh_module = m.module_type != ModuleType::Hbw
            && ctx.pairing.module_for_order(order_id, Some(m.module_type)).as_deref()
                != Some(serial.as_str());

        set_step_state(&mut self.active[idx], step_id, StepState::InProgress);
        if let Some(step) = self.active[idx].production_steps.get_mut(step_id) {
            if let Some(mm) = step.as_manufacture_mut() {
                mm.serial_number = Some(serial.clone());
            }
        }
        if fresh_module {
            ctx.pairing.assign_module(&serial, order_id);
        }

        let cmd = ProductionCommand {
            order_id: order_id.to_string(),
            step_id: step_id.to_string(),
            module_serial: serial.clone(),
            module_type: m.module_type,
            command: m.command,
            metadata,
        };

        match ctx.dispatcher.send_production_command(&cmd).await {
            DispatchOutcome::Dispatched => {
                self.mark_orders();
                info!(
                    order_id,
                    step_id,
                    module = %serial,
                    command = ?m.command,
                    "production command dispatched"
                );
                Attempt::Dispatched { transporter: None }
            }
            DispatchOutcome::RetryLater { reason } => {
                warn!(
                    order_id,
                    step_id,
                    module = %serial,
                    reason = %reason,
                    "module not ready; requeued"
                );
                self.revert_to_enqueued(idx, step_id);
                if fresh_module {
                    ctx.pairing.release_module(&serial);
                }
                Attempt::Wait
            }
            DispatchOutcome::Fatal { reason } => {
                error!(
                    order_id,
                    step_id,
                    module = %serial,
                    reason = %reason,
                    "production dispatch failed"
                );
                set_step_state(&mut self.active[idx], step_id, StepState::Error);
                // The order stops at a dead step; it no longer holds the module.
                ctx.pairing.release_module(&serial);
                self.mark_orders();
                Attempt::Done
            }
        }
    }

    /// Ready module for a manufacture step of `order_id`.
    ///
    /// A module the order already holds is the only candidate for its type:
    /// the workpiece is in it.
    fn resolve_module(
        &self,
        ctx: &EngineContext,
        order_id: &str,
        module_type: ModuleType,
    ) -> Option<String> {
        if module_type == ModuleType::Hbw {
            return match self.ledger.warehouse_for_order(order_id) {
                Some(w) => ctx
                    .pairing
                    .is_ready_for_order(w, order_id)
                    .then(|| w.to_string()),
                None => ctx.pairing.ready_for_module_type(ModuleType::Hbw, Some(order_id)),
            };
        }
        match ctx.pairing.module_for_order(order_id, Some(module_type)) {
            Some(held) => ctx.pairing.is_ready_for_order(&held, order_id).then_some(held),
            None => ctx.pairing.ready_for_module_type(module_type, Some(order_id)),
        }
    }

    fn command_metadata(
        &self,
        idx: usize,
        m: &ManufactureStep,
        workpiece_type: WorkpieceType,
        workpiece_id: Option<String>,
    ) -> CommandMetadata {
        if m.module_type == ModuleType::Dps {
            let history = self.active[idx]
                .production_steps
                .iter()
                .filter(|s| s.state == StepState::Finished)
                .filter_map(|s| {
                    let done = s.as_manufacture()?;
                    if station_command(done.module_type) != Some(done.command) {
                        return None;
                    }
                    Some(ProcessRecord {
                        module_type: done.module_type,
                        command: done.command,
                        finished_at: s.stopped_at?,
                    })
                })
                .collect();
            return CommandMetadata::Dps {
                workpiece_type,
                workpiece_id,
                history,
            };
        }

        let timed = station_command(m.module_type) == Some(m.command);
        match self.cfg.process_durations.get(&m.module_type) {
            Some(&duration_secs) if timed => CommandMetadata::Timed {
                duration_secs,
                workpiece_type,
                workpiece_id,
            },
            _ => CommandMetadata::Generic {
                workpiece_type,
                workpiece_id,
            },
        }
    }

    fn revert_to_enqueued(&mut self, idx: usize, step_id: &str) {
        if let Some(step) = self.active[idx].production_steps.get_mut(step_id) {
            step.state = StepState::Enqueued;
            step.started_at = None;
            if let Some(m) = step.as_manufacture_mut() {
                m.serial_number = None;
            }
        }
    }
}

fn set_step_state(order: &mut ccu_schemas::OrderResponse, step_id: &str, state: StepState) {
    let now = Utc::now();
    if let Some(step) = order.production_steps.get_mut(step_id) {
        step.state = state;
        match state {
            StepState::InProgress => step.started_at = Some(now),
            s if s.is_terminal() => step.stopped_at = Some(now),
            _ => {}
        }
    }
}

/// Undo what a navigation attempt claimed: the path beyond the transporter's
/// current node, and assignments made for this attempt only.
fn release_navigation_claims(
    ctx: &EngineContext,
    req: &NavigationRequest,
    fresh_transporter: bool,
    fresh_module: bool,
) {
    let transporter = req.transporter.as_str();
    match req.path.first() {
        Some(here) if req.path.len() > 1 => ctx.nodes.release_all_nodes_except(transporter, here),
        _ => ctx.nodes.release_all_nodes(transporter),
    }
    if fresh_transporter {
        ctx.pairing.release_module(transporter);
    }
    if fresh_module {
        ctx.pairing.release_module(&req.target_serial);
    }
}

fn push_unique(queue: &mut Vec<ReadyEntry>, entry: ReadyEntry) {
    if !queue.contains(&entry) {
        queue.push(entry);
    }
}

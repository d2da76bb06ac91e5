use ccu_availability::{derive_module, derive_transporter, ModuleLocator, UNKNOWN_NODE};
use ccu_ledger::{ReservationLedger, StoredLoad};
use ccu_schemas::{
    ActionState, ActionStatus, Availability, Command, ModuleState, ModuleType, OrderResponse,
    TransporterState,
};
use tracing::{debug, info, warn};

use super::orders::EngineCore;
use super::EngineContext;
use crate::PairingRegistry;

/// Resolves finished navigation actions against the engine's own orders.
struct StepLocator<'a> {
    active: &'a [OrderResponse],
    ledger: &'a ReservationLedger,
    pairing: &'a dyn PairingRegistry,
}

impl ModuleLocator for StepLocator<'_> {
    fn navigation_target(&self, order_id: Option<&str>, action_id: &str) -> Option<ModuleType> {
        self.active
            .iter()
            .filter(|o| order_id.map_or(true, |id| o.order_id == id))
            .find_map(|o| o.production_steps.get(action_id))
            .and_then(|s| s.as_navigation())
            .map(|n| n.target)
    }

    fn paired_module(&self, order_id: Option<&str>, module_type: ModuleType) -> Option<String> {
        let order_id = order_id?;
        if module_type == ModuleType::Hbw {
            if let Some(w) = self.ledger.warehouse_for_order(order_id) {
                return Some(w.to_string());
            }
        }
        self.pairing.module_for_order(order_id, Some(module_type))
    }
}

impl EngineCore {
    pub(super) async fn handle_transporter_state(
        &mut self,
        ctx: &EngineContext,
        state: &TransporterState,
    ) {
        let serial = state.serial_number.as_str();
        if !ctx.pairing.is_transporter(serial) {
            warn!(serial, "report from unpaired transporter ignored");
            return;
        }

        let derived = {
            let locator = StepLocator {
                active: &self.active,
                ledger: &self.ledger,
                pairing: ctx.pairing.as_ref(),
            };
            derive_transporter(state, &locator)
        };
        debug!(
            serial,
            availability = ?derived.availability,
            last_module = ?derived.last_module_serial,
            "transporter availability"
        );
        ctx.pairing.update_availability(serial, derived.into());
        release_passed_nodes(ctx, state);

        if state.driving {
            return;
        }
        if let Some(action) = &state.action_state {
            self.forward_action(ctx, state.order_id.as_deref(), action).await;
        }
    }

    pub(super) async fn handle_module_state(&mut self, ctx: &EngineContext, state: &ModuleState) {
        let serial = state.serial_number.as_str();
        let Some(module_type) = ctx.pairing.module_type(serial) else {
            warn!(serial, "report from unpaired module ignored");
            return;
        };

        let derived = derive_module(state, module_type);
        if let Some(a) = &derived {
            debug!(
                serial,
                availability = ?a.availability,
                order_id = ?a.order_id,
                "module availability"
            );
            ctx.pairing.update_availability(serial, a.clone().into());
        }

        if module_type == ModuleType::Hbw {
            self.absorb_warehouse(ctx, state, derived.map(|a| a.availability));
        }

        if let Some(action) = &state.action_state {
            self.forward_action(ctx, state.order_id.as_deref(), action).await;
        }
    }

    /// Warehouse reports carry the full bay contents; they replace the stock.
    fn absorb_warehouse(
        &mut self,
        ctx: &EngineContext,
        state: &ModuleState,
        availability: Option<Availability>,
    ) {
        let serial = state.serial_number.as_str();
        let loads = state
            .loads
            .iter()
            .filter_map(|l| {
                Some(StoredLoad {
                    bay: l.load_position.clone()?,
                    workpiece_type: l.load_type?,
                    load_id: l.load_id.clone(),
                })
            })
            .collect();
        self.ledger.set_stock(serial, loads);

        if !self.ledger.has_bays(serial) {
            info!(serial, bays = ?self.cfg.default_bays, "warehouse registered with default bays");
            self.ledger.set_bays(serial, self.cfg.default_bays.clone());
        }
        if let Some(a) = availability {
            self.ledger.set_activated(serial, a != Availability::Blocked);
        }
        self.mark_stock();
        self.start_queued(ctx);
    }

    async fn forward_action(
        &mut self,
        ctx: &EngineContext,
        order_id: Option<&str>,
        action: &ActionState,
    ) {
        if !matches!(action.state, ActionStatus::Finished | ActionStatus::Failed) {
            return;
        }
        let order_id = match order_id.filter(|o| !o.is_empty()) {
            Some(o) => o.to_string(),
            None => match self.order_of_step(&action.id) {
                Some(o) => o,
                None => return,
            },
        };
        self.handle_action_update(ctx, &order_id, &action.id, action.state, action.result)
            .await;
    }

    fn order_of_step(&self, step_id: &str) -> Option<String> {
        self.active
            .iter()
            .find(|o| o.production_steps.get(step_id).is_some())
            .map(|o| o.order_id.clone())
    }
}

/// Node bookkeeping for one transporter report.
///
/// - no known position: release everything
/// - driving: release what lies behind the current node
/// - standing (docked or not): keep only the current node
fn release_passed_nodes(ctx: &EngineContext, state: &TransporterState) {
    let serial = state.serial_number.as_str();
    let node = match state.last_node_id.as_deref() {
        Some(n) if n != UNKNOWN_NODE => n,
        _ => {
            ctx.nodes.release_all_nodes(serial);
            return;
        }
    };
    let docked = state
        .action_state
        .as_ref()
        .map(|a| a.command == Command::Dock && a.state == ActionStatus::Finished)
        .unwrap_or(false);

    if docked {
        ctx.nodes.release_all_nodes_except(serial, node);
    } else if state.driving {
        ctx.nodes.release_nodes_before(serial, node);
    } else {
        ctx.nodes.release_all_nodes_except(serial, node);
    }
}

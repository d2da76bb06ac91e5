//! Transporter selection and road-node occupancy.
//!
//! Path finding over the layout graph lives outside this crate. What ships
//! here is the seam ([`TransporterRouter`], [`NodeOccupancy`]) plus a direct
//! router that treats every trip as a two-node hop. It is enough to drive a
//! single-lane cell and the test harness.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use ccu_schemas::{NavigationStep, OrderResponse};

use crate::PairingRegistry;

/// A transporter and the nodes it will occupy on its way to the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransporterPath {
    pub transporter: String,
    pub path: Vec<String>,
}

pub trait TransporterRouter: Send + Sync {
    /// A free transporter and its path to `target_serial`, or `None` when
    /// every candidate is busy or the path is occupied.
    fn select_path(
        &self,
        order: &OrderResponse,
        target_serial: &str,
        step: &NavigationStep,
    ) -> Option<TransporterPath>;

    /// An idle transporter parked on `module_serial`, blocking access to it.
    fn transporter_blocking(&self, module_serial: &str) -> Option<String>;
}

pub trait NodeOccupancy: Send + Sync {
    /// Claim every node of `path` for `transporter`. All or nothing.
    fn reserve_path(&self, transporter: &str, path: &[String]) -> bool;

    fn release_all_nodes(&self, transporter: &str);

    fn release_all_nodes_except(&self, transporter: &str, node_id: &str);

    /// Release the nodes already passed on the way to `node_id`.
    fn release_nodes_before(&self, transporter: &str, node_id: &str);

    fn holder(&self, node_id: &str) -> Option<String>;
}

// ---------------------------------------------------------------------------
// In-memory occupancy
// ---------------------------------------------------------------------------

/// Node claims per transporter, in path order.
#[derive(Debug, Default)]
pub struct InMemoryNodeOccupancy {
    held: Mutex<BTreeMap<String, Vec<String>>>,
}

impl InMemoryNodeOccupancy {
    pub fn new() -> Self {
        Self::default()
    }

    fn held(&self) -> MutexGuard<'_, BTreeMap<String, Vec<String>>> {
        self.held.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn nodes_of(&self, transporter: &str) -> Vec<String> {
        self.held().get(transporter).cloned().unwrap_or_default()
    }
}

impl NodeOccupancy for InMemoryNodeOccupancy {
    fn reserve_path(&self, transporter: &str, path: &[String]) -> bool {
        let mut held = self.held();
        let taken = held
            .iter()
            .filter(|(t, _)| t.as_str() != transporter)
            .any(|(_, nodes)| nodes.iter().any(|n| path.contains(n)));
        if taken {
            return false;
        }
        held.insert(transporter.to_string(), path.to_vec());
        true
    }

    fn release_all_nodes(&self, transporter: &str) {
        self.held().remove(transporter);
    }

    fn release_all_nodes_except(&self, transporter: &str, node_id: &str) {
        self.held()
            .insert(transporter.to_string(), vec![node_id.to_string()]);
    }

    fn release_nodes_before(&self, transporter: &str, node_id: &str) {
        let mut held = self.held();
        if let Some(nodes) = held.get_mut(transporter) {
            if let Some(i) = nodes.iter().position(|n| n == node_id) {
                nodes.drain(..i);
            }
        }
    }

    fn holder(&self, node_id: &str) -> Option<String> {
        self.held()
            .iter()
            .find(|(_, nodes)| nodes.iter().any(|n| n == node_id))
            .map(|(t, _)| t.clone())
    }
}

// ---------------------------------------------------------------------------
// Direct router
// ---------------------------------------------------------------------------

/// Picks the transporter already carrying for the order, else the first
/// ready unassigned one, and routes it straight to the target.
pub struct DirectRouter {
    pairing: Arc<dyn PairingRegistry>,
    nodes: Arc<dyn NodeOccupancy>,
}

impl DirectRouter {
    pub fn new(pairing: Arc<dyn PairingRegistry>, nodes: Arc<dyn NodeOccupancy>) -> Self {
        Self { pairing, nodes }
    }

    fn candidate(&self, order_id: &str) -> Option<String> {
        match self.pairing.transporter_for_order(order_id) {
            // The workpiece is on this transporter; nobody else can take the leg.
            Some(t) => self.pairing.is_ready_for_order(&t, order_id).then_some(t),
            None => self
                .pairing
                .all_ready_unassigned_transporters()
                .into_iter()
                .next(),
        }
    }
}

impl TransporterRouter for DirectRouter {
    fn select_path(
        &self,
        order: &OrderResponse,
        target_serial: &str,
        _step: &NavigationStep,
    ) -> Option<TransporterPath> {
        let transporter = self.candidate(&order.order_id)?;
        let mut path = Vec::with_capacity(2);
        if let Some(node) = self.pairing.last_node(&transporter) {
            if node != target_serial {
                path.push(node);
            }
        }
        path.push(target_serial.to_string());

        if !self.nodes.reserve_path(&transporter, &path) {
            tracing::debug!(transporter, target = target_serial, "path occupied");
            return None;
        }
        Some(TransporterPath { transporter, path })
    }

    fn transporter_blocking(&self, module_serial: &str) -> Option<String> {
        let parked = self.pairing.parked_transporter(module_serial)?;
        // Only an idle transporter can be sent away.
        self.pairing
            .all_ready_unassigned_transporters()
            .contains(&parked)
            .then_some(parked)
    }
}

//! Pairing registry: which devices exist, how available they are, and which
//! order each one is currently assigned to.
//!
//! Availability comes from telemetry (see `ccu-availability`); assignments
//! come from the engine. A device is *ready for an order* when it reports
//! READY, it is not assigned to a different order and, for modules, its
//! reported order is absent or that order. Transporters keep reporting the
//! last order they served, so only the engine's assignment binds them.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ccu_availability::{ModuleAvailability, TransporterAvailability};
use ccu_schemas::{Availability, ModuleType};

/// Availability report pushed into the registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AvailabilityUpdate {
    pub availability: Availability,
    pub order_id: Option<String>,
    pub last_node_id: Option<String>,
    pub last_module_serial: Option<String>,
}

impl From<TransporterAvailability> for AvailabilityUpdate {
    fn from(t: TransporterAvailability) -> Self {
        Self {
            availability: t.availability,
            order_id: t.order_id,
            last_node_id: t.last_node_id,
            last_module_serial: t.last_module_serial,
        }
    }
}

impl From<ModuleAvailability> for AvailabilityUpdate {
    fn from(m: ModuleAvailability) -> Self {
        Self {
            availability: m.availability,
            order_id: m.order_id,
            last_node_id: None,
            last_module_serial: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeviceKind {
    Transporter,
    Module(ModuleType),
}

/// Registry view of one paired device.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairedDevice {
    pub serial: String,
    pub kind: DeviceKind,
    /// `None` until the first report arrives.
    pub availability: Option<Availability>,
    pub reported_order: Option<String>,
    pub last_node_id: Option<String>,
    pub last_module_serial: Option<String>,
    pub assigned_order: Option<String>,
}

impl PairedDevice {
    fn new(serial: &str, kind: DeviceKind) -> Self {
        Self {
            serial: serial.to_string(),
            kind,
            availability: None,
            reported_order: None,
            last_node_id: None,
            last_module_serial: None,
            assigned_order: None,
        }
    }

    fn is_ready(&self) -> bool {
        self.availability == Some(Availability::Ready)
    }

    /// Order the device itself says it is working for. Transporters keep
    /// reporting the last order they served, so they claim none.
    fn claimed_order(&self) -> Option<&str> {
        match self.kind {
            DeviceKind::Transporter => None,
            DeviceKind::Module(_) => self.reported_order.as_deref(),
        }
    }

    pub fn is_ready_for(&self, order_id: &str) -> bool {
        self.is_ready()
            && self.claimed_order().map_or(true, |o| o == order_id)
            && self.assigned_order.as_deref().map_or(true, |o| o == order_id)
    }

    fn is_unassigned(&self) -> bool {
        self.assigned_order.is_none() && self.claimed_order().is_none()
    }

    fn module_type(&self) -> Option<ModuleType> {
        match self.kind {
            DeviceKind::Module(t) => Some(t),
            DeviceKind::Transporter => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Device registry the engine schedules against.
///
/// Synchronous: every call is a short in-memory lookup. Implementations use
/// interior mutability; the engine holds them behind `Arc<dyn _>`.
pub trait PairingRegistry: Send + Sync {
    fn update_availability(&self, serial: &str, update: AvailabilityUpdate);

    /// A ready module of `module_type`, for `order_id` when given, otherwise
    /// one no order holds.
    fn ready_for_module_type(&self, module_type: ModuleType, order_id: Option<&str>)
        -> Option<String>;

    fn is_ready_for_order(&self, serial: &str, order_id: &str) -> bool;

    /// A module (never a transporter) assigned to `order_id`, optionally of a given type.
    fn module_for_order(&self, order_id: &str, module_type: Option<ModuleType>) -> Option<String>;

    fn all_ready(&self, module_type: ModuleType) -> Vec<String>;

    fn all_ready_unassigned_transporters(&self) -> Vec<String>;

    /// Transporter assigned to (carrying for) `order_id`.
    fn transporter_for_order(&self, order_id: &str) -> Option<String>;

    fn module_type(&self, serial: &str) -> Option<ModuleType>;

    fn is_transporter(&self, serial: &str) -> bool;

    fn last_node(&self, serial: &str) -> Option<String>;

    fn transporter_count(&self) -> usize;

    /// Assign any paired device to an order.
    fn assign_module(&self, serial: &str, order_id: &str);

    fn release_module(&self, serial: &str);

    /// Drop every assignment held by `order_id`.
    fn release_order(&self, order_id: &str);

    /// Ready transporter standing at `module_serial`.
    fn parked_transporter(&self, module_serial: &str) -> Option<String>;

    /// Hold the transporter's loading bay for `order_id`. Fails when the
    /// transporter already serves another order.
    fn reserve_transporter_bay(&self, transporter: &str, order_id: &str) -> bool;
}

// ---------------------------------------------------------------------------
// In-memory registry
// ---------------------------------------------------------------------------

/// Registry backed by a map of devices keyed by serial.
///
/// Devices are registered up front (from configuration) or, for transporters,
/// on first report. Iteration order is by serial so lookups are deterministic.
#[derive(Debug, Default)]
pub struct InMemoryPairing {
    devices: RwLock<BTreeMap<String, PairedDevice>>,
}

impl InMemoryPairing {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, PairedDevice>> {
        self.devices.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, PairedDevice>> {
        self.devices.write().unwrap_or_else(|p| p.into_inner())
    }

    pub fn register_module(&self, serial: &str, module_type: ModuleType) {
        self.write()
            .entry(serial.to_string())
            .or_insert_with(|| PairedDevice::new(serial, DeviceKind::Module(module_type)));
    }

    pub fn register_transporter(&self, serial: &str) {
        self.write()
            .entry(serial.to_string())
            .or_insert_with(|| PairedDevice::new(serial, DeviceKind::Transporter));
    }

    pub fn device(&self, serial: &str) -> Option<PairedDevice> {
        self.read().get(serial).cloned()
    }

    pub fn devices(&self) -> Vec<PairedDevice> {
        self.read().values().cloned().collect()
    }
}

impl PairingRegistry for InMemoryPairing {
    fn update_availability(&self, serial: &str, update: AvailabilityUpdate) {
        let mut devices = self.write();
        let Some(d) = devices.get_mut(serial) else {
            tracing::debug!(serial, "availability for unpaired device ignored");
            return;
        };
        d.availability = Some(update.availability);
        d.reported_order = update.order_id;
        if d.kind == DeviceKind::Transporter {
            d.last_node_id = update.last_node_id;
            d.last_module_serial = update.last_module_serial;
        }
    }

    fn ready_for_module_type(
        &self,
        module_type: ModuleType,
        order_id: Option<&str>,
    ) -> Option<String> {
        self.read()
            .values()
            .filter(|d| d.module_type() == Some(module_type))
            .find(|d| match order_id {
                Some(o) => d.is_ready_for(o),
                None => d.is_ready() && d.is_unassigned(),
            })
            .map(|d| d.serial.clone())
    }

    fn is_ready_for_order(&self, serial: &str, order_id: &str) -> bool {
        self.read()
            .get(serial)
            .map(|d| d.is_ready_for(order_id))
            .unwrap_or(false)
    }

    fn module_for_order(&self, order_id: &str, module_type: Option<ModuleType>) -> Option<String> {
        self.read()
            .values()
            .filter(|d| d.assigned_order.as_deref() == Some(order_id))
            .find(|d| match (d.module_type(), module_type) {
                (None, _) => false,
                (Some(_), None) => true,
                (Some(have), Some(want)) => have == want,
            })
            .map(|d| d.serial.clone())
    }

    fn all_ready(&self, module_type: ModuleType) -> Vec<String> {
        self.read()
            .values()
            .filter(|d| d.module_type() == Some(module_type) && d.is_ready())
            .map(|d| d.serial.clone())
            .collect()
    }

    fn all_ready_unassigned_transporters(&self) -> Vec<String> {
        self.read()
            .values()
            .filter(|d| d.kind == DeviceKind::Transporter && d.is_ready() && d.is_unassigned())
            .map(|d| d.serial.clone())
            .collect()
    }

    fn transporter_for_order(&self, order_id: &str) -> Option<String> {
        self.read()
            .values()
            .find(|d| {
                d.kind == DeviceKind::Transporter && d.assigned_order.as_deref() == Some(order_id)
            })
            .map(|d| d.serial.clone())
    }

    fn module_type(&self, serial: &str) -> Option<ModuleType> {
        self.read().get(serial).and_then(|d| d.module_type())
    }

    fn is_transporter(&self, serial: &str) -> bool {
        self.read()
            .get(serial)
            .map(|d| d.kind == DeviceKind::Transporter)
            .unwrap_or(false)
    }

    fn last_node(&self, serial: &str) -> Option<String> {
        self.read().get(serial).and_then(|d| d.last_node_id.clone())
    }

    fn transporter_count(&self) -> usize {
        self.read()
            .values()
            .filter(|d| d.kind == DeviceKind::Transporter)
            .count()
    }

    fn assign_module(&self, serial: &str, order_id: &str) {
        if let Some(d) = self.write().get_mut(serial) {
            d.assigned_order = Some(order_id.to_string());
        }
    }

    fn release_module(&self, serial: &str) {
        if let Some(d) = self.write().get_mut(serial) {
            d.assigned_order = None;
        }
    }

    fn release_order(&self, order_id: &str) {
        for d in self.write().values_mut() {
            if d.assigned_order.as_deref() == Some(order_id) {
                d.assigned_order = None;
            }
        }
    }

    fn parked_transporter(&self, module_serial: &str) -> Option<String> {
        self.read()
            .values()
            .find(|d| {
                d.kind == DeviceKind::Transporter
                    && d.is_ready()
                    && d.last_module_serial.as_deref() == Some(module_serial)
            })
            .map(|d| d.serial.clone())
    }

    fn reserve_transporter_bay(&self, transporter: &str, order_id: &str) -> bool {
        let mut devices = self.write();
        let Some(d) = devices.get_mut(transporter) else {
            return false;
        };
        if d.kind != DeviceKind::Transporter {
            return false;
        }
        match d.assigned_order.as_deref() {
            Some(o) if o != order_id => false,
            _ => {
                d.assigned_order = Some(order_id.to_string());
                true
            }
        }
    }
}

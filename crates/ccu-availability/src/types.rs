use ccu_schemas::{Availability, ModuleType};

/// Sentinel node id reported by a transporter that lost its position.
pub const UNKNOWN_NODE: &str = "UNKNOWN";

/// Derived transporter state, ready for the pairing registry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransporterAvailability {
    pub availability: Availability,
    pub order_id: Option<String>,
    pub last_node_id: Option<String>,
    /// Module the transporter is docked at, when it can be determined.
    pub last_module_serial: Option<String>,
}

/// Derived module state. `order_id` set means READY/BUSY *for that order*.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ModuleAvailability {
    pub availability: Availability,
    pub order_id: Option<String>,
}

impl ModuleAvailability {
    pub fn ready() -> Self {
        Self {
            availability: Availability::Ready,
            order_id: None,
        }
    }

    pub fn for_order(availability: Availability, order_id: Option<String>) -> Self {
        Self {
            availability,
            order_id,
        }
    }
}

/// Lookups needed to turn a finished navigation action into a module serial.
pub trait ModuleLocator {
    /// Station type targeted by the navigation step `action_id` belongs to.
    fn navigation_target(&self, order_id: Option<&str>, action_id: &str) -> Option<ModuleType>;

    /// Paired module instance of `module_type` serving `order_id`.
    fn paired_module(&self, order_id: Option<&str>, module_type: ModuleType) -> Option<String>;
}

//! Scenario: availability derivation from raw device reports
//!
//! # Invariants under test
//!
//! 1. A driving transporter is BUSY and never triggers a module lookup.
//! 2. A lost transporter (`lastNodeId == "UNKNOWN"`) is BLOCKED.
//! 3. A transporter that finished a TURN on a road node resolves the module
//!    it stands at through the locator.
//! 4. A DPS holding a workpiece after its PICK finished is READY, order-free.
//!
//! Pure in-process; no IO.

use std::cell::Cell;

use ccu_availability::{
    derive_module, derive_transporter, ModuleAvailability, ModuleLocator, UNKNOWN_NODE,
};
use ccu_schemas::{
    ActionState, ActionStatus, Availability, Command, DeviceError, ErrorLevel, Load, ModuleState,
    ModuleType, TransporterState, WorkpieceType,
};

/// Knows one navigation step (`nav-1` → MILL) and one paired mill.
#[derive(Default)]
struct CountingLocator {
    lookups: Cell<u32>,
}

impl ModuleLocator for CountingLocator {
    fn navigation_target(&self, _order_id: Option<&str>, action_id: &str) -> Option<ModuleType> {
        self.lookups.set(self.lookups.get() + 1);
        (action_id == "nav-1").then_some(ModuleType::Mill)
    }

    fn paired_module(&self, order_id: Option<&str>, module_type: ModuleType) -> Option<String> {
        self.lookups.set(self.lookups.get() + 1);
        match (order_id, module_type) {
            (Some("o1"), ModuleType::Mill) => Some("MILL-1".to_string()),
            _ => None,
        }
    }
}

fn finished(id: &str, command: Command) -> Option<ActionState> {
    Some(ActionState {
        id: id.to_string(),
        command,
        state: ActionStatus::Finished,
        timestamp: None,
        result: None,
    })
}

#[test]
fn driving_transporter_is_busy_without_lookup() {
    let loc = CountingLocator::default();
    let st = TransporterState {
        serial_number: "FTS1".into(),
        order_id: Some("o1".into()),
        last_node_id: Some("1".into()),
        driving: true,
        action_state: finished("nav-1", Command::Turn),
        ..Default::default()
    };

    let a = derive_transporter(&st, &loc);
    assert_eq!(a.availability, Availability::Busy);
    assert!(a.last_module_serial.is_none());
    assert_eq!(loc.lookups.get(), 0);
}

#[test]
fn unknown_position_blocks_transporter() {
    let loc = CountingLocator::default();
    let st = TransporterState {
        last_node_id: Some(UNKNOWN_NODE.into()),
        ..Default::default()
    };
    assert_eq!(derive_transporter(&st, &loc).availability, Availability::Blocked);
}

#[test]
fn fatal_error_blocks_transporter_even_when_idle() {
    let loc = CountingLocator::default();
    let st = TransporterState {
        last_node_id: Some("3".into()),
        errors: vec![DeviceError {
            error_type: "collision".into(),
            error_level: ErrorLevel::Fatal,
            timestamp: chrono::Utc::now(),
        }],
        ..Default::default()
    };
    assert_eq!(derive_transporter(&st, &loc).availability, Availability::Blocked);
}

#[test]
fn finished_turn_on_road_node_resolves_paired_module() {
    let loc = CountingLocator::default();
    let st = TransporterState {
        serial_number: "FTS1".into(),
        order_id: Some("o1".into()),
        last_node_id: Some("1".into()),
        action_state: finished("nav-1", Command::Turn),
        ..Default::default()
    };

    let a = derive_transporter(&st, &loc);
    assert_eq!(a.availability, Availability::Ready);
    assert_eq!(a.order_id.as_deref(), Some("o1"));
    assert_eq!(a.last_module_serial.as_deref(), Some("MILL-1"));
}

#[test]
fn waiting_for_load_handling_is_busy() {
    let loc = CountingLocator::default();
    let st = TransporterState {
        last_node_id: Some("HBW-1".into()),
        waiting_for_load_handling: true,
        ..Default::default()
    };
    let a = derive_transporter(&st, &loc);
    assert_eq!(a.availability, Availability::Busy);
    assert_eq!(a.last_module_serial.as_deref(), Some("HBW-1"));
}

#[test]
fn dps_with_workpiece_after_pick_is_ready_without_order() {
    let st = ModuleState {
        serial_number: "DPS-1".into(),
        action_state: finished("pick-1", Command::Pick),
        loads: vec![Load {
            load_type: Some(WorkpieceType::White),
            load_position: None,
            load_id: Some("04a1".into()),
        }],
        ..Default::default()
    };
    assert_eq!(
        derive_module(&st, ModuleType::Dps),
        Some(ModuleAvailability::ready())
    );
}

#[test]
fn warehouse_with_only_stored_loads_follows_its_action() {
    let mut st = ModuleState {
        serial_number: "HBW-1".into(),
        order_id: Some("o3".into()),
        loads: vec![Load {
            load_type: Some(WorkpieceType::Red),
            load_position: Some("A1".into()),
            load_id: None,
        }],
        ..Default::default()
    };
    assert_eq!(derive_module(&st, ModuleType::Hbw), Some(ModuleAvailability::ready()));

    st.action_state = Some(ActionState {
        id: "drop-1".into(),
        command: Command::Drop,
        state: ActionStatus::Running,
        timestamp: None,
        result: None,
    });
    assert_eq!(
        derive_module(&st, ModuleType::Hbw),
        Some(ModuleAvailability::for_order(Availability::Busy, Some("o3".into())))
    );
}

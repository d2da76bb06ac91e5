use ccu_schemas::{ActionStatus, Availability, ModuleState, ModuleType, TransporterState};

use crate::{ModuleAvailability, ModuleLocator, TransporterAvailability, UNKNOWN_NODE};

/// Road-network node ids are numeric; anything else is a module's physical id.
///
/// Fragile: it assumes road nodes never carry letters.
pub fn is_road_node(node_id: &str) -> bool {
    !node_id.is_empty() && node_id.chars().all(|c| c.is_ascii_digit())
}

fn non_empty(s: &Option<String>) -> Option<String> {
    s.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Derive transporter availability. First matching rule wins.
pub fn derive_transporter(
    state: &TransporterState,
    locator: &dyn ModuleLocator,
) -> TransporterAvailability {
    let make = |availability, last_module_serial| TransporterAvailability {
        availability,
        order_id: non_empty(&state.order_id),
        last_node_id: state.last_node_id.clone(),
        last_module_serial,
    };

    // 1) blocked
    if state.has_fatal_error()
        || state.paused
        || state.last_node_id.as_deref() == Some(UNKNOWN_NODE)
    {
        return make(Availability::Blocked, None);
    }

    // 2) moving or handing over a load
    if state.driving || state.waiting_for_load_handling {
        return make(Availability::Busy, last_module_serial(state, locator));
    }

    // 3) idle
    let idle = match &state.action_state {
        None => true,
        Some(a) => a.state == ActionStatus::Finished,
    };
    if idle {
        return make(Availability::Ready, last_module_serial(state, locator));
    }

    // 4) anything else
    make(Availability::Busy, last_module_serial(state, locator))
}

/// Module the transporter currently sits at, if determinable.
///
/// - driving ⇒ none
/// - non-numeric last node ⇒ that node is the module serial
/// - no action state, or action not finished ⇒ none
/// - otherwise: navigation target type of the finished action, then the
///   paired module of that type for the transporter's order
pub fn last_module_serial(state: &TransporterState, locator: &dyn ModuleLocator) -> Option<String> {
    if state.driving {
        return None;
    }
    let node = state.last_node_id.as_deref()?;
    if !is_road_node(node) {
        return Some(node.to_string());
    }
    let action = state.action_state.as_ref()?;
    if action.state != ActionStatus::Finished {
        return None;
    }
    let order_id = state.order_id.as_deref();
    let module_type = locator.navigation_target(order_id, &action.id)?;
    locator.paired_module(order_id, module_type)
}

/// Derive module availability.
///
/// Returns `None` when the report must not change the stored availability
/// (passive instrumentation actions such as a factsheet request).
pub fn derive_module(state: &ModuleState, module_type: ModuleType) -> Option<ModuleAvailability> {
    let order_id = non_empty(&state.order_id);

    if state.has_fatal_error() || state.paused {
        return Some(ModuleAvailability::for_order(Availability::Blocked, order_id));
    }

    if state.has_active_load() {
        let derived = match &state.action_state {
            None => match module_type {
                ModuleType::Dps if order_id.is_some() => {
                    ModuleAvailability::for_order(Availability::Ready, order_id)
                }
                ModuleType::Dps => ModuleAvailability::for_order(Availability::Busy, None),
                // Undefined state, a warehouse included: an operator has to look at the module.
                _ => ModuleAvailability::for_order(Availability::Blocked, order_id),
            },
            Some(a) if a.state == ActionStatus::Finished => {
                ModuleAvailability::for_order(Availability::Ready, order_id)
            }
            Some(_) => ModuleAvailability::for_order(Availability::Busy, order_id),
        };
        return Some(derived);
    }

    match &state.action_state {
        Some(a) if a.command.is_passive() => None,
        Some(a)
            if a.state == ActionStatus::Running
                || (!a.command.is_instant() && a.state != ActionStatus::Finished) =>
        {
            Some(ModuleAvailability::for_order(Availability::Busy, order_id))
        }
        _ => Some(ModuleAvailability::ready()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ccu_schemas::{ActionState, Command, Load, WorkpieceType};

    struct NoLocator;

    impl ModuleLocator for NoLocator {
        fn navigation_target(&self, _: Option<&str>, _: &str) -> Option<ModuleType> {
            None
        }
        fn paired_module(&self, _: Option<&str>, _: ModuleType) -> Option<String> {
            None
        }
    }

    fn action(command: Command, state: ActionStatus) -> Option<ActionState> {
        Some(ActionState {
            id: "a1".into(),
            command,
            state,
            timestamp: None,
            result: None,
        })
    }

    fn wip(load_type: WorkpieceType) -> Load {
        Load {
            load_type: Some(load_type),
            load_position: None,
            load_id: Some("wp-1".into()),
        }
    }

    #[test]
    fn road_node_detection() {
        assert!(is_road_node("17"));
        assert!(!is_road_node("SVR3QA0022"));
        assert!(!is_road_node(""));
    }

    #[test]
    fn transporter_at_module_id_reports_it_directly() {
        let st = TransporterState {
            last_node_id: Some("SVR4H76449".into()),
            ..Default::default()
        };
        let a = derive_transporter(&st, &NoLocator);
        assert_eq!(a.availability, Availability::Ready);
        assert_eq!(a.last_module_serial.as_deref(), Some("SVR4H76449"));
    }

    #[test]
    fn transporter_with_running_action_is_busy() {
        let st = TransporterState {
            last_node_id: Some("4".into()),
            action_state: action(Command::Dock, ActionStatus::Running),
            ..Default::default()
        };
        let a = derive_transporter(&st, &NoLocator);
        assert_eq!(a.availability, Availability::Busy);
        assert!(a.last_module_serial.is_none());
    }

    #[test]
    fn paused_module_is_blocked() {
        let st = ModuleState {
            paused: true,
            ..Default::default()
        };
        let a = derive_module(&st, ModuleType::Mill).unwrap();
        assert_eq!(a.availability, Availability::Blocked);
    }

    #[test]
    fn dps_with_active_load_and_order_is_ready_for_it() {
        let st = ModuleState {
            order_id: Some("o1".into()),
            loads: vec![wip(WorkpieceType::Red)],
            ..Default::default()
        };
        let a = derive_module(&st, ModuleType::Dps).unwrap();
        assert_eq!(a, ModuleAvailability::for_order(Availability::Ready, Some("o1".into())));

        let st = ModuleState {
            loads: vec![wip(WorkpieceType::Red)],
            ..Default::default()
        };
        assert_eq!(derive_module(&st, ModuleType::Dps).unwrap().availability, Availability::Busy);
    }

    #[test]
    fn processing_station_with_orphan_load_is_blocked() {
        let st = ModuleState {
            loads: vec![wip(WorkpieceType::Blue)],
            ..Default::default()
        };
        assert_eq!(
            derive_module(&st, ModuleType::Mill).unwrap().availability,
            Availability::Blocked
        );
    }

    #[test]
    fn warehouse_with_unstored_load_is_blocked() {
        let st = ModuleState {
            loads: vec![
                Load {
                    load_type: Some(WorkpieceType::Red),
                    load_position: Some("A1".into()),
                    load_id: None,
                },
                wip(WorkpieceType::White),
            ],
            ..Default::default()
        };
        assert_eq!(
            derive_module(&st, ModuleType::Hbw).unwrap().availability,
            Availability::Blocked
        );
    }

    #[test]
    fn active_load_follows_action_state() {
        let mut st = ModuleState {
            order_id: Some("o7".into()),
            loads: vec![wip(WorkpieceType::White)],
            action_state: action(Command::Mill, ActionStatus::Running),
            ..Default::default()
        };
        assert_eq!(
            derive_module(&st, ModuleType::Mill).unwrap(),
            ModuleAvailability::for_order(Availability::Busy, Some("o7".into()))
        );
        st.action_state = action(Command::Mill, ActionStatus::Finished);
        assert_eq!(
            derive_module(&st, ModuleType::Mill).unwrap(),
            ModuleAvailability::for_order(Availability::Ready, Some("o7".into()))
        );
    }

    #[test]
    fn factsheet_request_leaves_availability_alone() {
        let st = ModuleState {
            action_state: action(Command::FactsheetRequest, ActionStatus::Running),
            ..Default::default()
        };
        assert!(derive_module(&st, ModuleType::Drill).is_none());
    }

    #[test]
    fn unfinished_non_instant_action_keeps_module_busy() {
        let st = ModuleState {
            order_id: Some("o2".into()),
            action_state: action(Command::Drill, ActionStatus::Waiting),
            ..Default::default()
        };
        assert_eq!(
            derive_module(&st, ModuleType::Drill).unwrap().availability,
            Availability::Busy
        );

        let st = ModuleState {
            action_state: action(Command::Reset, ActionStatus::Waiting),
            ..Default::default()
        };
        assert_eq!(derive_module(&st, ModuleType::Drill).unwrap(), ModuleAvailability::ready());
    }
}

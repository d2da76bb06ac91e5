use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Command, WorkpieceType};

/// Derived availability of a transporter or module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    Ready,
    Busy,
    Blocked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorLevel {
    Warning,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceError {
    pub error_type: String,
    pub error_level: ErrorLevel,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    Waiting,
    Initializing,
    Running,
    Paused,
    Finished,
    Failed,
}

/// Outcome attached to a finished action (quality check only, today).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionResult {
    Passed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionState {
    pub id: String,
    pub command: Command,
    pub state: ActionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
}

/// A load carried by a device. Loads with a position are stored (warehouse
/// bays, transporter trays); a load without one is work in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Load {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_type: Option<WorkpieceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_position: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_id: Option<String>,
}

/// Periodic state report of a transporter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TransporterState {
    pub serial_number: String,
    pub order_id: Option<String>,
    pub last_node_id: Option<String>,
    pub driving: bool,
    pub paused: bool,
    pub waiting_for_load_handling: bool,
    pub errors: Vec<DeviceError>,
    pub action_state: Option<ActionState>,
    pub loads: Vec<Load>,
}

/// Periodic state report of a module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModuleState {
    pub serial_number: String,
    pub order_id: Option<String>,
    pub paused: bool,
    pub errors: Vec<DeviceError>,
    pub action_state: Option<ActionState>,
    pub loads: Vec<Load>,
}

pub fn has_fatal_error(errors: &[DeviceError]) -> bool {
    errors.iter().any(|e| e.error_level == ErrorLevel::Fatal)
}

impl TransporterState {
    pub fn has_fatal_error(&self) -> bool {
        has_fatal_error(&self.errors)
    }
}

impl ModuleState {
    pub fn has_fatal_error(&self) -> bool {
        has_fatal_error(&self.errors)
    }

    /// Loads without a stored position: work in progress.
    pub fn has_active_load(&self) -> bool {
        self.loads.iter().any(|l| l.load_position.is_none())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_module_state_decodes_with_defaults() {
        let st: ModuleState = serde_json::from_str(
            r#"{"serialNumber":"SVR4H73275","loads":[{"loadType":"WHITE","loadPosition":"A1"}]}"#,
        )
        .unwrap();
        assert_eq!(st.serial_number, "SVR4H73275");
        assert!(!st.paused);
        assert!(st.action_state.is_none());
        assert!(!st.has_active_load());
    }

    #[test]
    fn only_fatal_errors_count() {
        let mut st = TransporterState::default();
        st.errors.push(DeviceError {
            error_type: "lowBattery".into(),
            error_level: ErrorLevel::Warning,
            timestamp: Utc::now(),
        });
        assert!(!st.has_fatal_error());
        st.errors[0].error_level = ErrorLevel::Fatal;
        assert!(st.has_fatal_error());
    }
}

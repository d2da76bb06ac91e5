use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

// ---------------------------------------------------------------------------
// Station / material vocabulary
// ---------------------------------------------------------------------------

/// Fixed processing station types known to the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ModuleType {
    /// High-bay warehouse.
    Hbw,
    /// Input/output station (delivery and pickup).
    Dps,
    Mill,
    Drill,
    /// Quality check.
    Aiqs,
    Oven,
    /// Transporter charger.
    Chrg,
}

impl ModuleType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleType::Hbw => "HBW",
            ModuleType::Dps => "DPS",
            ModuleType::Mill => "MILL",
            ModuleType::Drill => "DRILL",
            ModuleType::Aiqs => "AIQS",
            ModuleType::Oven => "OVEN",
            ModuleType::Chrg => "CHRG",
        }
    }
}

impl fmt::Display for ModuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HBW" => Ok(ModuleType::Hbw),
            "DPS" => Ok(ModuleType::Dps),
            "MILL" => Ok(ModuleType::Mill),
            "DRILL" => Ok(ModuleType::Drill),
            "AIQS" => Ok(ModuleType::Aiqs),
            "OVEN" => Ok(ModuleType::Oven),
            "CHRG" => Ok(ModuleType::Chrg),
            other => Err(format!("unknown module type: {other}")),
        }
    }
}

/// Material / workpiece color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkpieceType {
    Red,
    White,
    Blue,
}

impl WorkpieceType {
    pub const ALL: [WorkpieceType; 3] =
        [WorkpieceType::Red, WorkpieceType::White, WorkpieceType::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkpieceType::Red => "RED",
            WorkpieceType::White => "WHITE",
            WorkpieceType::Blue => "BLUE",
        }
    }
}

impl fmt::Display for WorkpieceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkpieceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "RED" => Ok(WorkpieceType::Red),
            "WHITE" => Ok(WorkpieceType::White),
            "BLUE" => Ok(WorkpieceType::Blue),
            other => Err(format!("unknown workpiece type: {other}")),
        }
    }
}

/// Action commands understood by modules and transporters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command {
    Pick,
    Drop,
    Mill,
    Drill,
    CheckQuality,
    Fire,
    Dock,
    Pass,
    Turn,
    FactsheetRequest,
    Reset,
    #[serde(other)]
    Unknown,
}

impl Command {
    /// Instrumentation-only actions. They never change device availability.
    pub fn is_passive(&self) -> bool {
        matches!(self, Command::FactsheetRequest)
    }

    /// Actions that complete immediately on the device side.
    pub fn is_instant(&self) -> bool {
        matches!(self, Command::FactsheetRequest | Command::Reset)
    }
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Lifecycle state shared by steps and orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Enqueued,
    InProgress,
    Finished,
    Error,
    Cancelled,
}

impl StepState {
    /// `Finished`, `Error` and `Cancelled` accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Error | Self::Cancelled)
    }
}

/// Where a navigation starts: the transporter's current position, or a station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NavigationSource {
    Start,
    Module(ModuleType),
}

impl NavigationSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NavigationSource::Start => "START",
            NavigationSource::Module(m) => m.as_str(),
        }
    }
}

impl fmt::Display for NavigationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for NavigationSource {
    fn serialize<S: Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for NavigationSource {
    fn deserialize<D: Deserializer<'de>>(d: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        if raw.eq_ignore_ascii_case("START") {
            return Ok(NavigationSource::Start);
        }
        raw.parse::<ModuleType>()
            .map(NavigationSource::Module)
            .map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationStep {
    pub source: NavigationSource,
    pub target: ModuleType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManufactureStep {
    pub module_type: ModuleType,
    pub command: Command,
    /// Module chosen at dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Navigation(NavigationStep),
    Manufacture(ManufactureStep),
}

/// One unit of work within an order.
///
/// `dependent_action_id` names the step that must finish first. Within one
/// order the pointers form a single chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_action_id: Option<String>,
    pub state: StepState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: StepKind,
}

impl Step {
    pub fn navigation(
        source: NavigationSource,
        target: ModuleType,
        dependent_action_id: Option<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            dependent_action_id,
            state: StepState::Enqueued,
            started_at: None,
            stopped_at: None,
            kind: StepKind::Navigation(NavigationStep { source, target }),
        }
    }

    pub fn manufacture(
        module_type: ModuleType,
        command: Command,
        dependent_action_id: Option<String>,
    ) -> Self {
        Self {
            id: crate::new_id(),
            dependent_action_id,
            state: StepState::Enqueued,
            started_at: None,
            stopped_at: None,
            kind: StepKind::Manufacture(ManufactureStep {
                module_type,
                command,
                serial_number: None,
            }),
        }
    }

    pub fn as_navigation(&self) -> Option<&NavigationStep> {
        match &self.kind {
            StepKind::Navigation(n) => Some(n),
            StepKind::Manufacture(_) => None,
        }
    }

    pub fn as_manufacture(&self) -> Option<&ManufactureStep> {
        match &self.kind {
            StepKind::Manufacture(m) => Some(m),
            StepKind::Navigation(_) => None,
        }
    }

    pub fn as_manufacture_mut(&mut self) -> Option<&mut ManufactureStep> {
        match &mut self.kind {
            StepKind::Manufacture(m) => Some(m),
            StepKind::Navigation(_) => None,
        }
    }

    /// Station type this step operates at (navigation: its target).
    pub fn module_type(&self) -> ModuleType {
        match &self.kind {
            StepKind::Navigation(n) => n.target,
            StepKind::Manufacture(m) => m.module_type,
        }
    }

    /// Still schedulable or running.
    pub fn is_open(&self) -> bool {
        matches!(self.state, StepState::Enqueued | StepState::InProgress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn navigation_step_serializes_tagged_and_flat() {
        let step = Step::navigation(NavigationSource::Start, ModuleType::Hbw, None);
        let v = serde_json::to_value(&step).unwrap();
        assert_eq!(v["type"], "NAVIGATION");
        assert_eq!(v["source"], "START");
        assert_eq!(v["target"], "HBW");
        assert_eq!(v["state"], "ENQUEUED");
        assert!(v.get("dependentActionId").is_none());

        let back: Step = serde_json::from_value(v).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn unknown_command_decodes_to_unknown() {
        let c: Command = serde_json::from_str("\"CALIBRATION\"").unwrap();
        assert_eq!(c, Command::Unknown);
        assert!(!c.is_instant());
    }

    #[test]
    fn module_type_parses_case_insensitively() {
        assert_eq!("aiqs".parse::<ModuleType>().unwrap(), ModuleType::Aiqs);
        assert!("CONVEYOR".parse::<ModuleType>().is_err());
    }
}

//! Flow table: catalogue of named production flows.
//!
//! One table is owned by the engine; it starts from configured defaults and
//! can be merged from a persisted JSON source at runtime:
//!
//! ```text
//! { "BLUE": { "steps": ["DRILL", "MILL", "AIQS"] }, ... }
//! ```
//!
//! Merging only accepts entries that carry a well-formed `steps` array.
//! Anything else is reported as skipped and the flow previously configured
//! under that name stays in place.

use std::collections::BTreeMap;

use ccu_schemas::ModuleType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::{compile_production, ProductionDefinition};

/// Ordered list of stations a workpiece visits between HBW and DPS.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub steps: Vec<ModuleType>,
}

impl FlowDefinition {
    pub fn new(steps: impl Into<Vec<ModuleType>>) -> Self {
        Self {
            steps: steps.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowError {
    /// No flow with the given name is configured.
    UnknownFlow { name: String },
    /// Flow names must not be empty or whitespace.
    EmptyName,
    /// The persisted flow source is not a JSON object.
    NotAnObject,
}

impl std::fmt::Display for FlowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownFlow { name } => write!(f, "no production flow named '{name}'"),
            Self::EmptyName => write!(f, "flow name must not be empty"),
            Self::NotAnObject => write!(f, "flow source must be a JSON object keyed by flow name"),
        }
    }
}

impl std::error::Error for FlowError {}

/// Outcome of [`FlowTable::merge_json`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeReport {
    pub merged: Vec<String>,
    pub skipped: Vec<String>,
}

// ---------------------------------------------------------------------------
// FlowTable
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FlowTable {
    flows: BTreeMap<String, FlowDefinition>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stock flows, one per workpiece color.
    pub fn with_defaults() -> Self {
        let mut flows = BTreeMap::new();
        flows.insert(
            "BLUE".to_string(),
            FlowDefinition::new([ModuleType::Drill, ModuleType::Mill, ModuleType::Aiqs]),
        );
        flows.insert(
            "RED".to_string(),
            FlowDefinition::new([ModuleType::Mill, ModuleType::Aiqs]),
        );
        flows.insert(
            "WHITE".to_string(),
            FlowDefinition::new([ModuleType::Drill, ModuleType::Aiqs]),
        );
        Self { flows }
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        flow: FlowDefinition,
    ) -> Result<(), FlowError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(FlowError::EmptyName);
        }
        self.flows.insert(name, flow);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&FlowDefinition, FlowError> {
        self.flows.get(name).ok_or_else(|| FlowError::UnknownFlow {
            name: name.to_string(),
        })
    }

    pub fn names(&self) -> Vec<&str> {
        self.flows.keys().map(|k| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FlowDefinition)> {
        self.flows.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Compile the named flow. See [`compile_production`].
    pub fn compile(
        &self,
        name: &str,
        first_dependency: Option<String>,
    ) -> Result<ProductionDefinition, FlowError> {
        Ok(compile_production(self.get(name)?, first_dependency))
    }

    /// Merge flows from a persisted source. Valid entries replace or add;
    /// invalid ones are skipped.
    pub fn merge_json(&mut self, source: &Value) -> Result<MergeReport, FlowError> {
        let Value::Object(entries) = source else {
            return Err(FlowError::NotAnObject);
        };

        let mut report = MergeReport::default();
        for (name, entry) in entries {
            match parse_entry(name, entry) {
                Some(flow) => {
                    self.flows.insert(name.clone(), flow);
                    report.merged.push(name.clone());
                }
                None => {
                    warn!(flow = %name, "skipping malformed flow definition");
                    report.skipped.push(name.clone());
                }
            }
        }
        Ok(report)
    }
}

fn parse_entry(name: &str, entry: &Value) -> Option<FlowDefinition> {
    if name.trim().is_empty() {
        return None;
    }
    if !entry.get("steps").map(Value::is_array).unwrap_or(false) {
        return None;
    }
    serde_json::from_value(entry.clone()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_cover_every_color() {
        let t = FlowTable::with_defaults();
        assert_eq!(t.names(), vec!["BLUE", "RED", "WHITE"]);
        assert_eq!(t.get("RED").unwrap().steps, vec![ModuleType::Mill, ModuleType::Aiqs]);
    }

    #[test]
    fn merge_keeps_existing_flow_when_entry_is_malformed() {
        let mut t = FlowTable::with_defaults();
        let before = t.get("RED").unwrap().clone();

        let report = t
            .merge_json(&json!({
                "RED": { "stations": ["OVEN"] },
                "WHITE": { "steps": ["CONVEYOR"] },
                "GREEN": { "steps": ["OVEN", "AIQS"] },
            }))
            .unwrap();

        assert_eq!(report.merged, vec!["GREEN".to_string()]);
        assert_eq!(report.skipped.len(), 2);
        assert_eq!(t.get("RED").unwrap(), &before);
        assert_eq!(
            t.get("GREEN").unwrap().steps,
            vec![ModuleType::Oven, ModuleType::Aiqs]
        );
    }

    #[test]
    fn merge_rejects_non_object_source() {
        let mut t = FlowTable::new();
        assert_eq!(t.merge_json(&json!([1, 2])), Err(FlowError::NotAnObject));
    }

    #[test]
    fn unknown_flow_is_an_error() {
        let t = FlowTable::new();
        assert_eq!(
            t.compile("BLUE", None).unwrap_err(),
            FlowError::UnknownFlow {
                name: "BLUE".into()
            }
        );
    }
}

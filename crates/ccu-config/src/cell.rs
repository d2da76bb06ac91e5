use std::collections::BTreeMap;

use anyhow::{Context, Result};
use ccu_execution::EngineConfig;
use ccu_flows::{FlowTable, MergeReport};
use ccu_schemas::{ModuleType, WorkpieceType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Typed view of the merged configuration. Every section is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CellConfig {
    pub engine: EngineSection,
    pub warehouse: WarehouseSection,
    /// Named flows in the persisted flow-source shape
    /// (`{ NAME: { steps: [MODULE, ...] } }`), merged over the stock flows.
    pub flows: Value,
    pub pairing: PairingSection,
    pub daemon: DaemonSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSection {
    pub max_parallel_production_orders: usize,
    /// Seconds per timed station type, e.g. `MILL: 45`.
    pub process_durations: BTreeMap<ModuleType, u64>,
    pub completed_history: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        let d = EngineConfig::default();
        Self {
            max_parallel_production_orders: d.max_parallel_production_orders,
            process_durations: d.process_durations,
            completed_history: d.completed_history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarehouseSection {
    pub default_bays: BTreeMap<WorkpieceType, u32>,
}

impl Default for WarehouseSection {
    fn default() -> Self {
        Self {
            default_bays: EngineConfig::default().default_bays,
        }
    }
}

/// Devices paired at startup. Transporters that report without being listed
/// are paired on first report by the daemon.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PairingSection {
    pub modules: BTreeMap<String, ModuleType>,
    pub transporters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSection {
    pub bind_addr: String,
    pub heartbeat_ms: u64,
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8899".to_string(),
            heartbeat_ms: 1000,
        }
    }
}

impl CellConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_parallel_production_orders: self.engine.max_parallel_production_orders,
            process_durations: self.engine.process_durations.clone(),
            default_bays: self.warehouse.default_bays.clone(),
            completed_history: self.engine.completed_history,
        }
    }

    /// Stock flows with the configured ones merged on top. Malformed entries
    /// are reported as skipped.
    pub fn flow_table(&self) -> Result<(FlowTable, MergeReport)> {
        let mut table = FlowTable::with_defaults();
        if self.flows.is_null() {
            return Ok((table, MergeReport::default()));
        }
        let report = table
            .merge_json(&self.flows)
            .context("invalid `flows` section")?;
        Ok((table, report))
    }
}

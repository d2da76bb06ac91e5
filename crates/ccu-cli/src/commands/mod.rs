//! Command handler modules for ccu-cli.
//!
//! Shared utilities used by multiple command paths live here.
//! Command-specific logic lives in the submodules.

pub mod flows;

use anyhow::Result;
use ccu_config::{report_unused_keys, ConfigConsumer, UnusedKeyPolicy};
use ccu_flows::FlowTable;
use tracing::warn;

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

/// Flow table for the given layered config. No paths means stock flows.
pub fn load_flow_table(config_paths: &[String]) -> Result<FlowTable> {
    if config_paths.is_empty() {
        return Ok(FlowTable::with_defaults());
    }
    let path_refs: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let loaded = ccu_config::load_layered_yaml(&path_refs)?;

    let report = report_unused_keys(
        ConfigConsumer::FlowTool,
        &loaded.config_json,
        UnusedKeyPolicy::Warn,
    )?;
    if !report.is_clean() {
        tracing::debug!(
            ignored = report.unused_leaf_pointers.len(),
            "config keys outside /flows ignored"
        );
    }

    let (table, merge) = loaded.cell()?.flow_table()?;
    for name in &merge.skipped {
        warn!(flow = %name, "configured flow skipped: malformed");
    }
    Ok(table)
}

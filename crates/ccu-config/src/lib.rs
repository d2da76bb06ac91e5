//! ccu-config
//!
//! Layered YAML configuration for the cell controller.
//!
//! - YAML documents are deep-merged in order (later layers win) into one
//!   `serde_json::Value`, serialized canonically and hashed (SHA-256), so a
//!   running daemon can report exactly which configuration it was built from.
//! - [`CellConfig`] is the typed view of the merged value.
//! - [`report_unused_keys`] lists leaf keys nobody reads.

use anyhow::{Context, Result};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs;

mod cell;
mod unused;

pub use cell::{CellConfig, DaemonSection, EngineSection, PairingSection, WarehouseSection};
pub use unused::{
    consumed_pointers, report_unused_keys, ConfigConsumer, UnusedKeyPolicy, UnusedKeyReport,
};

#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config_hash: String,
    pub canonical_json: String,
    pub config_json: Value,
}

impl LoadedConfig {
    /// Typed view of the merged document.
    pub fn cell(&self) -> Result<CellConfig> {
        serde_json::from_value(self.config_json.clone())
            .context("config does not match the cell schema")
    }
}

pub fn load_layered_yaml(paths: &[&str]) -> Result<LoadedConfig> {
    let mut docs: Vec<String> = Vec::new();
    for p in paths {
        let raw =
            fs::read_to_string(p).with_context(|| format!("failed to read yaml path: {p}"))?;
        docs.push(raw);
    }

    let doc_refs: Vec<&str> = docs.iter().map(|s| s.as_str()).collect();
    load_layered_yaml_from_strings(&doc_refs)
}

pub fn load_layered_yaml_from_strings(yaml_docs: &[&str]) -> Result<LoadedConfig> {
    // Earlier docs are the base, later docs override.
    let mut merged = serde_json::json!({});
    for raw in yaml_docs {
        let v_yaml: serde_yaml::Value = serde_yaml::from_str(raw).context("invalid yaml")?;
        // An empty document parses to null; it contributes nothing.
        if v_yaml.is_null() {
            continue;
        }
        let v_json = serde_json::to_value(v_yaml).context("yaml->json conversion failed")?;
        merged = deep_merge(merged, v_json);
    }

    let canonical_json = canonicalize_json(&merged)?;
    let config_hash = sha256_hex(canonical_json.as_bytes());
    Ok(LoadedConfig {
        config_hash,
        canonical_json,
        config_json: merged,
    })
}

fn deep_merge(a: Value, b: Value) -> Value {
    match (a, b) {
        (Value::Object(mut a_map), Value::Object(b_map)) => {
            for (k, b_val) in b_map {
                let a_val = a_map.remove(&k).unwrap_or(Value::Null);
                a_map.insert(k, deep_merge(a_val, b_val));
            }
            Value::Object(a_map)
        }
        (_, b_other) => b_other,
    }
}

fn canonicalize_json(v: &Value) -> Result<String> {
    // serde_json::Map is key-sorted (no preserve_order), so compact output is canonical.
    serde_json::to_string(v).context("canonical json serialize failed")
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overrides_leaves_and_keeps_siblings() {
        let merged = deep_merge(
            json!({
                "engine": {
                    "max_parallel_production_orders": 1,
                    "process_durations": { "MILL": 30 },
                }
            }),
            json!({"engine": {"max_parallel_production_orders": 2}}),
        );
        assert_eq!(merged["engine"]["max_parallel_production_orders"], 2);
        assert_eq!(merged["engine"]["process_durations"]["MILL"], 30);
    }

    #[test]
    fn arrays_are_replaced_not_concatenated() {
        let merged = deep_merge(
            json!({"flows": {"RED": {"steps": ["MILL", "AIQS"]}}}),
            json!({"flows": {"RED": {"steps": ["OVEN"]}}}),
        );
        assert_eq!(merged["flows"]["RED"]["steps"], json!(["OVEN"]));
    }

    #[test]
    fn empty_layer_is_ignored() {
        let layer = "engine:\n  max_parallel_production_orders: 2\n";
        let a = load_layered_yaml_from_strings(&[layer]).unwrap();
        let b = load_layered_yaml_from_strings(&[layer, ""]).unwrap();
        assert_eq!(a.config_hash, b.config_hash);
    }
}

//! `ccu flows ...`

use anyhow::Result;
use ccu_flows::{compile_storage, FlowTable};
use ccu_schemas::{Step, StepChain, StepKind};

/// Name under which the fixed storage route is compiled.
pub const STORAGE: &str = "STORAGE";

/// `NAME: STATION -> STATION`, sorted by name.
pub fn list_lines(table: &FlowTable) -> Vec<String> {
    table
        .names()
        .into_iter()
        .filter_map(|name| {
            let def = table.get(name).ok()?;
            let stations: Vec<&str> = def.steps.iter().map(|m| m.as_str()).collect();
            Some(format!("{name}: {}", stations.join(" -> ")))
        })
        .collect()
}

pub fn compile(table: &FlowTable, name: &str) -> Result<StepChain> {
    let def = if name.eq_ignore_ascii_case(STORAGE) {
        compile_storage()
    } else {
        table.compile(name, None)?
    };
    Ok(def.into_chain())
}

pub fn summary_lines(chain: &StepChain) -> Vec<String> {
    chain
        .iter()
        .enumerate()
        .map(|(i, s)| format!("{:>2} {}", i + 1, describe(s)))
        .collect()
}

fn describe(step: &Step) -> String {
    match &step.kind {
        StepKind::Navigation(n) => format!("NAVIGATION {} -> {}", n.source, n.target.as_str()),
        StepKind::Manufacture(m) => {
            let command = serde_json::to_value(m.command)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            format!("MANUFACTURE {} {}", m.module_type.as_str(), command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_shows_stock_flows_in_name_order() {
        let lines = list_lines(&FlowTable::with_defaults());
        assert_eq!(
            lines,
            vec![
                "BLUE: DRILL -> MILL -> AIQS",
                "RED: MILL -> AIQS",
                "WHITE: DRILL -> AIQS",
            ]
        );
    }

    #[test]
    fn red_summary_reads_as_the_station_tour() {
        let chain = compile(&FlowTable::with_defaults(), "RED").unwrap();
        let lines = summary_lines(&chain);
        assert_eq!(lines.len(), 12);
        assert_eq!(lines[0], " 1 NAVIGATION START -> HBW");
        assert_eq!(lines[1], " 2 MANUFACTURE HBW DROP");
        assert_eq!(lines[8], " 9 MANUFACTURE AIQS CHECK_QUALITY");
        assert_eq!(lines[11], "12 MANUFACTURE DPS PICK");
    }

    #[test]
    fn storage_name_compiles_fixed_route() {
        let chain = compile(&FlowTable::new(), "storage").unwrap();
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn unknown_flow_is_an_error() {
        let err = compile(&FlowTable::with_defaults(), "PAINT").unwrap_err();
        assert!(err.to_string().contains("PAINT"));
    }
}

//! An idle transporter parked on the target module.
//!
//! GREEN when:
//! - The navigation waits and a clear-node command goes to the parked,
//!   unassigned transporter.
//! - Once that transporter reports elsewhere, the navigation dispatches.

use ccu_execution::{CellCommand, EngineConfig};
use ccu_schemas::{OrderRequest, StepState, WorkpieceType};
use ccu_testkit::{transporter_at, CellHarness, FTS, HBW};

const FTS_2: &str = "FTS-2";

#[tokio::test]
async fn parked_transporter_is_asked_to_clear_the_node() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    h.pairing.register_transporter(FTS_2);
    h.engine
        .handle_transporter_state(&transporter_at(FTS_2, HBW))
        .await;

    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let first = order.production_steps.iter().next().unwrap().id.clone();

    let o = h.order(&order.order_id).await;
    assert_eq!(
        o.production_steps.get(&first).map(|s| s.state),
        Some(StepState::Enqueued)
    );
    assert!(h.dispatcher.navigations().is_empty());
    assert!(h.dispatcher.sent().contains(&CellCommand::ClearModuleNode {
        transporter: FTS_2.to_string(),
        module_serial: HBW.to_string(),
    }));

    h.engine
        .handle_transporter_state(&transporter_at(FTS_2, "2"))
        .await;

    let navs = h.dispatcher.navigations();
    assert_eq!(navs.len(), 1);
    assert_eq!(navs[0].transporter, FTS);
    assert_eq!(navs[0].target_serial, HBW);
}

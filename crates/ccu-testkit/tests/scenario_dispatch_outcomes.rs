//! What happens when a command cannot go out, or a device reports failure.
//!
//! GREEN when:
//! - RetryLater puts the step back to ENQUEUED, undoes the fresh transporter
//!   assignment and path claim, and the next pass dispatches it.
//! - A fatal dispatch marks the step ERROR and it is never retried.
//! - A fatal dispatch frees what the attempt claimed: the transporter and its
//!   path after a navigation, the module after a production command. Other
//!   orders can use them right away.
//! - A FAILED action marks the step ERROR and the order does not advance.

use ccu_execution::{DispatchOutcome, EngineConfig, PairingRegistry};
use ccu_schemas::{Command, ModuleType, OrderRequest, StepState, WorkpieceType};
use ccu_testkit::{manufacture_step, CellHarness, FTS, MILL};

fn two_in_parallel() -> EngineConfig {
    EngineConfig {
        max_parallel_production_orders: 2,
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn retry_later_requeues_and_next_tick_dispatches() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    h.dispatcher
        .script_navigation(DispatchOutcome::retry_later("fleet controller offline"));

    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let first = order.production_steps.iter().next().unwrap().id.clone();

    let o = h.order(&order.order_id).await;
    assert_eq!(o.state, StepState::InProgress);
    assert_eq!(
        o.production_steps.get(&first).map(|s| s.state),
        Some(StepState::Enqueued)
    );
    let attempts = h.dispatcher.attempts();
    assert_eq!(attempts.len(), 1);
    assert!(matches!(attempts[0].outcome, DispatchOutcome::RetryLater { .. }));
    assert!(h.pairing.device(FTS).and_then(|d| d.assigned_order).is_none());
    assert_eq!(h.nodes.nodes_of(FTS), vec!["1".to_string()]);

    h.engine.tick().await;

    let o = h.order(&order.order_id).await;
    assert_eq!(
        o.production_steps.get(&first).map(|s| s.state),
        Some(StepState::InProgress)
    );
    assert_eq!(h.dispatcher.navigations().len(), 1);
    assert_eq!(
        h.pairing.device(FTS).and_then(|d| d.assigned_order),
        Some(order.order_id.clone())
    );
}

#[tokio::test]
async fn fatal_dispatch_marks_step_error_for_good() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    h.dispatcher
        .script_production(DispatchOutcome::fatal("warehouse rejected command"));

    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let first = order.production_steps.iter().next().unwrap().id.clone();
    let warehouse_drop = manufacture_step(&order, ModuleType::Hbw, Command::Drop).unwrap();

    h.finish(&order.order_id, &first).await;

    let o = h.order(&order.order_id).await;
    assert_eq!(
        o.production_steps.get(&warehouse_drop).map(|s| s.state),
        Some(StepState::Error)
    );
    assert_eq!(o.state, StepState::InProgress);

    let before = h.dispatcher.attempts().len();
    h.engine.tick().await;
    assert_eq!(h.dispatcher.attempts().len(), before);
    assert!(h.dispatcher.productions().is_empty());
}

#[tokio::test]
async fn fatal_navigation_frees_transporter_for_next_order() {
    let h = CellHarness::stocked(two_in_parallel(), 2).await;
    h.dispatcher
        .script_navigation(DispatchOutcome::fatal("fleet controller rejected route"));

    let dead = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let o = h.order(&dead.order_id).await;
    assert_eq!(
        o.production_steps.iter().next().map(|s| s.state),
        Some(StepState::Error)
    );
    assert!(h.pairing.device(FTS).and_then(|d| d.assigned_order).is_none());
    assert_eq!(h.nodes.nodes_of(FTS), vec!["1".to_string()]);
    assert_eq!(h.pairing.all_ready_unassigned_transporters(), vec![FTS.to_string()]);

    let next = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let o = h.order(&next.order_id).await;
    assert_eq!(
        o.production_steps.iter().next().map(|s| s.state),
        Some(StepState::InProgress)
    );
    let navs = h.dispatcher.navigations();
    assert_eq!(navs.len(), 1);
    assert_eq!(navs[0].order_id, next.order_id);
    assert_eq!(navs[0].transporter, FTS);
    assert_eq!(
        h.pairing.device(FTS).and_then(|d| d.assigned_order),
        Some(next.order_id.clone())
    );
}

#[tokio::test]
async fn fatal_production_command_frees_the_module() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    // Warehouse DROP goes out, the mill refuses its PICK.
    h.dispatcher.script_production(DispatchOutcome::Dispatched);
    h.dispatcher
        .script_production(DispatchOutcome::fatal("mill rejected command"));

    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let mill_pick = manufacture_step(&order, ModuleType::Mill, Command::Pick).unwrap();
    assert!(!h.run_until_running(&order.order_id, &mill_pick).await);

    let o = h.order(&order.order_id).await;
    assert_eq!(
        o.production_steps.get(&mill_pick).map(|s| s.state),
        Some(StepState::Error)
    );
    assert!(h.pairing.device(MILL).and_then(|d| d.assigned_order).is_none());
    assert_eq!(
        h.pairing
            .ready_for_module_type(ModuleType::Mill, Some("another-order"))
            .as_deref(),
        Some(MILL)
    );
}

#[tokio::test]
async fn failed_action_stops_the_order_in_place() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let first = order.production_steps.iter().next().unwrap().id.clone();
    let before = h.dispatcher.attempts().len();

    h.fail(&order.order_id, &first).await;

    let o = h.order(&order.order_id).await;
    assert_eq!(o.state, StepState::InProgress);
    let states: Vec<_> = o.production_steps.iter().map(|s| s.state).collect();
    assert_eq!(states[0], StepState::Error);
    assert!(states[1..].iter().all(|s| *s == StepState::Enqueued));
    assert_eq!(h.dispatcher.attempts().len(), before);

    // A late FINISHED for the same step changes nothing.
    h.finish(&order.order_id, &first).await;
    let o = h.order(&order.order_id).await;
    assert_eq!(o.production_steps.iter().next().map(|s| s.state), Some(StepState::Error));
    assert_eq!(h.dispatcher.attempts().len(), before);
}

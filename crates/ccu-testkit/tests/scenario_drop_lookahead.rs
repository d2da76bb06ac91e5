//! Transporter selection for a DROP after a processing step.
//!
//! GREEN when:
//! - A ready transporter standing at the module gets its bay reserved and
//!   the drop goes out directly, with no extra navigation step.
//! - A transporter report carrying a finished navigation advances the order
//!   and records which module the transporter stands at.

use ccu_execution::EngineConfig;
use ccu_schemas::{
    ActionState, ActionStatus, Command, ModuleType, OrderRequest, StepState, TransporterState,
    WorkpieceType,
};
use ccu_testkit::{manufacture_step, transporter_at, CellHarness, FTS, HBW, MILL};

#[tokio::test]
async fn parked_transporter_takes_the_drop_directly() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let milling = manufacture_step(&order, ModuleType::Mill, Command::Mill).unwrap();
    let drop = manufacture_step(&order, ModuleType::Mill, Command::Drop).unwrap();

    assert!(h.run_until_running(&order.order_id, &milling).await);
    // The station took the workpiece; the transporter is free and waits at the mill.
    assert!(h.pairing.device(FTS).and_then(|d| d.assigned_order).is_none());
    h.engine
        .handle_transporter_state(&transporter_at(FTS, MILL))
        .await;

    h.finish(&order.order_id, &milling).await;

    let o = h.order(&order.order_id).await;
    assert_eq!(o.production_steps.len(), 12, "no fetch leg spliced");
    assert_eq!(
        o.production_steps.get(&drop).map(|s| s.state),
        Some(StepState::InProgress)
    );
    assert_eq!(
        h.pairing.device(FTS).and_then(|d| d.assigned_order),
        Some(order.order_id.clone())
    );
    let last = h.dispatcher.productions().pop().unwrap();
    assert_eq!((last.module_serial.as_str(), last.command), (MILL, Command::Drop));
}

#[tokio::test]
async fn finished_navigation_report_advances_the_order() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let first = order.production_steps.iter().next().unwrap().id.clone();
    assert_eq!(
        h.order(&order.order_id).await.production_steps.get(&first).map(|s| s.state),
        Some(StepState::InProgress)
    );

    let report = TransporterState {
        order_id: Some(order.order_id.clone()),
        action_state: Some(ActionState {
            id: first.clone(),
            command: Command::Dock,
            state: ActionStatus::Finished,
            timestamp: None,
            result: None,
        }),
        ..transporter_at(FTS, "1")
    };
    h.engine.handle_transporter_state(&report).await;

    let device = h.pairing.device(FTS).unwrap();
    assert_eq!(device.last_module_serial.as_deref(), Some(HBW));
    assert_eq!(h.nodes.nodes_of(FTS), vec!["1".to_string()]);

    let o = h.order(&order.order_id).await;
    assert_eq!(
        o.production_steps.get(&first).map(|s| s.state),
        Some(StepState::Finished)
    );
    let warehouse_drop = manufacture_step(&o, ModuleType::Hbw, Command::Drop).unwrap();
    assert_eq!(
        o.production_steps.get(&warehouse_drop).map(|s| s.state),
        Some(StepState::InProgress)
    );
}

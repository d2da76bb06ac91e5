//! Two production orders in a row, driven only by device telemetry.
//!
//! Devices answer the way the real cell does: the transporter keeps
//! reporting the order id it last served, stations report BUSY while they
//! work and hold the workpiece until DROP, and the warehouse reports its
//! bays after handing a piece out.
//!
//! GREEN when:
//! - the first order finishes with the transporter waiting at each station,
//!   so no fetch leg is needed;
//! - the transporter still reporting the finished order's id is picked for
//!   the next order;
//! - the second order finishes and the warehouse stock reflects both drops.

use ccu_execution::{EngineConfig, PairingRegistry};
use ccu_schemas::{Availability, OrderRequest, StepState, WorkpieceType};
use ccu_testkit::{idle_module, CellHarness, DPS, FTS, HBW};

#[tokio::test]
async fn transporter_reporting_last_order_serves_the_next_one() {
    let h = CellHarness::stocked(EngineConfig::default(), 2).await;

    let first = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    assert_eq!(h.report_until_idle(&first.order_id).await, 12);
    assert_eq!(h.order(&first.order_id).await.state, StepState::Finished);

    let fts = h.pairing.device(FTS).unwrap();
    assert_eq!(fts.availability, Some(Availability::Ready));
    assert_eq!(fts.reported_order.as_deref(), Some(first.order_id.as_str()));
    assert_eq!(fts.last_node_id.as_deref(), Some(DPS));
    assert!(fts.assigned_order.is_none());

    // The operator takes the finished piece out of the output station.
    h.engine.handle_module_state(&idle_module(DPS)).await;

    let second = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    h.engine.tick().await;

    let o = h.order(&second.order_id).await;
    assert_eq!(o.state, StepState::InProgress);
    assert_eq!(
        o.production_steps.iter().next().map(|s| s.state),
        Some(StepState::InProgress)
    );
    let nav = h.dispatcher.navigations().pop().unwrap();
    assert_eq!(nav.order_id, second.order_id);
    assert_eq!(nav.transporter, FTS);
    assert_eq!(nav.path, vec![DPS.to_string(), HBW.to_string()]);

    assert_eq!(h.report_until_idle(&second.order_id).await, 12);
    assert_eq!(h.order(&second.order_id).await.state, StepState::Finished);
    assert_eq!(
        h.engine
            .with_ledger(|l| l.available_workpieces(WorkpieceType::Red))
            .await,
        0
    );
    assert_eq!(
        h.engine
            .with_ledger(|l| l.available_workpieces(WorkpieceType::White))
            .await,
        2
    );
}

#[tokio::test]
async fn stations_report_busy_while_processing() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    let order = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();

    // Navigation to the warehouse, then the warehouse hands the piece out.
    assert!(h.report_running_step(&order.order_id).await);
    assert!(h.report_running_step(&order.order_id).await);
    assert_eq!(
        h.engine
            .with_ledger(|l| l.available_workpieces(WorkpieceType::Red))
            .await,
        0
    );
    let warehouse = h.pairing.device(HBW).unwrap();
    assert_eq!(warehouse.availability, Some(Availability::Ready));
    assert!(warehouse.reported_order.is_none());

    // Navigation to the first station, then its PICK: the station now holds
    // the workpiece for this order only.
    assert!(h.report_running_step(&order.order_id).await);
    assert!(h.report_running_step(&order.order_id).await);
    let o = h.order(&order.order_id).await;
    let pick = o
        .production_steps
        .iter()
        .filter(|s| s.state == StepState::Finished)
        .last()
        .and_then(|s| s.as_manufacture())
        .and_then(|m| m.serial_number.clone())
        .unwrap();
    let station = h.pairing.device(&pick).unwrap();
    assert_eq!(station.availability, Some(Availability::Ready));
    assert_eq!(station.reported_order.as_deref(), Some(order.order_id.as_str()));
    assert!(!h.pairing.is_ready_for_order(&pick, "someone-else"));
}

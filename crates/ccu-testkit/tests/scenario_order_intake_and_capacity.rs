//! Order intake, parallelism limits, cancellation and reset.
//!
//! GREEN when:
//! - A storage order with an empty definition is rejected, reserves nothing
//!   and asks the input station to discard the workpiece.
//! - PRODUCTION orders beyond the parallel limit stay queued; STORAGE orders
//!   start regardless.
//! - Only queued orders can be cancelled.
//! - Resetting an active order frees its reservation and devices, and lets
//!   the next queued order start.
//! - An order with nothing to reserve waits in the queue.

use ccu_execution::{CellCommand, EngineConfig, EngineError};
use ccu_flows::ProductionDefinition;
use ccu_ledger::ReservationKind;
use ccu_schemas::{OrderRequest, OrderType, StepState, WorkpieceType};
use ccu_testkit::{CellHarness, DPS, FTS, HBW};

#[tokio::test]
async fn empty_storage_definition_is_rejected_and_discarded() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;

    let err = h
        .engine
        .submit_order(
            OrderRequest::storage(WorkpieceType::White, None),
            ProductionDefinition::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::EmptyDefinition {
            order_type: OrderType::Storage
        }
    ));

    assert!(h.engine.queued_orders().await.is_empty());
    assert!(h.engine.active_orders().await.is_empty());
    let reserved = h
        .engine
        .with_ledger(|l| l.reserved_count(ReservationKind::Bay, HBW, WorkpieceType::White))
        .await;
    assert_eq!(reserved, 0);
    assert_eq!(
        h.dispatcher.sent(),
        vec![CellCommand::DiscardWorkpiece {
            dps_serial: DPS.to_string()
        }]
    );
}

#[tokio::test]
async fn unknown_flow_is_rejected_up_front() {
    let h = CellHarness::stocked(EngineConfig::default(), 1).await;
    let mut req = OrderRequest::production(WorkpieceType::Red);
    req.flow = Some("PAINT".into());

    let err = h.engine.request_order(req).await.unwrap_err();
    assert!(matches!(err, EngineError::UnknownFlow(_)));
    assert!(h.engine.queued_orders().await.is_empty());
    assert!(h.dispatcher.attempts().is_empty());
}

#[tokio::test]
async fn production_limit_queues_but_storage_is_exempt() {
    let h = CellHarness::stocked(EngineConfig::default(), 2).await;

    let first = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let second = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let storage = h
        .engine
        .request_order(OrderRequest::storage(WorkpieceType::Blue, None))
        .await
        .unwrap();

    assert_eq!(h.order(&first.order_id).await.state, StepState::InProgress);
    assert_eq!(h.order(&second.order_id).await.state, StepState::Enqueued);
    assert_eq!(h.order(&storage.order_id).await.state, StepState::InProgress);

    let queued: Vec<_> = h
        .engine
        .queued_orders()
        .await
        .into_iter()
        .map(|o| o.order_id)
        .collect();
    assert_eq!(queued, vec![second.order_id.clone()]);

    // The storage order holds its bay even though its first leg waits for
    // the only transporter.
    assert!(h
        .engine
        .with_ledger(|l| l.warehouse_for_order(&storage.order_id).is_some())
        .await);
    assert!(h
        .engine
        .with_ledger(|l| l.warehouse_for_order(&second.order_id).is_none())
        .await);
}

#[tokio::test]
async fn cancel_only_touches_queued_orders() {
    let h = CellHarness::stocked(EngineConfig::default(), 2).await;

    let running = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let waiting = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();

    let cancelled = h
        .engine
        .cancel_orders(&[
            waiting.order_id.clone(),
            running.order_id.clone(),
            "no-such-order".to_string(),
        ])
        .await;
    assert_eq!(cancelled, vec![waiting.order_id.clone()]);

    let w = h.order(&waiting.order_id).await;
    assert_eq!(w.state, StepState::Cancelled);
    assert!(w.stopped_at.is_some());
    assert!(w
        .production_steps
        .iter()
        .all(|s| s.state == StepState::Cancelled));

    let r = h.order(&running.order_id).await;
    assert_eq!(r.state, StepState::InProgress);
    assert!(r.production_steps.iter().any(|s| s.state == StepState::InProgress));

    let completed = h.publisher.latest_completed();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0].order_id, waiting.order_id);
}

#[tokio::test]
async fn reset_frees_capacity_for_the_next_order() {
    let h = CellHarness::stocked(EngineConfig::default(), 2).await;

    let first = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    let second = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Red))
        .await
        .unwrap();
    assert_eq!(
        h.pairing.device(FTS).and_then(|d| d.assigned_order),
        Some(first.order_id.clone())
    );

    h.engine.reset_order(&first.order_id).await.unwrap();

    let reset = h.order(&first.order_id).await;
    assert_eq!(reset.state, StepState::Cancelled);
    assert!(reset.production_steps.iter().all(|s| !s.is_open()));
    assert!(h
        .engine
        .with_ledger(|l| l.warehouse_for_order(&first.order_id).is_none())
        .await);

    // The queued order took over the warehouse and the transporter.
    let next = h.order(&second.order_id).await;
    assert_eq!(next.state, StepState::InProgress);
    assert_eq!(
        h.pairing.device(FTS).and_then(|d| d.assigned_order),
        Some(second.order_id.clone())
    );
    let navs = h.dispatcher.navigations();
    assert_eq!(navs.len(), 2);
    assert_eq!(navs[1].order_id, second.order_id);

    // Resetting again is an error: the order is no longer active.
    assert!(matches!(
        h.engine.reset_order(&first.order_id).await,
        Err(EngineError::OrderNotActive { .. })
    ));
}

#[tokio::test]
async fn order_without_stock_waits_until_the_warehouse_reports_it() {
    let h = CellHarness::new(EngineConfig::default()).await;

    let o = h
        .engine
        .request_order(OrderRequest::production(WorkpieceType::Blue))
        .await
        .unwrap();
    assert_eq!(h.order(&o.order_id).await.state, StepState::Enqueued);
    assert!(h.dispatcher.attempts().is_empty());

    h.stock_warehouse(&[("C1", WorkpieceType::Blue)]).await;

    assert_eq!(h.order(&o.order_id).await.state, StepState::InProgress);
    assert_eq!(h.dispatcher.navigations().len(), 1);
}

//! Axum router and all HTTP handlers for ccu-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. Handlers only translate between HTTP and the engine.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use ccu_execution::{CellCommand, EngineError, PairingRegistry};
use ccu_schemas::{ModuleState, OrderRequest, TransporterState};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{info, warn};

use crate::{
    api_types::{
        CancelOrdersRequest, CancelOrdersResponse, ErrorResponse, FlowsReloadResponse,
        HealthResponse, ResetOrderResponse, TelemetryAck,
    },
    state::{AppState, BusMsg},
};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/stream", get(stream))
        .route("/v1/commands", get(command_stream))
        .route("/v1/orders", post(create_order))
        .route("/v1/orders/cancel", post(cancel_orders))
        .route("/v1/orders/:id/reset", post(reset_order))
        .route("/v1/orders/queued", get(queued_orders))
        .route("/v1/orders/active", get(active_orders))
        .route("/v1/orders/completed", get(completed_orders))
        .route("/v1/stock", get(stock))
        .route("/v1/telemetry/transporter", post(transporter_telemetry))
        .route("/v1/telemetry/module", post(module_telemetry))
        .route("/v1/flows", get(list_flows))
        .route("/v1/flows/reload", post(reload_flows))
        .with_state(state)
}

fn error_response(status: StatusCode, code: &str, error: impl ToString) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            code: code.to_string(),
        }),
    )
        .into_response()
}

fn engine_error(e: EngineError) -> Response {
    let (status, code) = match &e {
        EngineError::EmptyDefinition { .. } => {
            (StatusCode::UNPROCESSABLE_ENTITY, "EMPTY_DEFINITION")
        }
        EngineError::UnknownFlow(_) => (StatusCode::NOT_FOUND, "UNKNOWN_FLOW"),
        EngineError::ReservationConflict(_) => (StatusCode::CONFLICT, "RESERVATION_CONFLICT"),
        EngineError::OrderNotActive { .. } => (StatusCode::NOT_FOUND, "ORDER_NOT_ACTIVE"),
    };
    error_response(status, code, e)
}

// ---------------------------------------------------------------------------
// GET /v1/health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            ok: true,
            service: st.build.service.to_string(),
            version: st.build.version.to_string(),
            config_hash: st.config_hash.clone(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub(crate) async fn create_order(
    State(st): State<Arc<AppState>>,
    Json(req): Json<OrderRequest>,
) -> Response {
    match st.engine.request_order(req).await {
        Ok(order) => {
            info!(order_id = %order.order_id, "order accepted");
            (StatusCode::CREATED, Json(order)).into_response()
        }
        Err(e) => {
            warn!(error = %e, "order rejected");
            engine_error(e)
        }
    }
}

pub(crate) async fn cancel_orders(
    State(st): State<Arc<AppState>>,
    Json(req): Json<CancelOrdersRequest>,
) -> impl IntoResponse {
    let cancelled = st.engine.cancel_orders(&req.order_ids).await;
    (StatusCode::OK, Json(CancelOrdersResponse { cancelled }))
}

pub(crate) async fn reset_order(
    State(st): State<Arc<AppState>>,
    Path(order_id): Path<String>,
) -> Response {
    match st.engine.reset_order(&order_id).await {
        Ok(()) => {
            let _ = st.bus.send(BusMsg::LogLine {
                level: "WARN".to_string(),
                msg: format!("order {order_id} reset by operator"),
            });
            (
                StatusCode::OK,
                Json(ResetOrderResponse {
                    order_id,
                    reset: true,
                }),
            )
                .into_response()
        }
        Err(e) => engine_error(e),
    }
}

pub(crate) async fn queued_orders(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.engine.queued_orders().await)
}

/// Retained view: whatever the engine last published.
pub(crate) async fn active_orders(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.orders.borrow().active.clone())
}

pub(crate) async fn completed_orders(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.orders.borrow().completed.clone())
}

pub(crate) async fn stock(State(st): State<Arc<AppState>>) -> Response {
    let retained = st.stock.borrow().clone();
    match retained {
        Some(s) => Json(s).into_response(),
        // Nothing published yet; report the (empty) ledger as it stands.
        None => Json(st.engine.stock().await).into_response(),
    }
}

// ---------------------------------------------------------------------------
// Telemetry
// ---------------------------------------------------------------------------

pub(crate) async fn transporter_telemetry(
    State(st): State<Arc<AppState>>,
    Json(report): Json<TransporterState>,
) -> impl IntoResponse {
    if st.pairing.device(&report.serial_number).is_none() {
        info!(serial = %report.serial_number, "pairing transporter on first report");
        st.pairing.register_transporter(&report.serial_number);
    }
    st.engine.handle_transporter_state(&report).await;
    let paired = st.pairing.is_transporter(&report.serial_number);
    (
        StatusCode::ACCEPTED,
        Json(TelemetryAck {
            serial_number: report.serial_number,
            paired,
        }),
    )
}

/// Modules are never auto-paired: an unknown serial is acknowledged with
/// `paired: false` and otherwise ignored by the engine.
pub(crate) async fn module_telemetry(
    State(st): State<Arc<AppState>>,
    Json(report): Json<ModuleState>,
) -> impl IntoResponse {
    let paired = st.pairing.module_type(&report.serial_number).is_some();
    st.engine.handle_module_state(&report).await;
    (
        StatusCode::ACCEPTED,
        Json(TelemetryAck {
            serial_number: report.serial_number,
            paired,
        }),
    )
}

// ---------------------------------------------------------------------------
// Flows
// ---------------------------------------------------------------------------

pub(crate) async fn list_flows(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    Json(st.engine.flows().await)
}

pub(crate) async fn reload_flows(
    State(st): State<Arc<AppState>>,
    Json(source): Json<Value>,
) -> Response {
    match st.engine.reload_flows(&source).await {
        Ok(report) => {
            info!(merged = report.merged.len(), skipped = report.skipped.len(), "flows reloaded");
            (
                StatusCode::OK,
                Json(FlowsReloadResponse {
                    merged: report.merged,
                    skipped: report.skipped,
                }),
            )
                .into_response()
        }
        Err(e) => error_response(StatusCode::BAD_REQUEST, "INVALID_FLOWS", e),
    }
}

// ---------------------------------------------------------------------------
// GET /v1/stream  /v1/commands  (SSE)
// ---------------------------------------------------------------------------

fn sse_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Cache-Control", HeaderValue::from_static("no-cache"));
    headers.insert("Connection", HeaderValue::from_static("keep-alive"));
    headers
}

pub(crate) async fn stream(State(st): State<Arc<AppState>>) -> Response {
    let events = broadcast_to_sse(st.bus.subscribe(), |m: &BusMsg| m.event_name());
    (sse_headers(), Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

/// Device adapters attach here. While at least one is connected, engine
/// commands count as dispatched.
pub(crate) async fn command_stream(State(st): State<Arc<AppState>>) -> Response {
    info!("device adapter attached");
    let events = broadcast_to_sse(st.commands.subscribe(), |_: &CellCommand| "command");
    (sse_headers(), Sse::new(events).keep_alive(KeepAlive::new())).into_response()
}

fn broadcast_to_sse<T>(
    rx: broadcast::Receiver<T>,
    name: fn(&T) -> &'static str,
) -> impl Stream<Item = Result<Event, Infallible>>
where
    T: Serialize + Clone + Send + 'static,
{
    BroadcastStream::new(rx).filter_map(move |msg| async move {
        match msg {
            Ok(m) => {
                let data = serde_json::to_string(&m).ok()?;
                Some(Ok(Event::default().event(name(&m)).data(data)))
            }
            Err(_) => None, // lagged / closed
        }
    })
}

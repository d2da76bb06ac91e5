//! Request and response types for the ccu-daemon HTTP endpoints.
//!
//! Order, telemetry and stock payloads reuse the `ccu-schemas` types as-is;
//! only the envelopes specific to this surface live here.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /v1/health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub version: String,
    /// Hash of the configuration the daemon was started with, if any.
    pub config_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Body of every 4xx answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Stable machine-readable code: "EMPTY_DEFINITION" | "UNKNOWN_FLOW" |
    /// "RESERVATION_CONFLICT" | "ORDER_NOT_ACTIVE" | "INVALID_FLOWS"
    pub code: String,
}

// ---------------------------------------------------------------------------
// /v1/orders/cancel  /v1/orders/:id/reset
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrdersRequest {
    pub order_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrdersResponse {
    /// Ids actually cancelled. Orders already running are never in here.
    pub cancelled: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResetOrderResponse {
    pub order_id: String,
    pub reset: bool,
}

// ---------------------------------------------------------------------------
// /v1/telemetry/*
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryAck {
    pub serial_number: String,
    /// False when the report came from a module nobody paired; it was ignored.
    pub paired: bool,
}

// ---------------------------------------------------------------------------
// /v1/flows
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowsReloadResponse {
    pub merged: Vec<String>,
    pub skipped: Vec<String>,
}

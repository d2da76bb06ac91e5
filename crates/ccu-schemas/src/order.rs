use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{StepChain, StepState, WorkpieceType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    Production,
    Storage,
}

/// Order lifecycle. Same vocabulary as steps.
pub type OrderState = StepState;

/// Inbound request to produce or store one workpiece.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRequest {
    pub order_type: OrderType,
    #[serde(rename = "type")]
    pub workpiece_type: WorkpieceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workpiece_id: Option<String>,
    /// Named production flow. Defaults to the workpiece type's name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    /// Predecessor for the first navigation step (replacement orders).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependent_action_id: Option<String>,
}

impl OrderRequest {
    pub fn production(workpiece_type: WorkpieceType) -> Self {
        Self {
            order_type: OrderType::Production,
            workpiece_type,
            workpiece_id: None,
            flow: None,
            dependent_action_id: None,
        }
    }

    pub fn storage(workpiece_type: WorkpieceType, workpiece_id: Option<String>) -> Self {
        Self {
            order_type: OrderType::Storage,
            workpiece_type,
            workpiece_id,
            flow: None,
            dependent_action_id: None,
        }
    }

    pub fn flow_name(&self) -> String {
        self.flow
            .clone()
            .unwrap_or_else(|| self.workpiece_type.as_str().to_string())
    }
}

/// An order as tracked and published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderResponse {
    pub order_id: String,
    pub order_type: OrderType,
    #[serde(rename = "type")]
    pub workpiece_type: WorkpieceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workpiece_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
    pub production_steps: StepChain,
    pub state: OrderState,
    pub received_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<DateTime<Utc>>,
}

impl OrderResponse {
    pub fn enqueued(request: &OrderRequest, steps: StepChain, now: DateTime<Utc>) -> Self {
        Self {
            order_id: crate::new_id(),
            order_type: request.order_type,
            workpiece_type: request.workpiece_type,
            workpiece_id: request.workpiece_id.clone(),
            flow: match request.order_type {
                OrderType::Production => Some(request.flow_name()),
                OrderType::Storage => None,
            },
            production_steps: steps,
            state: StepState::Enqueued,
            received_at: now,
            started_at: None,
            stopped_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Stock snapshot
// ---------------------------------------------------------------------------

/// One occupied warehouse bay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockedBay {
    pub bay: String,
    pub workpiece_type: WorkpieceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_id: Option<String>,
    /// Held for an order.
    pub reserved: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WarehouseStock {
    pub serial_number: String,
    pub activated: bool,
    pub bays: Vec<StockedBay>,
    /// Empty bays per type not yet reserved.
    pub free_bays: BTreeMap<WorkpieceType, u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockSnapshot {
    pub ts: DateTime<Utc>,
    pub warehouses: Vec<WarehouseStock>,
}

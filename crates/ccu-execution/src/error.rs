use ccu_flows::FlowError;
use ccu_ledger::ReservationConflict;
use ccu_schemas::OrderType;

/// Refusals surfaced to callers of the engine.
///
/// Transient device conditions never appear here; they are absorbed as
/// [`crate::DispatchOutcome::RetryLater`] and retried.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineError {
    /// Compilation produced no navigation steps. Nothing was reserved.
    EmptyDefinition { order_type: OrderType },
    UnknownFlow(FlowError),
    /// An order asked for a second material type. Logic defect; do not retry.
    ReservationConflict(ReservationConflict),
    OrderNotActive { order_id: String },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDefinition { order_type } => {
                write!(f, "{order_type:?} order compiled to no navigation steps")
            }
            Self::UnknownFlow(e) => write!(f, "{e}"),
            Self::ReservationConflict(e) => write!(f, "{e}"),
            Self::OrderNotActive { order_id } => write!(f, "order {order_id} is not active"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::UnknownFlow(e) => Some(e),
            Self::ReservationConflict(e) => Some(e),
            _ => None,
        }
    }
}

impl From<FlowError> for EngineError {
    fn from(e: FlowError) -> Self {
        Self::UnknownFlow(e)
    }
}

impl From<ReservationConflict> for EngineError {
    fn from(e: ReservationConflict) -> Self {
        Self::ReservationConflict(e)
    }
}

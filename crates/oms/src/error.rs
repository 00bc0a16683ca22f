//! Errors returned to the strategy by the request path.

use std::time::Duration;

use thiserror::Error;

use tq_core::types::OrderId;
use tq_execution::gateway::GatewayError;

use crate::order::OrderStatus;

#[derive(Debug, Error)]
pub enum OmsError {
    /// Price or quantity failed validation. No venue call was made.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("order not found: {0}")]
    NotFound(OrderId),

    /// The order's status does not allow the requested operation.
    #[error("cannot {operation} order {order_id} in status {status}")]
    InvalidState {
        order_id: OrderId,
        status: OrderStatus,
        operation: &'static str,
    },

    /// The venue returned an error.
    #[error("venue request failed: {source}")]
    Gateway {
        order_id: Option<OrderId>,
        #[source]
        source: GatewayError,
    },

    /// The venue did not answer within the request timeout. Local state is
    /// unchanged; reconcile to recover.
    #[error("venue request timed out after {timeout:?}")]
    Timeout {
        order_id: Option<OrderId>,
        timeout: Duration,
    },
}

impl OmsError {
    /// The order the failed request concerned, if one was allocated.
    pub fn order_id(&self) -> Option<OrderId> {
        match self {
            Self::InvalidArgument(_) => None,
            Self::NotFound(id) => Some(*id),
            Self::InvalidState { order_id, .. } => Some(*order_id),
            Self::Gateway { order_id, .. } | Self::Timeout { order_id, .. } => *order_id,
        }
    }
}

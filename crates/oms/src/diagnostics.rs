//! Anomalies that never reach the strategy as errors.
//!
//! Every [`Diagnostic`] is logged at `warn` and broadcast to whoever called
//! [`DiagnosticSink::subscribe`]. Slow subscribers lag and lose the oldest
//! entries; the merge path never waits for them.

use std::fmt;

use rust_decimal::Decimal;
use tokio::sync::broadcast;
use tracing::warn;

use tq_core::types::{OrderId, RemoteOrderId};

use crate::order::OrderStatus;

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An event for an unknown remote id outlived the retry window.
    OrphanEvent {
        remote_id: RemoteOrderId,
        status: String,
    },
    /// The venue reported a status outside the canonical set.
    UnknownStatus {
        remote_id: RemoteOrderId,
        status: String,
    },
    IllegalTransition {
        order_id: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    InvalidQuantity {
        order_id: OrderId,
        remaining: Decimal,
        quantity: Decimal,
    },
    /// An unknown-id event was dropped because the orphan buffer is full.
    OrphanBufferFull { remote_id: RemoteOrderId },
    /// The venue lists an open order this session does not know.
    OrphanRemoteOrder { remote_id: RemoteOrderId },
    /// A locally open order is absent from the venue's open list.
    MissingOpenOrder { order_id: OrderId },
    HandlerFailed { order_id: OrderId, reason: String },
    AdoptionFailed {
        remote_id: RemoteOrderId,
        reason: String,
    },
}

impl Diagnostic {
    /// Short stable name, used as the `kind` log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrphanEvent { .. } => "orphan_event",
            Self::UnknownStatus { .. } => "unknown_status",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::InvalidQuantity { .. } => "invalid_quantity",
            Self::OrphanBufferFull { .. } => "orphan_buffer_full",
            Self::OrphanRemoteOrder { .. } => "orphan_remote_order",
            Self::MissingOpenOrder { .. } => "missing_open_order",
            Self::HandlerFailed { .. } => "handler_failed",
            Self::AdoptionFailed { .. } => "adoption_failed",
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OrphanEvent { remote_id, status } => {
                write!(f, "dropped {status} event for unknown order {remote_id}")
            }
            Self::UnknownStatus { remote_id, status } => {
                write!(f, "unknown status {status:?} reported for {remote_id}")
            }
            Self::IllegalTransition { order_id, from, to } => {
                write!(f, "{order_id}: illegal transition {from} -> {to}")
            }
            Self::InvalidQuantity {
                order_id,
                remaining,
                quantity,
            } => write!(f, "{order_id}: remaining {remaining} invalid for quantity {quantity}"),
            Self::OrphanBufferFull { remote_id } => {
                write!(f, "orphan buffer full, dropped event for {remote_id}")
            }
            Self::OrphanRemoteOrder { remote_id } => {
                write!(f, "venue order {remote_id} is not tracked locally")
            }
            Self::MissingOpenOrder { order_id } => {
                write!(f, "{order_id} is open locally but not on the venue")
            }
            Self::HandlerFailed { order_id, reason } => {
                write!(f, "order update handler failed for {order_id}: {reason}")
            }
            Self::AdoptionFailed { remote_id, reason } => {
                write!(f, "could not adopt venue order {remote_id}: {reason}")
            }
        }
    }
}

/// Fan-out point for diagnostics.
#[derive(Clone)]
pub struct DiagnosticSink {
    tx: broadcast::Sender<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Diagnostic> {
        self.tx.subscribe()
    }

    pub fn emit(&self, diagnostic: Diagnostic) {
        warn!(kind = diagnostic.kind(), "{diagnostic}");
        // No subscribers is fine.
        let _ = self.tx.send(diagnostic);
    }
}

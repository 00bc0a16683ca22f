//! Venue gateway trait and the raw event shape venue adapters emit.
//!
//! One gateway instance is bound to one (account, symbol) pair, so no method
//! takes a symbol. Implementations translate venue-specific payloads into
//! [`RawOrderEvent`]s with a canonical status string:
//! `SUBMITTED`, `PARTIAL_FILLED`, `FILLED`, `CANCELED`, `FAILED` (the venue never
//! reports `NONE`). Anything else is forwarded verbatim and rejected later.

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use tq_core::types::{Action, OrderType, RemoteOrderId, Symbol, Timestamp};

/// A new order to submit to the venue.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub symbol: Symbol,
    pub action: Action,
    pub order_type: OrderType,
    /// Ignored by the venue for market orders.
    pub price: Decimal,
    pub quantity: Decimal,
    /// Client order id echoed back by venues that support one.
    pub client_order_id: String,
}

/// Static order attributes, present when a venue event or query can describe an
/// order this session did not create.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderDetails {
    pub action: Action,
    pub order_type: OrderType,
    pub price: Decimal,
    pub quantity: Decimal,
    pub created_at: Timestamp,
}

/// An order update as received from the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct RawOrderEvent {
    pub remote_id: RemoteOrderId,
    /// Client order id, when the venue echoes it back.
    pub client_order_id: Option<String>,
    /// Canonical status name, or whatever the venue sent if it did not map.
    pub status: String,
    pub remaining_quantity: Decimal,
    pub average_price: Decimal,
    /// Venue-reported update time.
    pub update_time: Timestamp,
    pub details: Option<OrderDetails>,
}

/// Errors surfaced by a venue gateway.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    /// The venue refused the request.
    #[error("venue rejected request: {0}")]
    Rejected(String),
    /// The request did not reach the venue or the response was unusable.
    #[error("venue transport error: {0}")]
    Transport(String),
    /// The venue adapter does not implement this call.
    #[error("operation not supported by venue: {0}")]
    Unsupported(&'static str),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Venue operations used by the lifecycle manager.
///
/// All calls may be slow; callers bound them with a timeout.
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Submit a new order and return the venue order id.
    async fn submit(&self, spec: &OrderSpec) -> GatewayResult<RemoteOrderId>;

    /// Request cancellation. Returns the remote id the venue acknowledged.
    async fn cancel(&self, remote_id: &RemoteOrderId) -> GatewayResult<RemoteOrderId>;

    /// Remote ids of every open order for the bound symbol.
    async fn query_open(&self) -> GatewayResult<Vec<RemoteOrderId>>;

    /// Full description of one order, used to adopt orders created elsewhere.
    async fn query_order(&self, _remote_id: &RemoteOrderId) -> GatewayResult<RawOrderEvent> {
        Err(GatewayError::Unsupported("query_order"))
    }

    /// Current venue view of all known orders, for venues without a push stream.
    async fn poll_updates(&self) -> GatewayResult<Vec<RawOrderEvent>> {
        Ok(Vec::new())
    }
}

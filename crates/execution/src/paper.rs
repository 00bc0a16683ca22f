//! Simulated single-symbol venue.
//!
//! [`PaperGateway`] accepts every well-formed order, assigns `PAPER-n` remote
//! ids and pushes status changes as [`RawOrderEvent`]s on an unbounded channel,
//! much like a venue's user-data stream. Limit orders rest until [`PaperGateway::fill`]
//! or a cancel; market orders fill immediately at the submitted price.
//!
//! The SUBMITTED event is pushed before `submit` returns, so consumers see the
//! same event-before-acknowledgement race a real stream produces.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

use tq_core::config::PaperConfig;
use tq_core::types::{OrderType, RemoteOrderId, Symbol, Timestamp};

use crate::gateway::{
    ExchangeGateway, GatewayError, GatewayResult, OrderDetails, OrderSpec, RawOrderEvent,
};

const SUBMITTED: &str = "SUBMITTED";
const PARTIAL_FILLED: &str = "PARTIAL_FILLED";
const FILLED: &str = "FILLED";
const CANCELED: &str = "CANCELED";

/// An order as the paper venue sees it.
#[derive(Debug, Clone)]
struct PaperOrder {
    seq: u64,
    remote_id: RemoteOrderId,
    client_order_id: Option<String>,
    details: OrderDetails,
    remaining: Decimal,
    filled_notional: Decimal,
    status: &'static str,
    updated_at: Timestamp,
}

impl PaperOrder {
    fn is_open(&self) -> bool {
        matches!(self.status, SUBMITTED | PARTIAL_FILLED)
    }

    fn average_price(&self) -> Decimal {
        let filled = self.details.quantity - self.remaining;
        if filled.is_zero() {
            Decimal::ZERO
        } else {
            self.filled_notional / filled
        }
    }

    fn to_event(&self) -> RawOrderEvent {
        RawOrderEvent {
            remote_id: self.remote_id.clone(),
            client_order_id: self.client_order_id.clone(),
            status: self.status.to_string(),
            remaining_quantity: self.remaining,
            average_price: self.average_price(),
            update_time: self.updated_at,
            details: Some(self.details.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct PaperBook {
    orders: HashMap<RemoteOrderId, PaperOrder>,
    /// Last venue timestamp handed out, in milliseconds.
    last_update_ms: u64,
    reject_next: Option<String>,
}

impl PaperBook {
    /// Venue clock in milliseconds, strictly increasing across calls.
    fn tick(&mut self) -> Timestamp {
        let now_ms = Timestamp::now().to_millis();
        self.last_update_ms = now_ms.max(self.last_update_ms + 1);
        Timestamp::from_millis(self.last_update_ms)
    }

    fn sorted(&self, open_only: bool) -> Vec<&PaperOrder> {
        let mut orders: Vec<&PaperOrder> = self
            .orders
            .values()
            .filter(|o| !open_only || o.is_open())
            .collect();
        orders.sort_by_key(|o| o.seq);
        orders
    }
}

/// Simulated venue implementing [`ExchangeGateway`].
pub struct PaperGateway {
    config: PaperConfig,
    symbol: Symbol,
    event_tx: UnboundedSender<RawOrderEvent>,
    next_id: AtomicU64,
    book: Mutex<PaperBook>,
}

impl PaperGateway {
    /// Create a paper venue for `symbol` that pushes order events into `event_tx`.
    pub fn new(config: PaperConfig, symbol: Symbol, event_tx: UnboundedSender<RawOrderEvent>) -> Self {
        Self {
            config,
            symbol,
            event_tx,
            next_id: AtomicU64::new(1),
            book: Mutex::new(PaperBook::default()),
        }
    }

    fn next_remote_id(&self) -> (u64, RemoteOrderId) {
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        (n, RemoteOrderId::new(format!("PAPER-{}", n)))
    }

    fn emit(&self, order: &PaperOrder) {
        // A dropped receiver means nobody is listening any more.
        if self.event_tx.send(order.to_event()).is_err() {
            debug!(remote_id = %order.remote_id, "paper event dropped, receiver closed");
        }
    }

    async fn simulate_latency(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Make the next `submit` fail with [`GatewayError::Rejected`].
    pub fn reject_next(&self, reason: impl Into<String>) {
        self.book.lock().reject_next = Some(reason.into());
    }

    /// Fill `quantity` of a resting order at its limit price.
    ///
    /// Emits PARTIAL_FILLED, or FILLED once nothing remains.
    pub fn fill(&self, remote_id: &RemoteOrderId, quantity: Decimal) -> GatewayResult<()> {
        let mut book = self.book.lock();
        let ts = book.tick();
        let order = book
            .orders
            .get_mut(remote_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {remote_id}")))?;
        if !order.is_open() {
            return Err(GatewayError::Rejected(format!("order {remote_id} is closed")));
        }
        if quantity <= Decimal::ZERO || quantity > order.remaining {
            return Err(GatewayError::Rejected(format!(
                "fill quantity {quantity} outside (0, {}]",
                order.remaining
            )));
        }

        order.remaining -= quantity;
        order.filled_notional += quantity * order.details.price;
        order.status = if order.remaining.is_zero() { FILLED } else { PARTIAL_FILLED };
        order.updated_at = ts;
        debug!(remote_id = %remote_id, %quantity, status = order.status, "paper fill");

        let snapshot = order.clone();
        drop(book);
        self.emit(&snapshot);
        Ok(())
    }

    /// Place a resting order without emitting anything, as if another session
    /// had created it earlier.
    pub fn seed_external(&self, spec: &OrderSpec) -> RemoteOrderId {
        let (seq, remote_id) = self.next_remote_id();
        let mut book = self.book.lock();
        let ts = book.tick();
        let order = PaperOrder {
            seq,
            remote_id: remote_id.clone(),
            client_order_id: None,
            details: OrderDetails {
                action: spec.action,
                order_type: spec.order_type,
                price: spec.price,
                quantity: spec.quantity,
                created_at: ts,
            },
            remaining: spec.quantity,
            filled_notional: Decimal::ZERO,
            status: SUBMITTED,
            updated_at: ts,
        };
        book.orders.insert(remote_id.clone(), order);
        remote_id
    }

    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }
}

#[async_trait]
impl ExchangeGateway for PaperGateway {
    async fn submit(&self, spec: &OrderSpec) -> GatewayResult<RemoteOrderId> {
        self.simulate_latency().await;

        if spec.symbol != self.symbol {
            return Err(GatewayError::Rejected(format!(
                "symbol {} not traded here",
                spec.symbol
            )));
        }
        if let Some(reason) = self.book.lock().reject_next.take() {
            return Err(GatewayError::Rejected(reason));
        }
        if spec.quantity <= Decimal::ZERO {
            return Err(GatewayError::Rejected("quantity must be positive".into()));
        }

        let (seq, remote_id) = self.next_remote_id();
        let mut book = self.book.lock();
        let created_at = book.tick();
        let mut order = PaperOrder {
            seq,
            remote_id: remote_id.clone(),
            client_order_id: Some(spec.client_order_id.clone()),
            details: OrderDetails {
                action: spec.action,
                order_type: spec.order_type,
                price: spec.price,
                quantity: spec.quantity,
                created_at,
            },
            remaining: spec.quantity,
            filled_notional: Decimal::ZERO,
            status: SUBMITTED,
            updated_at: created_at,
        };
        let mut events = vec![order.clone()];

        if spec.order_type == OrderType::Market {
            order.filled_notional = order.remaining * spec.price;
            order.remaining = Decimal::ZERO;
            order.status = FILLED;
            order.updated_at = book.tick();
            events.push(order.clone());
        }
        book.orders.insert(remote_id.clone(), order);
        drop(book);

        info!(
            remote_id = %remote_id,
            client_order_id = %spec.client_order_id,
            action = %spec.action,
            order_type = %spec.order_type,
            price = %spec.price,
            quantity = %spec.quantity,
            "paper order accepted"
        );
        for event in &events {
            self.emit(event);
        }
        Ok(remote_id)
    }

    async fn cancel(&self, remote_id: &RemoteOrderId) -> GatewayResult<RemoteOrderId> {
        self.simulate_latency().await;

        let mut book = self.book.lock();
        let ts = book.tick();
        let order = book
            .orders
            .get_mut(remote_id)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {remote_id}")))?;
        if !order.is_open() {
            return Err(GatewayError::Rejected(format!("order {remote_id} is closed")));
        }
        order.status = CANCELED;
        order.updated_at = ts;
        let snapshot = order.clone();
        drop(book);

        info!(remote_id = %remote_id, "paper order canceled");
        self.emit(&snapshot);
        Ok(remote_id.clone())
    }

    async fn query_open(&self) -> GatewayResult<Vec<RemoteOrderId>> {
        self.simulate_latency().await;
        let book = self.book.lock();
        Ok(book
            .sorted(true)
            .into_iter()
            .map(|o| o.remote_id.clone())
            .collect())
    }

    async fn query_order(&self, remote_id: &RemoteOrderId) -> GatewayResult<RawOrderEvent> {
        self.simulate_latency().await;
        self.book
            .lock()
            .orders
            .get(remote_id)
            .map(PaperOrder::to_event)
            .ok_or_else(|| GatewayError::Rejected(format!("unknown order {remote_id}")))
    }

    async fn poll_updates(&self) -> GatewayResult<Vec<RawOrderEvent>> {
        let book = self.book.lock();
        Ok(book.sorted(false).into_iter().map(PaperOrder::to_event).collect())
    }
}

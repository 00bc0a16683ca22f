//! Ordered, non-blocking delivery of order updates to the strategy.
//!
//! Notifications are sharded by order id over a fixed set of worker tasks,
//! each fed by a bounded queue. All notifications for one order land on the
//! same worker. Each worker keeps a small reorder buffer keyed by sequence
//! number and releases snapshots strictly in order.
//!
//! Queue capacity is taken with [`Dispatcher::reserve`] *before* the order's
//! slot is locked and its sequence number stamped; the stamped snapshot is
//! then handed over synchronously with [`Reservation::send`]. A caller that is
//! dropped while waiting for capacity has stamped nothing, so a sequence
//! number can never go missing.
//!
//! Backpressure: when a worker's queue is full, [`Dispatcher::reserve`] waits.
//! The event pump merges one event at a time, so a handler that falls behind
//! on one shard slows merging for every order until the queue drains. Size
//! `oms.dispatch_queue_capacity` for the handler's worst-case latency.
//!
//! Handler errors and panics are caught per delivery and reported as
//! [`Diagnostic::HandlerFailed`]; the worker keeps going.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

use tq_core::types::OrderId;

use crate::cache::Notification;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::error::OmsError;
use crate::manager::ReconcileReport;
use crate::order::Order;

/// Strategy callback for order state changes.
#[async_trait]
pub trait OrderUpdateHandler: Send + Sync {
    /// Called once per accepted change, in order for any single order.
    async fn on_order_update(&self, order: Order) -> anyhow::Result<()>;

    /// Called once when the startup snapshot of venue open orders has been
    /// loaded, or has failed to load.
    async fn on_init(&self, result: Result<&ReconcileReport, &OmsError>) -> anyhow::Result<()> {
        let _ = result;
        Ok(())
    }
}

/// Adapts an async closure into an [`OrderUpdateHandler`].
pub struct FnHandler<F>(F);

/// Build a handler from `|order| async move { ... }`.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Order) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> OrderUpdateHandler for FnHandler<F>
where
    F: Fn(Order) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn on_order_update(&self, order: Order) -> anyhow::Result<()> {
        (self.0)(order).await
    }
}

/// Queue capacity held for one notification.
///
/// Dropping it unused gives the slot back.
pub struct Reservation(Option<mpsc::OwnedPermit<Notification>>);

impl Reservation {
    /// Hand a notification to its worker. Never waits.
    pub fn send(self, notification: Notification) {
        match self.0 {
            Some(permit) => {
                permit.send(notification);
            }
            None => debug!(
                order_id = %notification.order.order_id,
                seq = notification.seq,
                "dispatcher closed, notification dropped"
            ),
        }
    }
}

/// Per-order reorder state held by a worker.
struct Pending {
    next: u64,
    parked: BTreeMap<u64, Order>,
}

impl Default for Pending {
    fn default() -> Self {
        Self {
            next: 1,
            parked: BTreeMap::new(),
        }
    }
}

pub struct Dispatcher {
    senders: RwLock<Vec<mpsc::Sender<Notification>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawn `workers` delivery tasks on the current tokio runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn(
        workers: usize,
        queue_capacity: usize,
        handler: Arc<dyn OrderUpdateHandler>,
        diagnostics: DiagnosticSink,
    ) -> Self {
        let workers = workers.max(1);
        let mut senders = Vec::with_capacity(workers);
        let mut handles = Vec::with_capacity(workers);
        for index in 0..workers {
            let (tx, rx) = mpsc::channel(queue_capacity.max(1));
            senders.push(tx);
            handles.push(tokio::spawn(run_worker(
                index,
                rx,
                Arc::clone(&handler),
                diagnostics.clone(),
            )));
        }
        Self {
            senders: RwLock::new(senders),
            workers: Mutex::new(handles),
        }
    }

    fn shard(&self, order_id: OrderId) -> Option<mpsc::Sender<Notification>> {
        let senders = self.senders.read();
        if senders.is_empty() {
            return None;
        }
        let index = (order_id.0 % senders.len() as u64) as usize;
        Some(senders[index].clone())
    }

    /// Wait for room in `order_id`'s worker queue.
    ///
    /// After [`shutdown`](Self::shutdown) the reservation is empty and its
    /// notification is dropped.
    pub async fn reserve(&self, order_id: OrderId) -> Reservation {
        let Some(tx) = self.shard(order_id) else {
            return Reservation(None);
        };
        Reservation(tx.reserve_owned().await.ok())
    }

    /// Close the queues and wait for every queued notification to be delivered.
    pub async fn shutdown(&self) {
        let senders = std::mem::take(&mut *self.senders.write());
        drop(senders);
        let workers = std::mem::take(&mut *self.workers.lock());
        let count = workers.len();
        for worker in workers {
            let _ = worker.await;
        }
        if count > 0 {
            info!(workers = count, "dispatcher drained");
        }
    }
}

async fn run_worker(
    index: usize,
    mut rx: mpsc::Receiver<Notification>,
    handler: Arc<dyn OrderUpdateHandler>,
    diagnostics: DiagnosticSink,
) {
    let mut pending: HashMap<OrderId, Pending> = HashMap::new();

    while let Some(Notification { seq, order }) = rx.recv().await {
        let order_id = order.order_id;
        let slot = pending.entry(order_id).or_default();
        if seq < slot.next {
            debug!(%order_id, seq, "notification already delivered");
            continue;
        }
        slot.parked.insert(seq, order);

        let mut finished = false;
        while let Some(order) = slot.parked.remove(&slot.next) {
            slot.next += 1;
            finished = order.is_terminal();
            deliver(handler.as_ref(), order, &diagnostics).await;
        }
        if slot.parked.is_empty() && finished {
            pending.remove(&order_id);
        }
    }
    trace!(worker = index, "dispatcher worker stopped");
}

async fn deliver(handler: &dyn OrderUpdateHandler, order: Order, diagnostics: &DiagnosticSink) {
    let order_id = order.order_id;
    if let Err(reason) = guarded(handler.on_order_update(order)).await {
        diagnostics.emit(Diagnostic::HandlerFailed { order_id, reason });
    }
}

/// Run a handler call, turning its error or panic into a message.
pub(crate) async fn guarded<F>(call: F) -> Result<(), String>
where
    F: Future<Output = anyhow::Result<()>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(format!("{e:#}")),
        Err(panic) => Err(format!("handler panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::order::OrderStatus;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tq_core::types::{Action, OrderType, StrategyIdentity, Symbol, Timestamp};

    fn order(id: u64, status: OrderStatus, ms: u64) -> Order {
        let identity = StrategyIdentity::new("paper", "acct", "grid", Symbol::new("BTC/USDT"));
        let mut o = Order::new(
            &identity,
            OrderId(id),
            Action::Buy,
            OrderType::Limit,
            dec!(1),
            dec!(1),
            Timestamp::ZERO,
        );
        o.status = status;
        o.updated_at = Timestamp::from_millis(ms);
        o
    }

    fn recording() -> (Arc<dyn OrderUpdateHandler>, mpsc::UnboundedReceiver<Order>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |o: Order| {
            let tx = tx.clone();
            async move {
                tx.send(o)?;
                Ok::<(), anyhow::Error>(())
            }
        });
        (Arc::new(handler), rx)
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<Order>) -> Order {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("delivery timed out")
            .expect("channel closed")
    }

    async fn push(d: &Dispatcher, notification: Notification) {
        d.reserve(notification.order.order_id).await.send(notification);
    }

    // ── Ordering ──

    #[tokio::test]
    async fn test_out_of_sequence_arrivals_are_reordered() {
        let (handler, mut rx) = recording();
        let d = Dispatcher::spawn(2, 16, handler, DiagnosticSink::new(8));

        push(&d, Notification { seq: 2, order: order(1, OrderStatus::PartialFilled, 2) }).await;
        push(&d, Notification { seq: 3, order: order(1, OrderStatus::Filled, 3) }).await;
        push(&d, Notification { seq: 1, order: order(1, OrderStatus::Submitted, 1) }).await;

        let got: Vec<u64> = vec![
            next(&mut rx).await.updated_at.to_millis(),
            next(&mut rx).await.updated_at.to_millis(),
            next(&mut rx).await.updated_at.to_millis(),
        ];
        assert_eq!(got, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_other_orders_not_blocked_by_gap() {
        let (handler, mut rx) = recording();
        let d = Dispatcher::spawn(1, 16, handler, DiagnosticSink::new(8));

        // order 1 waits for seq 1; order 2 must still be delivered
        push(&d, Notification { seq: 2, order: order(1, OrderStatus::PartialFilled, 2) }).await;
        push(&d, Notification { seq: 1, order: order(2, OrderStatus::Submitted, 1) }).await;
        assert_eq!(next(&mut rx).await.order_id, OrderId(2));
    }

    // ── Failure isolation ──

    #[tokio::test]
    async fn test_handler_error_and_panic_are_isolated() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let handler = handler_fn(move |o: Order| {
            let tx = tx.clone();
            async move {
                match o.order_id.0 {
                    1 => anyhow::bail!("strategy blew up"),
                    2 => panic!("boom"),
                    _ => {
                        tx.send(o.order_id)?;
                        Ok::<(), anyhow::Error>(())
                    }
                }
            }
        });
        let sink = DiagnosticSink::new(8);
        let mut diags = sink.subscribe();
        let d = Dispatcher::spawn(1, 16, Arc::new(handler), sink);

        push(&d, Notification { seq: 1, order: order(1, OrderStatus::Submitted, 1) }).await;
        push(&d, Notification { seq: 1, order: order(2, OrderStatus::Submitted, 1) }).await;
        push(&d, Notification { seq: 1, order: order(3, OrderStatus::Submitted, 1) }).await;

        let delivered = tokio::time::timeout(Duration::from_secs(2), rx.recv()).await.unwrap();
        assert_eq!(delivered, Some(OrderId(3)));

        let first = diags.recv().await.unwrap();
        assert_eq!(
            first,
            Diagnostic::HandlerFailed {
                order_id: OrderId(1),
                reason: "strategy blew up".into()
            }
        );
        match diags.recv().await.unwrap() {
            Diagnostic::HandlerFailed { order_id, reason } => {
                assert_eq!(order_id, OrderId(2));
                assert!(reason.contains("boom"));
            }
            other => panic!("unexpected diagnostic {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_shutdown_drains_queue() {
        let (handler, mut rx) = recording();
        let d = Dispatcher::spawn(3, 16, handler, DiagnosticSink::new(8));
        for id in 0..6 {
            push(&d, Notification { seq: 1, order: order(id, OrderStatus::Submitted, 1) }).await;
        }
        d.shutdown().await;

        let mut seen = 0;
        while rx.try_recv().is_ok() {
            seen += 1;
        }
        assert_eq!(seen, 6);
    }

    // ── Capacity ──

    #[tokio::test]
    async fn test_unused_reservation_returns_capacity() {
        let (handler, mut rx) = recording();
        let d = Dispatcher::spawn(1, 1, handler, DiagnosticSink::new(8));

        drop(d.reserve(OrderId(1)).await);
        let again = tokio::time::timeout(Duration::from_secs(1), d.reserve(OrderId(1))).await;
        again
            .expect("capacity released")
            .send(Notification { seq: 1, order: order(1, OrderStatus::Submitted, 1) });
        assert_eq!(next(&mut rx).await.order_id, OrderId(1));
    }

    #[tokio::test]
    async fn test_reserve_waits_while_queue_full() {
        let gate = Arc::new(tokio::sync::Semaphore::new(0));
        let handler = {
            let gate = Arc::clone(&gate);
            handler_fn(move |_o: Order| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok::<(), anyhow::Error>(())
                }
            })
        };
        let d = Dispatcher::spawn(1, 1, Arc::new(handler), DiagnosticSink::new(8));

        // one notification in the handler, one in the queue
        push(&d, Notification { seq: 1, order: order(1, OrderStatus::Submitted, 1) }).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        push(&d, Notification { seq: 1, order: order(2, OrderStatus::Submitted, 1) }).await;

        let blocked = tokio::time::timeout(Duration::from_millis(50), d.reserve(OrderId(3))).await;
        assert!(blocked.is_err());

        gate.add_permits(1);
        let freed = tokio::time::timeout(Duration::from_secs(1), d.reserve(OrderId(3))).await;
        assert!(freed.is_ok());
    }

    #[tokio::test]
    async fn test_reserve_after_shutdown_drops_quietly() {
        let (handler, mut rx) = recording();
        let d = Dispatcher::spawn(2, 4, handler, DiagnosticSink::new(8));
        d.shutdown().await;

        push(&d, Notification { seq: 1, order: order(1, OrderStatus::Submitted, 1) }).await;
        assert!(rx.recv().await.is_none());
    }
}

//! Order lifecycle manager.
//!
//! Two paths touch the cache concurrently:
//!
//! - the **request path** (`create_order`, `revoke_order`, `reconcile`, ...)
//!   calls the venue and records the outcome;
//! - the **merge path** ([`OrderLifecycleManager::on_order_event`]) folds venue
//!   events into the cache through [`Order::apply`].
//!
//! Both serialize on the per-order slot lock and never hold it across an
//! `.await`. Dispatcher capacity is reserved before the lock is taken; an
//! accepted change is stamped under the lock and handed over without a
//! further suspension point.
//!
//! Events taken out of the orphan buffer are tracked by a [`Replay`] guard
//! until merged, so a dropped caller returns them to the buffer rather than
//! losing them.

use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use rust_decimal::Decimal;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tq_core::config::OmsConfig;
use tq_core::types::{Action, OrderId, OrderType, RemoteOrderId, StrategyIdentity, Timestamp};
use tq_execution::gateway::{ExchangeGateway, GatewayResult, OrderSpec, RawOrderEvent};

use crate::cache::OrderCache;
use crate::diagnostics::{Diagnostic, DiagnosticSink};
use crate::dispatcher::{guarded, Dispatcher, OrderUpdateHandler};
use crate::error::OmsError;
use crate::order::{Order, OrderRejection, StatusUpdate, Transition};
use crate::orphan::{Admission, OrphanBuffer};

const DIAGNOSTIC_CAPACITY: usize = 256;

/// What happened to one venue event.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// State changed and a notification was queued.
    Notified(OrderId),
    /// Same state, newer venue time. No notification.
    Refreshed(OrderId),
    /// The order rejected the update.
    Rejected(OrderId, OrderRejection),
    /// Unknown remote id, parked for retry.
    Parked,
    /// Unknown remote id and no room to park it.
    Dropped,
    /// Status string outside the canonical set.
    UnknownStatus,
}

/// Result of comparing the venue's open orders with the cache.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Local ids the venue confirms as open, in venue order.
    pub open: Vec<OrderId>,
    /// Venue ids with no local order.
    pub orphans: Vec<RemoteOrderId>,
    /// Locally non-terminal orders the venue does not list.
    pub missing: Vec<OrderId>,
    /// Orphans that were adopted into the cache.
    pub adopted: Vec<OrderId>,
}

#[derive(Debug, Default)]
pub struct RevokeAllSummary {
    pub revoked: Vec<RemoteOrderId>,
    pub failed: Vec<(RemoteOrderId, OmsError)>,
}

/// Owns the order cache for one strategy identity and mediates every change to it.
pub struct OrderLifecycleManager {
    identity: StrategyIdentity,
    config: OmsConfig,
    gateway: Arc<dyn ExchangeGateway>,
    handler: Arc<dyn OrderUpdateHandler>,
    cache: OrderCache,
    orphans: OrphanBuffer,
    dispatcher: Dispatcher,
    diagnostics: DiagnosticSink,
    next_order_id: AtomicU64,
}

impl OrderLifecycleManager {
    /// Build a manager and start its notification workers.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(
        identity: StrategyIdentity,
        config: &OmsConfig,
        gateway: Arc<dyn ExchangeGateway>,
        handler: Arc<dyn OrderUpdateHandler>,
    ) -> Arc<Self> {
        let diagnostics = DiagnosticSink::new(DIAGNOSTIC_CAPACITY);
        let dispatcher = Dispatcher::spawn(
            config.dispatch_workers,
            config.dispatch_queue_capacity,
            Arc::clone(&handler),
            diagnostics.clone(),
        );
        info!(
            identity = %identity,
            workers = config.dispatch_workers,
            timeout_ms = config.request_timeout_ms,
            "order lifecycle manager started"
        );
        Arc::new(Self {
            identity,
            config: config.clone(),
            gateway,
            handler,
            cache: OrderCache::new(),
            orphans: OrphanBuffer::new(config.orphan_retry_window(), config.orphan_buffer_capacity),
            dispatcher,
            diagnostics,
            next_order_id: AtomicU64::new(1),
        })
    }

    pub fn identity(&self) -> &StrategyIdentity {
        &self.identity
    }

    pub fn subscribe_diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Load the venue's open orders at session start.
    ///
    /// Every open order not yet tracked is fetched with `query_order` and
    /// adopted, and each adopted order is delivered to the handler once, even
    /// when the venue reports nothing newer than its details. The handler's
    /// [`on_init`](OrderUpdateHandler::on_init) hook then receives the outcome.
    ///
    /// Fails if the venue cannot list or describe its open orders. An order
    /// the venue describes without details is reported in `orphans`.
    pub async fn initialize(&self) -> Result<ReconcileReport, OmsError> {
        let result = self.load_open_orders().await;
        match &result {
            Ok(report) => info!(
                open = report.open.len(),
                adopted = report.adopted.len(),
                orphans = report.orphans.len(),
                "startup snapshot loaded"
            ),
            Err(err) => warn!(error = %err, "startup snapshot failed"),
        }
        if let Err(reason) = guarded(self.handler.on_init(result.as_ref())).await {
            warn!(%reason, "init hook failed");
        }
        result
    }

    /// Stop notification delivery after everything already queued has reached
    /// the handler. Later changes are still merged but not delivered.
    pub async fn shutdown(&self) {
        self.dispatcher.shutdown().await;
        info!(identity = %self.identity, "order lifecycle manager stopped");
    }

    // ── Request path ───────────────────────────────────────────────

    /// Create an order and submit it to the venue.
    ///
    /// The order is cached as SUBMITTED before the venue is called. If the
    /// venue refuses it the order becomes FAILED (and is notified); if the
    /// venue does not answer in time the order keeps its state.
    pub async fn create_order(
        &self,
        action: Action,
        price: &str,
        quantity: &str,
        order_type: OrderType,
    ) -> Result<OrderId, OmsError> {
        let (price, quantity) = validate_order_args(order_type, price, quantity)?;

        let order_id = OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed));
        let order = Order::new(
            &self.identity,
            order_id,
            action,
            order_type,
            price,
            quantity,
            Timestamp::now(),
        );
        self.cache.insert(order);

        let spec = OrderSpec {
            symbol: self.identity.symbol.clone(),
            action,
            order_type,
            price,
            quantity,
            client_order_id: self.identity.client_order_id(order_id),
        };
        info!(
            %order_id,
            %action,
            %order_type,
            %price,
            %quantity,
            "submitting order"
        );

        match self.bounded(Some(order_id), self.gateway.submit(&spec)).await {
            Ok(remote_id) => {
                info!(%order_id, %remote_id, "order accepted by venue");
                self.bind(order_id, remote_id).await;
                Ok(order_id)
            }
            Err(err @ OmsError::Gateway { .. }) => {
                warn!(%order_id, error = %err, "order refused by venue");
                self.fail_order(order_id).await;
                Err(err)
            }
            Err(err) => {
                warn!(%order_id, error = %err, "order submit unresolved");
                Err(err)
            }
        }
    }

    /// Request cancellation of one order.
    ///
    /// Success means the venue accepted the request; the resulting CANCELED
    /// state arrives through the event stream.
    pub async fn revoke_order(&self, order_id: OrderId) -> Result<OrderId, OmsError> {
        let order = self.cache.get(order_id).ok_or(OmsError::NotFound(order_id))?;
        if order.is_terminal() {
            return Err(OmsError::InvalidState {
                order_id,
                status: order.status,
                operation: "revoke",
            });
        }
        let remote_id = order.remote_id.ok_or(OmsError::InvalidState {
            order_id,
            status: order.status,
            operation: "revoke unacknowledged",
        })?;

        info!(%order_id, %remote_id, "revoking order");
        self.bounded(Some(order_id), self.gateway.cancel(&remote_id))
            .await?;
        Ok(order_id)
    }

    /// Revoke several orders concurrently. Each result is independent.
    pub async fn revoke_orders(
        &self,
        order_ids: &[OrderId],
    ) -> Vec<(OrderId, Result<OrderId, OmsError>)> {
        let results = join_all(order_ids.iter().map(|&id| self.revoke_order(id))).await;
        order_ids.iter().copied().zip(results).collect()
    }

    /// Cancel every order the venue lists as open for this symbol, known
    /// locally or not.
    pub async fn revoke_all(&self) -> Result<RevokeAllSummary, OmsError> {
        let open = self.bounded(None, self.gateway.query_open()).await?;
        info!(count = open.len(), "revoking all open orders");

        let results = join_all(open.iter().map(|remote_id| async move {
            let order_id = self.cache.resolve(remote_id);
            self.bounded(order_id, self.gateway.cancel(remote_id)).await
        }))
        .await;

        let mut summary = RevokeAllSummary::default();
        for (remote_id, result) in open.into_iter().zip(results) {
            match result {
                Ok(_) => summary.revoked.push(remote_id),
                Err(err) => {
                    warn!(%remote_id, error = %err, "revoke failed");
                    summary.failed.push((remote_id, err));
                }
            }
        }
        Ok(summary)
    }

    /// Local ids of orders the venue reports open.
    pub async fn get_open_order_ids(&self) -> Result<Vec<OrderId>, OmsError> {
        Ok(self.reconcile().await?.open)
    }

    /// Compare the venue's open orders with the cache.
    ///
    /// Unknown venue orders are reported (and adopted when enabled). Locally
    /// open orders absent from the venue are reported as missing; the event
    /// stream or a later sweep is expected to settle them.
    pub async fn reconcile(&self) -> Result<ReconcileReport, OmsError> {
        let remote_ids = self.bounded(None, self.gateway.query_open()).await?;
        let listed: HashSet<&RemoteOrderId> = remote_ids.iter().collect();

        let mut report = ReconcileReport::default();
        for remote_id in &remote_ids {
            match self.cache.resolve(remote_id) {
                Some(order_id) => report.open.push(order_id),
                None => report.orphans.push(remote_id.clone()),
            }
        }

        let mut missing: Vec<OrderId> = self
            .cache
            .non_terminal()
            .into_iter()
            .filter(|o| o.remote_id.as_ref().map_or(true, |r| !listed.contains(r)))
            .map(|o| o.order_id)
            .collect();
        missing.sort();
        for &order_id in &missing {
            self.diagnostics
                .emit(Diagnostic::MissingOpenOrder { order_id });
        }
        report.missing = missing;

        for remote_id in &report.orphans {
            self.diagnostics.emit(Diagnostic::OrphanRemoteOrder {
                remote_id: remote_id.clone(),
            });
        }
        if self.config.adopt_orphan_orders {
            for remote_id in report.orphans.clone() {
                match self.adopt_remote(&remote_id).await {
                    Ok(order_id) => {
                        report.adopted.push(order_id);
                        report.open.push(order_id);
                    }
                    Err(reason) => self
                        .diagnostics
                        .emit(Diagnostic::AdoptionFailed { remote_id, reason }),
                }
            }
        }

        debug!(
            open = report.open.len(),
            orphans = report.orphans.len(),
            missing = report.missing.len(),
            adopted = report.adopted.len(),
            "reconciled open orders"
        );
        Ok(report)
    }

    /// Snapshot of every cached order.
    pub fn orders(&self) -> HashMap<OrderId, Order> {
        self.cache
            .snapshot()
            .into_iter()
            .map(|o| (o.order_id, o))
            .collect()
    }

    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.cache.get(order_id)
    }

    // ── Merge path ─────────────────────────────────────────────────

    /// Fold one venue event into the cache.
    pub async fn on_order_event(&self, event: RawOrderEvent) -> MergeOutcome {
        if let Err(unknown) = StatusUpdate::try_from(&event) {
            self.diagnostics.emit(Diagnostic::UnknownStatus {
                remote_id: event.remote_id,
                status: unknown.0,
            });
            return MergeOutcome::UnknownStatus;
        }

        match self.orphans.resolve_or_park(event, |e| self.resolve(e)) {
            Admission::Resolved(order_id, event) => self.merge(order_id, &event).await,
            Admission::Parked => MergeOutcome::Parked,
            Admission::Overflow(event) => {
                self.diagnostics.emit(Diagnostic::OrphanBufferFull {
                    remote_id: event.remote_id,
                });
                MergeOutcome::Dropped
            }
        }
    }

    /// Settle parked events that outlived the retry window.
    ///
    /// Each is merged if its order has since been bound, adopted if adoption
    /// is enabled and the event describes the order, and otherwise dropped
    /// with [`Diagnostic::OrphanEvent`]. Returns how many events expired.
    pub async fn sweep_orphans(&self) -> usize {
        let mut replay = Replay::new(&self.orphans, self.orphans.expire(Instant::now()));
        let count = replay.events.len();
        while let Some(event) = replay.events.front().cloned() {
            self.settle_expired(event).await;
            replay.events.pop_front();
        }
        count
    }

    async fn settle_expired(&self, event: RawOrderEvent) {
        if let Some(order_id) = self.cache.resolve(&event.remote_id) {
            self.merge(order_id, &event).await;
        } else if self.config.adopt_orphan_orders && event.details.is_some() {
            let remote_id = event.remote_id.clone();
            if let Err(reason) = self.adopt(event, false).await {
                self.diagnostics
                    .emit(Diagnostic::AdoptionFailed { remote_id, reason });
            }
        } else {
            self.diagnostics.emit(Diagnostic::OrphanEvent {
                remote_id: event.remote_id,
                status: event.status,
            });
        }
    }

    /// Look an event up by remote id, falling back to its client order id.
    ///
    /// A client id match binds the remote id, which recovers orders whose
    /// submit response never arrived.
    fn resolve(&self, event: &RawOrderEvent) -> Option<OrderId> {
        if let Some(order_id) = self.cache.resolve(&event.remote_id) {
            return Some(order_id);
        }
        let order_id = event
            .client_order_id
            .as_deref()
            .and_then(|c| self.identity.parse_client_order_id(c))?;
        if self.cache.bind_remote(order_id, &event.remote_id) {
            info!(%order_id, remote_id = %event.remote_id, "bound venue id from client order id");
            Some(order_id)
        } else {
            None
        }
    }

    async fn merge(&self, order_id: OrderId, event: &RawOrderEvent) -> MergeOutcome {
        let update = match StatusUpdate::try_from(event) {
            Ok(update) => update,
            Err(unknown) => {
                self.diagnostics.emit(Diagnostic::UnknownStatus {
                    remote_id: event.remote_id.clone(),
                    status: unknown.0,
                });
                return MergeOutcome::UnknownStatus;
            }
        };

        let reservation = self.dispatcher.reserve(order_id).await;
        let applied = self.cache.update(order_id, |entry| {
            entry
                .order
                .apply(&update)
                .map(|t| (t == Transition::Changed).then(|| entry.stamp()))
                .map_err(|rejection| (rejection, entry.order.quantity))
        });

        match applied {
            Some(Ok(Some(notification))) => {
                debug!(
                    %order_id,
                    status = %notification.order.status,
                    remaining = %notification.order.remaining_quantity,
                    seq = notification.seq,
                    "order updated"
                );
                reservation.send(notification);
                MergeOutcome::Notified(order_id)
            }
            Some(Ok(None)) => MergeOutcome::Refreshed(order_id),
            Some(Err((rejection, quantity))) => {
                self.report_rejection(order_id, quantity, &rejection);
                MergeOutcome::Rejected(order_id, rejection)
            }
            // Entries are never removed, so a resolved id is always present.
            None => MergeOutcome::Dropped,
        }
    }

    fn report_rejection(&self, order_id: OrderId, quantity: Decimal, rejection: &OrderRejection) {
        match rejection {
            OrderRejection::Terminal(_) | OrderRejection::Stale { .. } => {
                debug!(%order_id, reason = %rejection, "event ignored");
            }
            OrderRejection::IllegalTransition { from, to } => {
                self.diagnostics.emit(Diagnostic::IllegalTransition {
                    order_id,
                    from: *from,
                    to: *to,
                });
            }
            OrderRejection::InvalidQuantity { remaining, .. } => {
                self.diagnostics.emit(Diagnostic::InvalidQuantity {
                    order_id,
                    remaining: *remaining,
                    quantity,
                });
            }
        }
    }

    /// Bind a venue id from a submit response and replay anything parked for it.
    async fn bind(&self, order_id: OrderId, remote_id: RemoteOrderId) {
        let drained = self
            .orphans
            .bind_and_drain(&remote_id, || self.cache.bind_remote(order_id, &remote_id));
        match drained {
            Some(events) => {
                self.replay(order_id, events).await;
            }
            None => debug!(%order_id, %remote_id, "venue id already bound"),
        }
    }

    /// Merge events taken from the orphan buffer, oldest first. Returns whether
    /// any of them notified.
    async fn replay(&self, order_id: OrderId, events: Vec<RawOrderEvent>) -> bool {
        let mut replay = Replay::new(&self.orphans, events);
        let mut notified = false;
        while let Some(event) = replay.events.front().cloned() {
            let outcome = self.merge(order_id, &event).await;
            notified |= matches!(outcome, MergeOutcome::Notified(_));
            replay.events.pop_front();
        }
        notified
    }

    /// Deliver an order's current state without a change.
    async fn announce(&self, order_id: OrderId) {
        let reservation = self.dispatcher.reserve(order_id).await;
        if let Some(notification) = self.cache.update(order_id, |entry| entry.stamp()) {
            reservation.send(notification);
        }
    }

    async fn fail_order(&self, order_id: OrderId) {
        let reservation = self.dispatcher.reserve(order_id).await;
        let stamped = self.cache.update(order_id, |entry| {
            entry
                .order
                .fail_locally(Timestamp::now())
                .map(|()| entry.stamp())
        });
        match stamped {
            Some(Ok(notification)) => reservation.send(notification),
            Some(Err(rejection)) => {
                debug!(%order_id, reason = %rejection, "order not marked failed")
            }
            None => {}
        }
    }

    // ── Adoption ───────────────────────────────────────────────────

    async fn load_open_orders(&self) -> Result<ReconcileReport, OmsError> {
        let remote_ids = self.bounded(None, self.gateway.query_open()).await?;
        let mut report = ReconcileReport::default();
        for remote_id in remote_ids {
            if let Some(order_id) = self.cache.resolve(&remote_id) {
                report.open.push(order_id);
                continue;
            }
            let event = self
                .bounded(None, self.gateway.query_order(&remote_id))
                .await?;
            match self.adopt(event, true).await {
                Ok(order_id) => {
                    report.adopted.push(order_id);
                    report.open.push(order_id);
                }
                Err(reason) => {
                    self.diagnostics.emit(Diagnostic::AdoptionFailed {
                        remote_id: remote_id.clone(),
                        reason,
                    });
                    report.orphans.push(remote_id);
                }
            }
        }
        Ok(report)
    }

    async fn adopt_remote(&self, remote_id: &RemoteOrderId) -> Result<OrderId, String> {
        let event = self
            .bounded(None, self.gateway.query_order(remote_id))
            .await
            .map_err(|e| e.to_string())?;
        if &event.remote_id != remote_id {
            return Err(format!("venue answered for {}", event.remote_id));
        }
        self.adopt(event, false).await
    }

    /// Insert a venue order this session did not create, then merge `event`
    /// and anything parked for it.
    ///
    /// With `announce`, the order is delivered to the handler even if none of
    /// the merged events changed it.
    async fn adopt(&self, event: RawOrderEvent, announce: bool) -> Result<OrderId, String> {
        let details = event
            .details
            .clone()
            .ok_or_else(|| "venue gave no order details".to_string())?;
        let remote_id = event.remote_id.clone();

        let order_id = OrderId(self.next_order_id.fetch_add(1, Ordering::Relaxed));
        let drained = self.orphans.bind_and_drain(&remote_id, || {
            if self.cache.resolve(&remote_id).is_some() {
                return false;
            }
            let mut order = Order::adopted(&self.identity, order_id, &details);
            order.remote_id = Some(remote_id.clone());
            self.cache.insert(order)
        });
        let Some(mut events) = drained else {
            return Err("already tracked".to_string());
        };

        info!(%order_id, %remote_id, "adopted venue order");
        events.push(event);
        events.sort_by_key(|e| e.update_time);
        let notified = self.replay(order_id, events).await;
        if announce && !notified {
            self.announce(order_id).await;
        }
        Ok(order_id)
    }

    // ── Background tasks ───────────────────────────────────────────

    /// Feed a push stream into [`on_order_event`](Self::on_order_event) until
    /// the stream ends or `cancel` fires.
    pub fn spawn_event_pump(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<RawOrderEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    next = events.recv() => match next {
                        Some(event) => {
                            manager.on_order_event(event).await;
                        }
                        None => break,
                    },
                }
            }
            info!("order event pump stopped");
        })
    }

    /// Poll the venue every `period` and merge what it returns.
    pub fn spawn_poller(self: &Arc<Self>, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        match manager.bounded(None, manager.gateway.poll_updates()).await {
                            Ok(events) => {
                                for event in events {
                                    manager.on_order_event(event).await;
                                }
                            }
                            Err(err) => warn!(error = %err, "order poll failed"),
                        }
                    }
                }
            }
            info!("order poller stopped");
        })
    }

    /// Run [`sweep_orphans`](Self::sweep_orphans) every `period`.
    pub fn spawn_orphan_sweeper(
        self: &Arc<Self>,
        period: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let expired = manager.sweep_orphans().await;
                        if expired > 0 {
                            debug!(expired, "orphan sweep");
                        }
                    }
                }
            }
            info!("orphan sweeper stopped");
        })
    }

    /// Start the event pump, the orphan sweeper and, when configured, the poller.
    pub fn spawn_background(
        self: &Arc<Self>,
        events: mpsc::UnboundedReceiver<RawOrderEvent>,
        cancel: &CancellationToken,
    ) -> Vec<JoinHandle<()>> {
        let mut handles = vec![
            self.spawn_event_pump(events, cancel.clone()),
            self.spawn_orphan_sweeper(self.config.orphan_sweep_interval(), cancel.clone()),
        ];
        if let Some(period) = self.config.poll_interval() {
            handles.push(self.spawn_poller(period, cancel.clone()));
        }
        handles
    }

    // ── Helpers ────────────────────────────────────────────────────

    /// Run a venue call under the request timeout.
    async fn bounded<T>(
        &self,
        order_id: Option<OrderId>,
        call: impl Future<Output = GatewayResult<T>>,
    ) -> Result<T, OmsError> {
        let timeout = self.config.request_timeout();
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(OmsError::Gateway { order_id, source }),
            Err(_) => Err(OmsError::Timeout { order_id, timeout }),
        }
    }
}

/// Events out of the orphan buffer that are not yet merged. Whatever is left
/// when the guard drops goes back for the next sweep.
struct Replay<'a> {
    orphans: &'a OrphanBuffer,
    events: VecDeque<RawOrderEvent>,
}

impl<'a> Replay<'a> {
    fn new(orphans: &'a OrphanBuffer, events: Vec<RawOrderEvent>) -> Self {
        Self {
            orphans,
            events: events.into(),
        }
    }
}

impl Drop for Replay<'_> {
    fn drop(&mut self) {
        if !self.events.is_empty() {
            debug!(count = self.events.len(), "requeueing unmerged events");
            self.orphans.requeue(self.events.drain(..));
        }
    }
}

/// Parse and check strategy-supplied price and quantity.
///
/// Limit orders need a positive price and quantity. Market orders need a
/// positive quantity; their price may be empty (read as zero) but not negative.
fn validate_order_args(
    order_type: OrderType,
    price: &str,
    quantity: &str,
) -> Result<(Decimal, Decimal), OmsError> {
    let quantity = parse_decimal("quantity", quantity)?;
    if quantity <= Decimal::ZERO {
        return Err(OmsError::InvalidArgument(format!(
            "quantity must be positive, got {quantity}"
        )));
    }

    let price = match order_type {
        OrderType::Market if price.trim().is_empty() => Decimal::ZERO,
        _ => parse_decimal("price", price)?,
    };
    match order_type {
        OrderType::Limit if price <= Decimal::ZERO => Err(OmsError::InvalidArgument(format!(
            "limit price must be positive, got {price}"
        ))),
        OrderType::Market if price < Decimal::ZERO => Err(OmsError::InvalidArgument(format!(
            "price must not be negative, got {price}"
        ))),
        _ => Ok((price, quantity)),
    }
}

fn parse_decimal(name: &str, raw: &str) -> Result<Decimal, OmsError> {
    Decimal::from_str(raw.trim())
        .map_err(|_| OmsError::InvalidArgument(format!("{name} {raw:?} is not a decimal number")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_validate_limit_order() {
        let (p, q) = validate_order_args(OrderType::Limit, "11.11", " 22.22 ").unwrap();
        assert_eq!((p, q), (dec!(11.11), dec!(22.22)));
    }

    #[test]
    fn test_validate_rejects_non_positive_quantity() {
        for q in ["-1", "0", "0.000"] {
            assert!(matches!(
                validate_order_args(OrderType::Limit, "10", q),
                Err(OmsError::InvalidArgument(_))
            ));
        }
    }

    #[test]
    fn test_validate_rejects_unparseable() {
        assert!(validate_order_args(OrderType::Limit, "ten", "1").is_err());
        assert!(validate_order_args(OrderType::Limit, "10", "").is_err());
        assert!(validate_order_args(OrderType::Limit, "", "1").is_err());
    }

    #[test]
    fn test_validate_limit_price_must_be_positive() {
        assert!(validate_order_args(OrderType::Limit, "0", "1").is_err());
    }

    #[test]
    fn test_validate_market_price_optional() {
        let (p, _) = validate_order_args(OrderType::Market, "", "3").unwrap();
        assert_eq!(p, Decimal::ZERO);
        let (p, _) = validate_order_args(OrderType::Market, "0", "3").unwrap();
        assert_eq!(p, Decimal::ZERO);
        assert!(validate_order_args(OrderType::Market, "-5", "3").is_err());
        assert!(validate_order_args(OrderType::Market, "", "-3").is_err());
    }
}

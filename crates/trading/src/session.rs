//! Trading session: wires configuration, venue and lifecycle manager.
//!
//! [`TradingSession`] owns the venue gateway, the [`OrderLifecycleManager`]
//! and the background tasks feeding it (event pump, orphan sweeper and the
//! optional poller). All of them stop on one [`CancellationToken`].
//!
//! Start-up loads the venue's open orders before the strategy acts; shutdown
//! stops the tasks, then waits for queued order updates to reach the handler.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use tq_core::config::{AppConfig, TradingMode};
use tq_core::types::{Action, Decimal, OrderType};
use tq_execution::gateway::RawOrderEvent;
use tq_execution::paper::PaperGateway;
use tq_oms::{OrderLifecycleManager, OrderUpdateHandler, ReconcileReport};

pub struct TradingSession {
    config: AppConfig,
    gateway: Arc<PaperGateway>,
    manager: Arc<OrderLifecycleManager>,
    events: Option<mpsc::UnboundedReceiver<RawOrderEvent>>,
    tasks: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl TradingSession {
    /// Build a session from configuration.
    ///
    /// Only the paper venue is built in; live mode is refused.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn new(config: AppConfig, handler: Arc<dyn OrderUpdateHandler>) -> Result<Self> {
        let identity = config.venue.identity();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let gateway = match config.trading.mode {
            TradingMode::Paper => Arc::new(PaperGateway::new(
                config.paper.clone(),
                identity.symbol.clone(),
                event_tx,
            )),
            TradingMode::Live => {
                bail!(
                    "live mode needs a venue gateway for {}; only paper is built in",
                    config.venue.platform
                );
            }
        };

        let manager = OrderLifecycleManager::new(identity, &config.oms, gateway.clone(), handler);

        Ok(Self {
            config,
            gateway,
            manager,
            events: Some(event_rx),
            tasks: Vec::new(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn manager(&self) -> &Arc<OrderLifecycleManager> {
        &self.manager
    }

    /// The simulated venue, for driving fills.
    pub fn paper(&self) -> &Arc<PaperGateway> {
        &self.gateway
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start the background tasks and load the venue's open orders.
    ///
    /// Each loaded order reaches the handler once, followed by its
    /// `on_init` hook. Fails if the session was already started or the
    /// open orders cannot be loaded.
    pub async fn start(&mut self) -> Result<ReconcileReport> {
        let Some(events) = self.events.take() else {
            bail!("session already started");
        };
        self.tasks = self.manager.spawn_background(events, &self.cancel);
        info!(
            identity = %self.manager.identity(),
            poll_interval_ms = self.config.oms.poll_interval_ms,
            tasks = self.tasks.len(),
            "session started"
        );
        self.manager
            .initialize()
            .await
            .context("failed to load open orders")
    }

    /// Place a buy that fills partially and a sell that is revoked, then reconcile.
    pub async fn run_demo(&self) -> Result<()> {
        let buy = self
            .manager
            .create_order(Action::Buy, "100.5", "2", OrderType::Limit)
            .await?;
        let remote_id = self
            .manager
            .order(buy)
            .and_then(|o| o.remote_id)
            .context("buy order has no venue id")?;
        self.gateway.fill(&remote_id, Decimal::ONE)?;

        let sell = self
            .manager
            .create_order(Action::Sell, "101", "1", OrderType::Limit)
            .await?;
        self.manager.revoke_order(sell).await?;

        let report = self.manager.reconcile().await?;
        info!(
            open = ?report.open,
            missing = ?report.missing,
            orphans = report.orphans.len(),
            "demo reconcile"
        );
        Ok(())
    }

    /// Run until ctrl-c or the cancel token fires, then shut down.
    pub async fn run(mut self, demo: bool) -> Result<()> {
        if let Err(e) = self.start().await {
            self.shutdown().await?;
            return Err(e);
        }
        if demo {
            if let Err(e) = self.run_demo().await {
                warn!(error = %e, "demo failed");
            }
        }

        tokio::select! {
            _ = signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = self.cancel.cancelled() => info!("cancellation token triggered"),
        }
        self.shutdown().await
    }

    /// Stop the background tasks, deliver queued order updates and log what
    /// is still open.
    pub async fn shutdown(self) -> Result<()> {
        self.cancel.cancel();
        for task in self.tasks {
            task.await.context("background task failed")?;
        }
        self.manager.shutdown().await;

        let open = self
            .manager
            .orders()
            .into_values()
            .filter(|o| !o.is_terminal())
            .count();
        info!(orders = self.manager.orders().len(), open, "session stopped");
        Ok(())
    }
}

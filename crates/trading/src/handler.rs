//! Default order update handler for the session binary.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tracing::{info, warn};

use tq_oms::{OmsError, Order, OrderUpdateHandler, ReconcileReport};

/// Logs every order update and counts them.
#[derive(Debug, Default)]
pub struct LoggingHandler {
    updates: AtomicU64,
}

impl LoggingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of updates delivered so far.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl OrderUpdateHandler for LoggingHandler {
    async fn on_order_update(&self, order: Order) -> anyhow::Result<()> {
        self.updates.fetch_add(1, Ordering::Relaxed);
        info!(
            order_id = %order.order_id,
            remote_id = ?order.remote_id,
            status = %order.status,
            remaining = %order.remaining_quantity,
            avg_price = %order.average_price,
            updated_at = %order.updated_at,
            "order update"
        );
        Ok(())
    }

    async fn on_init(&self, result: Result<&ReconcileReport, &OmsError>) -> anyhow::Result<()> {
        match result {
            Ok(report) => info!(
                open = report.open.len(),
                adopted = report.adopted.len(),
                "session initialized"
            ),
            Err(err) => warn!(error = %err, "session failed to initialize"),
        }
        Ok(())
    }
}

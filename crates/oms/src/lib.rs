//! # tq-oms
//!
//! Order lifecycle management for one strategy on one venue symbol.
//!
//! [`OrderLifecycleManager`] submits and cancels orders through an
//! [`ExchangeGateway`](tq_execution::gateway::ExchangeGateway), merges venue
//! events into a concurrent order cache under a strict state machine, and
//! delivers every accepted change to the strategy's [`OrderUpdateHandler`] in
//! per-order FIFO order.

pub mod cache;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod manager;
pub mod order;
pub mod orphan;

pub use diagnostics::Diagnostic;
pub use dispatcher::{handler_fn, OrderUpdateHandler};
pub use error::OmsError;
pub use manager::{MergeOutcome, OrderLifecycleManager, ReconcileReport, RevokeAllSummary};
pub use order::{Order, OrderRejection, OrderStatus};

//! Core types for the order lifecycle workspace.
//!
//! Decimal amounts use [`rust_decimal::Decimal`] throughout; venue times are
//! carried as [`Timestamp`] nanoseconds since the Unix epoch.

pub mod order;
pub mod timestamp;

// Re-export primary types for convenient access via `tq_core::types::*`.
pub use order::{
    Action, OrderId, OrderType, ParseEnumError, RemoteOrderId, StrategyIdentity, Symbol,
};
pub use rust_decimal::Decimal;
pub use timestamp::Timestamp;

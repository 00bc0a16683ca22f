//! # tq-core
//!
//! Shared building blocks for the order lifecycle workspace.
//!
//! This crate provides the order vocabulary every other crate speaks (local and
//! venue order identifiers, action, order type, strategy identity), venue-clock
//! timestamps, layered configuration loading, and the tracing setup used by the
//! trading binary.

pub mod config;
pub mod logging;
pub mod types;

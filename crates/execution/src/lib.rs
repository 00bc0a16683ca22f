//! # tq-execution
//!
//! The venue seam. [`gateway::ExchangeGateway`] is what the lifecycle manager
//! calls to submit, cancel and query orders; [`gateway::RawOrderEvent`] is what
//! a venue adapter pushes back. [`paper::PaperGateway`] is a simulated
//! single-symbol venue.

pub mod gateway;
pub mod paper;

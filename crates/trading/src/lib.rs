//! Trading session library, shared by the binary and integration tests.

pub mod handler;
pub mod session;

//! Execution module
//!
//! Market order submission with bounded retry, fill verification and exit
//! price resolution. Broker rejections arrive already classified by the
//! gateway; recovery here matches on [`crate::gateway::ExecutionErrorKind`].

mod client;
mod types;

pub use client::ExecutionClient;
pub use types::{ExecutionSettings, Fill, FillOutcome, OrderHandle};

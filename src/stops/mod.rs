//! Stop management module
//!
//! Entry stop planning and the per-tick exit state machine:
//! `Grace -> Active -> Breakeven -> Trailing -> Closing`. The catastrophic
//! check runs in every state.

mod atr;
mod engine;
mod types;

pub use atr::{atr_pct, average_true_range, true_range};
pub use engine::StopEngine;
pub use types::{EntryPlan, ExitReason, StopDecision, StopState};

//! Risk management module
//!
//! Admission control, position sizing, and session risk state

mod gate;
mod sizing;
mod state;
mod types;

pub use gate::RiskGate;
pub use sizing::RiskSizer;
pub use state::RiskState;
pub use types::{Admission, RiskViolation};

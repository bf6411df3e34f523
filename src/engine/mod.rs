//! Engine module
//!
//! Owns the ledger, risk state and scheduler, and drives them from a single
//! tick loop. Position-changing work for a symbol runs under that symbol's
//! lock.

mod diagnostics;
mod driver;
mod state;

pub use diagnostics::{Diagnostics, DiagnosticsHandle};
pub use driver::{Engine, TickReport};
pub use state::{EngineState, SymbolLocks};

//! Signal module
//!
//! Signal types, the strategy interface, and pre-admission filters.
//! Strategies themselves live outside this crate.

mod filter;
mod types;

pub use filter::{FilterConfig, FilterResult, RejectReason, SignalFilter};
pub use types::{Side, Signal};

use crate::gateway::Bar;

/// Trait for external signal producers
///
/// Implementations must return quickly; errors and panics are caught by the
/// engine and logged, never allowed to halt it.
pub trait Strategy: Send + Sync {
    /// Stable identifier recorded on signals and trade records
    fn id(&self) -> &str;

    /// Evaluate recent bars for a symbol and optionally emit a signal
    fn generate_signal(&self, symbol: &str, bars: &[Bar]) -> anyhow::Result<Option<Signal>>;
}

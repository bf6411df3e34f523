//! Trade persistence module
//!
//! Finalized trades are appended to a JSON-lines log as they close.

mod trade_log;

pub use trade_log::{TradeLog, TradeSummary};

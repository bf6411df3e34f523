//! Position module
//!
//! The ledger of open positions, finalized trade records, and reconciliation
//! against the broker.

mod ledger;
mod types;

pub use ledger::PositionLedger;
pub use types::{LedgerError, Position, ReconcileReport, SignalAdmission, TradeRecord};

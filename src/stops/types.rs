//! Stop management types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Lifecycle state of a position's protective stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopState {
    /// Post-entry window, only catastrophic losses exit
    Grace,
    /// Planned stop, target and hold limit enforced
    Active,
    /// Stop moved to entry
    Breakeven,
    /// Stop following price
    Trailing,
    /// Exit decided, flatten in progress
    Closing,
}

/// Why a position was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExitReason {
    StopLoss,
    TrailingStop,
    Breakeven,
    ProfitTarget,
    MaxHoldTime,
    Catastrophic,
    SignalReversal,
    Reconciliation,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "StopLoss"),
            ExitReason::TrailingStop => write!(f, "TrailingStop"),
            ExitReason::Breakeven => write!(f, "BreakevenStop"),
            ExitReason::ProfitTarget => write!(f, "ProfitTarget"),
            ExitReason::MaxHoldTime => write!(f, "MaxHoldTime"),
            ExitReason::Catastrophic => write!(f, "CatastrophicStop"),
            ExitReason::SignalReversal => write!(f, "SignalReversal"),
            ExitReason::Reconciliation => write!(f, "Reconciliation"),
        }
    }
}

/// Result of evaluating a position's stops
#[derive(Debug, Clone, PartialEq)]
pub enum StopDecision {
    Hold,
    Exit { reason: ExitReason, price: Decimal },
}

impl StopDecision {
    pub fn is_exit(&self) -> bool {
        matches!(self, StopDecision::Exit { .. })
    }
}

/// Protective levels chosen at entry
#[derive(Debug, Clone, PartialEq)]
pub struct EntryPlan {
    pub stop_price: Decimal,
    pub target_price: Decimal,
    /// Stop distance as a fraction of entry
    pub stop_pct: Decimal,
    pub grace_deadline: DateTime<Utc>,
}

//! Position and trade record types

use crate::signal::Side;
use crate::stops::{EntryPlan, ExitReason, StopState};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// An open position owned by the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub strategy_id: String,
    /// Originating signal, absent for adopted positions
    pub signal_id: Option<Uuid>,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    /// Current protective stop
    pub stop_price: Decimal,
    /// Stop at entry, the basis for R
    pub initial_stop_price: Decimal,
    pub target_price: Decimal,
    pub entry_time: DateTime<Utc>,
    /// Planned stop distance as a fraction of entry
    pub stop_pct: Decimal,
    pub grace_deadline: DateTime<Utc>,
    pub breakeven_set: bool,
    pub trailing_active: bool,
    pub stop_state: StopState,
    /// Best excursion as a fraction of entry
    pub max_favorable_pct: Decimal,
    /// Worst excursion as a fraction of entry (positive number)
    pub max_adverse_pct: Decimal,
    pub peak_r: Decimal,
    /// Rebuilt from the broker rather than opened by the engine
    pub adopted: bool,
    pub last_price: Option<Decimal>,
}

impl Position {
    #[allow(clippy::too_many_arguments)]
    pub fn from_plan(
        symbol: &str,
        side: Side,
        strategy_id: &str,
        signal_id: Option<Uuid>,
        entry_price: Decimal,
        quantity: Decimal,
        plan: &EntryPlan,
        entry_time: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.to_string(),
            side,
            strategy_id: strategy_id.to_string(),
            signal_id,
            entry_price,
            quantity,
            stop_price: plan.stop_price,
            initial_stop_price: plan.stop_price,
            target_price: plan.target_price,
            entry_time,
            stop_pct: plan.stop_pct,
            grace_deadline: plan.grace_deadline,
            breakeven_set: false,
            trailing_active: false,
            stop_state: if plan.grace_deadline > entry_time {
                StopState::Grace
            } else {
                StopState::Active
            },
            max_favorable_pct: Decimal::ZERO,
            max_adverse_pct: Decimal::ZERO,
            peak_r: Decimal::ZERO,
            adopted: false,
            last_price: None,
        }
    }

    /// Per-share risk at entry
    pub fn initial_risk(&self) -> Decimal {
        (self.entry_price - self.initial_stop_price).abs()
    }

    /// Signed return at `price` as a fraction of entry
    pub fn pnl_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price * self.side.sign()
    }

    /// Unrealized dollars at `price`
    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity * self.side.sign()
    }

    /// Favorable move in units of initial risk
    pub fn r_multiple(&self, price: Decimal) -> Decimal {
        let risk = self.initial_risk();
        if risk.is_zero() {
            return Decimal::ZERO;
        }
        (price - self.entry_price) * self.side.sign() / risk
    }

    pub fn notional(&self) -> Decimal {
        self.entry_price * self.quantity
    }

    /// Update excursion tracking with a new price
    pub fn update_excursions(&mut self, price: Decimal) {
        let pct = self.pnl_pct(price);
        if pct > self.max_favorable_pct {
            self.max_favorable_pct = pct;
        }
        if -pct > self.max_adverse_pct {
            self.max_adverse_pct = -pct;
        }
        let r = self.r_multiple(price);
        if r > self.peak_r {
            self.peak_r = r;
        }
        self.last_price = Some(price);
    }
}

/// A finalized round trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    pub symbol: String,
    pub strategy_id: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    pub realized_pnl: Decimal,
    pub pnl_pct: Decimal,
    pub r_multiple: Decimal,
    pub hold_secs: i64,
    pub max_adverse_pct: Decimal,
    pub max_favorable_pct: Decimal,
    pub exit_reason: ExitReason,
    pub adopted: bool,
}

impl TradeRecord {
    /// Finalize `position` at `exit_price`
    pub fn finalize(
        position: &Position,
        exit_price: Decimal,
        reason: ExitReason,
        exit_time: DateTime<Utc>,
    ) -> Self {
        let mut position = position.clone();
        position.update_excursions(exit_price);
        Self {
            id: Uuid::new_v4(),
            symbol: position.symbol.clone(),
            strategy_id: position.strategy_id.clone(),
            side: position.side,
            quantity: position.quantity,
            entry_price: position.entry_price,
            exit_price,
            entry_time: position.entry_time,
            exit_time,
            realized_pnl: position.unrealized_pnl(exit_price),
            pnl_pct: position.pnl_pct(exit_price),
            r_multiple: position.r_multiple(exit_price),
            hold_secs: (exit_time - position.entry_time).num_seconds(),
            max_adverse_pct: position.max_adverse_pct,
            max_favorable_pct: position.max_favorable_pct,
            exit_reason: reason,
            adopted: position.adopted,
        }
    }

    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }
}

/// How the ledger treats an incoming signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalAdmission {
    /// No position, may open
    Open,
    /// Same-direction position already open
    Duplicate,
    /// Opposite-direction position open, close it instead
    Reverse,
    /// Symbol excluded by reconciliation
    Excluded,
}

/// Outcome of reconciling against broker positions
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    /// Untracked broker positions now managed
    pub adopted: Vec<Position>,
    /// Untracked broker positions left alone
    pub excluded: Vec<String>,
    /// Tracked positions the broker does not have
    pub phantoms: Vec<Position>,
    /// Tracked positions whose quantity was corrected
    pub resized: Vec<String>,
    /// Excluded symbols whose broker position is gone
    pub released: Vec<String>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.adopted.is_empty()
            && self.excluded.is_empty()
            && self.phantoms.is_empty()
            && self.resized.is_empty()
            && self.released.is_empty()
    }
}

/// Ledger errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("position already open for {0}")]
    DuplicatePosition(String),
    #[error("no open position for {0}")]
    NotFound(String),
    #[error("phantom position detected for {0}")]
    PhantomPositionDetected(String),
    #[error("{0} is excluded from trading")]
    Excluded(String),
}

//! Owned engine state and per-symbol locks

use crate::position::PositionLedger;
use crate::risk::RiskState;
use crate::scheduler::CooldownScheduler;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

/// Everything the engine mutates between ticks
///
/// Held behind a synchronous mutex and never across an await point.
#[derive(Debug)]
pub struct EngineState {
    pub ledger: PositionLedger,
    pub risk: RiskState,
    pub scheduler: CooldownScheduler,
    /// Last equity seen from the broker, for risk budgets between fetches
    pub last_equity: Option<Decimal>,
}

impl EngineState {
    pub fn new(scheduler: CooldownScheduler, now: DateTime<Utc>) -> Self {
        Self {
            ledger: PositionLedger::new(),
            risk: RiskState::new(now),
            scheduler,
            last_equity: None,
        }
    }
}

/// One async mutex per symbol
///
/// Position-changing work for a symbol (stop exits, entries, reversals)
/// runs only while holding that symbol's guard.
#[derive(Debug, Default)]
pub struct SymbolLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SymbolLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, symbol: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .entry(symbol.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }
}

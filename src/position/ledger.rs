//! Authoritative open positions

use super::{LedgerError, Position, ReconcileReport, SignalAdmission, TradeRecord};
use crate::gateway::BrokerPosition;
use crate::signal::Signal;
use crate::stops::{EntryPlan, ExitReason, StopEngine};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};

/// At most one position per symbol, plus closed trade history
#[derive(Debug, Default)]
pub struct PositionLedger {
    positions: HashMap<String, Position>,
    closed: Vec<TradeRecord>,
    /// Symbols removed because the broker had no position
    phantoms: HashSet<String>,
    /// Untracked broker positions the engine must not touch
    excluded: HashSet<String>,
}

impl PositionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a position after a verified fill
    pub fn open(
        &mut self,
        signal: &Signal,
        fill_price: Decimal,
        quantity: Decimal,
        plan: &EntryPlan,
        at: DateTime<Utc>,
    ) -> Result<&Position, LedgerError> {
        let symbol = signal.symbol.as_str();
        if self.positions.contains_key(symbol) {
            return Err(LedgerError::DuplicatePosition(symbol.to_string()));
        }
        if self.excluded.contains(symbol) {
            return Err(LedgerError::Excluded(symbol.to_string()));
        }

        let position = Position::from_plan(
            symbol,
            signal.side,
            &signal.strategy_id,
            Some(signal.id),
            fill_price,
            quantity,
            plan,
            at,
        );
        tracing::info!(
            symbol,
            side = %position.side,
            qty = %quantity,
            entry = %fill_price,
            stop = %position.stop_price,
            target = %position.target_price,
            strategy = %position.strategy_id,
            "Position opened"
        );
        telemetry::increment(CounterMetric::PositionsOpened);

        self.phantoms.remove(symbol);
        Ok(self.positions.entry(symbol.to_string()).or_insert(position))
    }

    /// Remove a position and finalize its trade record
    pub fn close(
        &mut self,
        symbol: &str,
        exit_price: Decimal,
        reason: ExitReason,
        at: DateTime<Utc>,
    ) -> Result<TradeRecord, LedgerError> {
        let position = self
            .positions
            .remove(symbol)
            .ok_or_else(|| LedgerError::NotFound(symbol.to_string()))?;

        let record = TradeRecord::finalize(&position, exit_price, reason, at);
        tracing::info!(
            symbol,
            side = %record.side,
            qty = %record.quantity,
            entry = %record.entry_price,
            exit = %record.exit_price,
            pnl = %record.realized_pnl,
            r = %record.r_multiple.round_dp(2),
            hold_secs = record.hold_secs,
            %reason,
            "Position closed"
        );
        telemetry::increment_with(CounterMetric::PositionsClosed, "reason", reason.to_string());
        self.closed.push(record.clone());
        Ok(record)
    }

    /// Remove a tracked position the broker no longer holds
    ///
    /// The symbol is remembered so reconciliation never re-creates it.
    pub fn drop_phantom(&mut self, symbol: &str) -> Option<Position> {
        let position = self.positions.remove(symbol)?;
        let err = LedgerError::PhantomPositionDetected(symbol.to_string());
        tracing::warn!(symbol, side = %position.side, qty = %position.quantity, error = %err, "Removing phantom position");
        telemetry::increment(CounterMetric::PhantomPositions);
        self.phantoms.insert(symbol.to_string());
        Some(position)
    }

    pub fn get(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    pub fn get_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.positions.get_mut(symbol)
    }

    /// Update excursion tracking for a new price
    pub fn mark(&mut self, symbol: &str, price: Decimal) -> Option<&Position> {
        let position = self.positions.get_mut(symbol)?;
        position.update_excursions(price);
        Some(position)
    }

    /// How an incoming signal relates to what is already held
    pub fn admit_signal(&self, signal: &Signal) -> SignalAdmission {
        if self.excluded.contains(&signal.symbol) {
            return SignalAdmission::Excluded;
        }
        match self.positions.get(&signal.symbol) {
            None => SignalAdmission::Open,
            Some(p) if p.side == signal.side => SignalAdmission::Duplicate,
            Some(_) => SignalAdmission::Reverse,
        }
    }

    /// Align tracked positions with the broker's list
    ///
    /// Untracked broker positions are adopted or excluded per `adopt_untracked`.
    /// Tracked positions the broker lacks are removed as phantoms and never
    /// re-created from a later reconciliation.
    pub fn reconcile(
        &mut self,
        broker: &[BrokerPosition],
        adopt_untracked: bool,
        stops: &StopEngine,
        now: DateTime<Utc>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let at_broker: HashMap<&str, &BrokerPosition> = broker
            .iter()
            .filter(|p| !p.qty.is_zero())
            .map(|p| (p.symbol.as_str(), p))
            .collect();

        let tracked: Vec<String> = self.positions.keys().cloned().collect();
        for symbol in tracked {
            let Some(remote) = at_broker.get(symbol.as_str()) else {
                if let Some(position) = self.drop_phantom(&symbol) {
                    report.phantoms.push(position);
                }
                continue;
            };

            let Some(local) = self.positions.get_mut(&symbol) else {
                continue;
            };
            if local.side != remote.side {
                tracing::error!(
                    symbol = %symbol,
                    local = %local.side,
                    broker = %remote.side,
                    "Broker position side disagrees, dropping and excluding"
                );
                if let Some(position) = self.positions.remove(&symbol) {
                    report.phantoms.push(position);
                }
                self.phantoms.insert(symbol.clone());
                continue;
            }
            if local.quantity != remote.qty {
                tracing::warn!(
                    symbol = %symbol,
                    local = %local.quantity,
                    broker = %remote.qty,
                    "Quantity drift, adopting broker quantity"
                );
                local.quantity = remote.qty;
                report.resized.push(symbol.clone());
            }
        }

        for (symbol, remote) in &at_broker {
            if self.positions.contains_key(*symbol) || self.excluded.contains(*symbol) {
                continue;
            }
            if adopt_untracked && !self.phantoms.contains(*symbol) {
                let plan = stops.plan_adopted(remote.side, remote.avg_entry_price, now);
                let mut position = Position::from_plan(
                    symbol,
                    remote.side,
                    "adopted",
                    None,
                    remote.avg_entry_price,
                    remote.qty,
                    &plan,
                    now,
                );
                position.adopted = true;
                tracing::info!(
                    symbol,
                    side = %position.side,
                    qty = %position.quantity,
                    entry = %position.entry_price,
                    stop = %position.stop_price,
                    "Adopted untracked broker position"
                );
                telemetry::increment(CounterMetric::AdoptedPositions);
                report.adopted.push(position.clone());
                self.positions.insert(symbol.to_string(), position);
            } else {
                tracing::warn!(symbol, "Untracked broker position excluded from trading");
                self.excluded.insert(symbol.to_string());
                report.excluded.push(symbol.to_string());
            }
        }

        let released: Vec<String> = self
            .excluded
            .iter()
            .filter(|s| !at_broker.contains_key(s.as_str()))
            .cloned()
            .collect();
        for symbol in released {
            tracing::info!(symbol = %symbol, "Excluded position gone at broker, symbol released");
            self.excluded.remove(&symbol);
            report.released.push(symbol);
        }

        report
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.positions.keys().cloned().collect();
        symbols.sort();
        symbols
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn closed_trades(&self) -> &[TradeRecord] {
        &self.closed
    }

    pub fn realized_pnl(&self) -> Decimal {
        self.closed.iter().map(|t| t.realized_pnl).sum()
    }

    pub fn is_phantom(&self, symbol: &str) -> bool {
        self.phantoms.contains(symbol)
    }

    pub fn is_excluded(&self, symbol: &str) -> bool {
        self.excluded.contains(symbol)
    }

    pub fn excluded_symbols(&self) -> Vec<String> {
        let mut symbols: Vec<String> = self.excluded.iter().cloned().collect();
        symbols.sort();
        symbols
    }
}

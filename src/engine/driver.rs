//! Engine driver
//!
//! One loop, two cadences: the fast tick evaluates stops for open positions
//! and the slow tick reconciles, evaluates strategies and admits new
//! positions. Both run as arms of a single biased `select!`, so a stop pass
//! always completes before any signal work starts.

use super::{DiagnosticsHandle, EngineState, SymbolLocks};
use crate::cache::{CacheContext, MarketData, MarketDataCache};
use crate::clock::Clock;
use crate::config::{Config, EngineConfig, ReconcileConfig};
use crate::data::TradeLog;
use crate::error::EngineError;
use crate::execution::{ExecutionClient, ExecutionSettings};
use crate::gateway::{Bar, BrokerGateway, ExecutionErrorKind};
use crate::position::{LedgerError, Position, ReconcileReport, SignalAdmission, TradeRecord};
use crate::risk::{Admission, RiskGate, RiskState};
use crate::scheduler::CooldownScheduler;
use crate::signal::{FilterConfig, FilterResult, Signal, SignalFilter, Strategy};
use crate::stops::{atr_pct, ExitReason, StopDecision, StopEngine};
use crate::telemetry::{self, CounterMetric, GaugeMetric, LatencyMetric};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Key used in diagnostics for failures not tied to one symbol
const ACCOUNT_KEY: &str = "*";

/// What a single tick did
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub closed: Vec<TradeRecord>,
    pub opened: Vec<Position>,
    /// Symbols skipped by cooldown, pause, exclusion or a same-tick exit
    pub filtered: Vec<String>,
    /// `(symbol, error tag)` for every failed action
    pub errors: Vec<(String, String)>,
    pub reconcile: Option<ReconcileReport>,
    /// False only when the whole feed is down
    pub data_healthy: bool,
    /// Symbols skipped this tick because their own data was missing or stale
    pub unhealthy_symbols: Vec<String>,
}

impl TickReport {
    fn new() -> Self {
        Self {
            data_healthy: true,
            ..Default::default()
        }
    }

    fn exited(&self, symbol: &str) -> bool {
        self.closed.iter().any(|r| r.symbol == symbol)
    }
}

/// The position lifecycle engine
pub struct Engine {
    settings: EngineConfig,
    reconcile_config: ReconcileConfig,
    clock: Arc<dyn Clock>,
    data: MarketData,
    execution: ExecutionClient,
    gate: RiskGate,
    stops: StopEngine,
    filter: SignalFilter,
    strategies: Vec<Arc<dyn Strategy>>,
    state: Mutex<EngineState>,
    locks: SymbolLocks,
    diagnostics: DiagnosticsHandle,
    diagnostics_path: Option<PathBuf>,
    trade_log: Option<TradeLog>,
    slow_ticks: AtomicU64,
}

impl Engine {
    pub fn new(config: &Config, gateway: Arc<dyn BrokerGateway>, clock: Arc<dyn Clock>) -> Self {
        let cache = Arc::new(MarketDataCache::new(config.cache.clone(), clock.clone()));
        let data = MarketData::new(gateway, cache);
        let execution = ExecutionClient::new(
            data.clone(),
            ExecutionSettings::from(&config.execution),
            clock.clone(),
        );
        let scheduler = CooldownScheduler::new(config.cooldown.clone());

        Self {
            settings: config.engine.clone(),
            reconcile_config: config.reconcile.clone(),
            state: Mutex::new(EngineState::new(scheduler, clock.now())),
            clock,
            data,
            execution,
            gate: RiskGate::new(config.risk.clone(), config.sizing.clone()),
            stops: StopEngine::new(config.stops.clone()),
            filter: SignalFilter::new(FilterConfig::from(&config.signal)),
            strategies: Vec::new(),
            locks: SymbolLocks::new(),
            diagnostics: DiagnosticsHandle::new(),
            diagnostics_path: None,
            trade_log: None,
            slow_ticks: AtomicU64::new(0),
        }
    }

    pub fn with_strategy(mut self, strategy: Arc<dyn Strategy>) -> Self {
        self.strategies.push(strategy);
        self
    }

    pub fn with_trade_log(mut self, log: TradeLog) -> Self {
        self.trade_log = Some(log);
        self
    }

    /// Write the diagnostics snapshot to `path` after every slow tick
    pub fn with_diagnostics_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.diagnostics_path = Some(path.into());
        self
    }

    pub fn diagnostics(&self) -> DiagnosticsHandle {
        self.diagnostics.clone()
    }

    pub fn data(&self) -> &MarketData {
        &self.data
    }

    /// Read-only access to engine state
    pub fn inspect<R>(&self, f: impl FnOnce(&EngineState) -> R) -> R {
        f(&self.state.lock())
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.inspect(|s| s.ledger.get(symbol).cloned())
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> =
            self.inspect(|s| s.ledger.open_positions().cloned().collect());
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    pub fn closed_trades(&self) -> Vec<TradeRecord> {
        self.inspect(|s| s.ledger.closed_trades().to_vec())
    }

    pub fn risk_state(&self) -> RiskState {
        self.inspect(|s| s.risk.clone())
    }

    /// Run until `shutdown` flips to true or its sender is dropped
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        let mut fast = tokio::time::interval(self.settings.fast_tick());
        let mut slow = tokio::time::interval(self.settings.slow_tick());
        fast.set_missed_tick_behavior(MissedTickBehavior::Delay);
        slow.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.diagnostics.update(|d| d.running = true);
        tracing::info!(
            symbols = ?self.settings.symbols,
            strategies = self.strategies.len(),
            fast_tick_ms = self.settings.fast_tick_ms,
            slow_tick_ms = self.settings.slow_tick_ms,
            "Engine started"
        );

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::info!("Shutdown requested");
                        break;
                    }
                }
                _ = fast.tick() => {
                    self.fast_tick().await;
                }
                _ = slow.tick() => {
                    self.slow_tick().await;
                }
            }
        }

        self.diagnostics.update(|d| d.running = false);
        self.persist_diagnostics();
        tracing::info!(
            open_positions = self.positions().len(),
            closed_trades = self.closed_trades().len(),
            "Engine stopped"
        );
        Ok(())
    }

    /// Evaluate stops for every open position
    pub async fn fast_tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::new();
        self.stop_pass(&mut report).await;

        let positions = self.positions();
        self.diagnostics.update(|d| {
            d.data_healthy = report.data_healthy;
            d.unhealthy_symbols = report.unhealthy_symbols.clone();
            d.active_positions = positions;
        });
        telemetry::set_gauge(GaugeMetric::DataHealthy, health_gauge(report.data_healthy));
        telemetry::record_latency(LatencyMetric::FastTick, started.elapsed());
        report
    }

    /// Stops, periodic reconciliation, then signals for every configured symbol
    pub async fn slow_tick(&self) -> TickReport {
        let started = Instant::now();
        let tick = self.slow_ticks.fetch_add(1, Ordering::Relaxed);
        let mut report = TickReport::new();

        {
            let now = self.clock.now();
            self.state.lock().risk.roll_session(now);
        }

        self.stop_pass(&mut report).await;

        if tick % self.reconcile_config.every_slow_ticks == 0 {
            match self.reconcile().await {
                Ok(outcome) => report.reconcile = Some(outcome),
                Err(err) => self.note_error(ACCOUNT_KEY, &err, &mut report),
            }
        }

        if report.data_healthy {
            match self.data.account(CacheContext::Monitoring).await {
                Ok(account) => {
                    self.state.lock().last_equity = Some(account.equity);
                    telemetry::set_gauge(
                        GaugeMetric::Equity,
                        account.equity.to_f64().unwrap_or_default(),
                    );
                }
                Err(e) => {
                    let err = EngineError::from_gateway(ACCOUNT_KEY, e);
                    self.note_error(ACCOUNT_KEY, &err, &mut report);
                }
            }
        }

        if report.data_healthy {
            self.signal_pass(&mut report).await;
        }

        self.publish_diagnostics(&report);
        telemetry::record_latency(LatencyMetric::SlowTick, started.elapsed());
        report
    }

    async fn stop_pass(&self, report: &mut TickReport) {
        let symbols = self.inspect(|s| s.ledger.symbols());
        for symbol in symbols {
            match self.monitor(&symbol).await {
                Ok(Some(record)) => report.closed.push(record),
                Ok(None) => {}
                Err(err) => {
                    self.note_error(&symbol, &err, report);
                    if !report.data_healthy {
                        break;
                    }
                }
            }
        }
    }

    async fn signal_pass(&self, report: &mut TickReport) {
        for symbol in &self.settings.symbols {
            if report.exited(symbol) {
                report.filtered.push(symbol.clone());
                continue;
            }
            match self.evaluate_symbol(symbol, report).await {
                Ok(Some(position)) => report.opened.push(position),
                Ok(None) => {}
                Err(err) => {
                    self.note_error(symbol, &err, report);
                    if !report.data_healthy {
                        break;
                    }
                }
            }
        }
    }

    /// Evaluate the stop for one open position and exit if it fires
    async fn monitor(&self, symbol: &str) -> Result<Option<TradeRecord>, EngineError> {
        let _guard = self.locks.lock(symbol).await;
        if self.position(symbol).is_none() {
            return Ok(None);
        }

        let price = self
            .data
            .mid(symbol, CacheContext::StopLossCheck)
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))?;
        let bars = match self
            .data
            .bars(symbol, self.settings.bars_lookback, CacheContext::Monitoring)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                tracing::debug!(symbol, error = %e, "No bars for stop evaluation, using percentage trail");
                Vec::new()
            }
        };

        let now = self.clock.now();
        let (decision, position) = {
            let mut state = self.state.lock();
            if state.ledger.mark(symbol, price).is_none() {
                return Ok(None);
            }
            match state.ledger.get_mut(symbol) {
                Some(position) => (
                    self.stops.evaluate(position, price, &bars, now),
                    position.clone(),
                ),
                None => return Ok(None),
            }
        };

        match decision {
            StopDecision::Hold => Ok(None),
            StopDecision::Exit { reason, .. } => self.close_position(&position, reason).await,
        }
    }

    /// Flatten and finalize a position; the caller holds the symbol lock
    ///
    /// A partial exit leaves the remainder open and returns `None`.
    async fn close_position(
        &self,
        position: &Position,
        reason: ExitReason,
    ) -> Result<Option<TradeRecord>, EngineError> {
        let symbol = position.symbol.as_str();

        let fill = match self.execution.flatten(position).await {
            Ok(fill) => fill,
            Err(EngineError::Ledger(LedgerError::PhantomPositionDetected(_))) => {
                let mut state = self.state.lock();
                if let Some(phantom) = state.ledger.drop_phantom(symbol) {
                    state.risk.record_close(symbol, phantom.side, Decimal::ZERO);
                }
                return Err(LedgerError::PhantomPositionDetected(symbol.to_string()).into());
            }
            Err(err) => {
                if let Some(open) = self.state.lock().ledger.get_mut(symbol) {
                    self.stops.resume(open);
                }
                return Err(err);
            }
        };

        let equity = match self.data.account_summary().await {
            Ok(account) => Some(account.equity),
            Err(_) => self.inspect(|s| s.last_equity),
        };
        let budget = equity
            .map(|e| self.gate.risk_budget(e))
            .unwrap_or(Decimal::MAX);
        let now = self.clock.now();

        let record = {
            let mut guard = self.state.lock();
            let state = &mut *guard;

            if fill.qty < position.quantity {
                if let Some(open) = state.ledger.get_mut(symbol) {
                    let pnl = (fill.price - open.entry_price) * fill.qty * open.side.sign();
                    open.quantity -= fill.qty;
                    self.stops.resume(open);
                    state
                        .risk
                        .record_partial(symbol, open.side, open.entry_price * fill.qty, pnl);
                    tracing::warn!(
                        symbol,
                        closed = %fill.qty,
                        remaining = %open.quantity,
                        %pnl,
                        %reason,
                        "Partial exit, remainder stays open"
                    );
                }
                return Ok(None);
            }

            let record = state.ledger.close(symbol, fill.price, reason, now)?;
            state.risk.record_close(symbol, record.side, record.realized_pnl);
            state.scheduler.on_trade_closed(
                symbol,
                record.realized_pnl,
                position.trailing_active,
                budget,
                &mut state.risk,
                now,
            );
            record
        };

        if let Some(log) = &self.trade_log {
            if let Err(e) = log.append(&record) {
                tracing::error!(symbol, trade_id = %record.id, error = %e, "Failed to append trade log");
            }
        }
        self.data.invalidate_symbol(symbol, "position closed");
        Ok(Some(record))
    }

    async fn evaluate_symbol(
        &self,
        symbol: &str,
        report: &mut TickReport,
    ) -> Result<Option<Position>, EngineError> {
        let now = self.clock.now();
        let gated = self.inspect(|s| {
            s.ledger.is_excluded(symbol) || !s.scheduler.can_generate(symbol, &s.risk, now)
        });
        if gated {
            report.filtered.push(symbol.to_string());
            return Ok(None);
        }
        if self.strategies.is_empty() {
            return Ok(None);
        }

        let bars = self
            .data
            .bars(symbol, self.settings.bars_lookback, CacheContext::SignalGeneration)
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))?;

        match self.generate(symbol, &bars) {
            Some(signal) => self.handle_signal(signal, &bars).await,
            None => Ok(None),
        }
    }

    /// First signal any strategy produces for `symbol`
    ///
    /// Strategy errors and panics are logged and counted, never propagated.
    fn generate(&self, symbol: &str, bars: &[Bar]) -> Option<Signal> {
        for strategy in &self.strategies {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                strategy.generate_signal(symbol, bars)
            }));
            match outcome {
                Ok(Ok(Some(signal))) if signal.symbol == symbol => {
                    telemetry::increment(CounterMetric::SignalsReceived);
                    tracing::info!(
                        symbol,
                        strategy = strategy.id(),
                        side = %signal.side,
                        confidence = %signal.confidence,
                        entry = %signal.entry_price,
                        "Signal received"
                    );
                    return Some(signal);
                }
                Ok(Ok(Some(signal))) => {
                    tracing::warn!(
                        symbol,
                        strategy = strategy.id(),
                        emitted_for = %signal.symbol,
                        "Signal for a different symbol ignored"
                    );
                }
                Ok(Ok(None)) => {}
                Ok(Err(e)) => {
                    tracing::warn!(symbol, strategy = strategy.id(), error = %e, "Strategy error");
                    telemetry::increment_with(CounterMetric::StrategyErrors, "kind", "error");
                }
                Err(panic) => {
                    tracing::error!(
                        symbol,
                        strategy = strategy.id(),
                        panic = panic_message(&*panic),
                        "Strategy panicked"
                    );
                    telemetry::increment_with(CounterMetric::StrategyErrors, "kind", "panic");
                }
            }
        }
        None
    }

    /// Filter, admit, size and open a position for `signal`
    ///
    /// An opposite-direction signal closes the held position instead of
    /// opening. Failures put the symbol on the matching cooldown.
    pub async fn handle_signal(
        &self,
        signal: Signal,
        bars: &[Bar],
    ) -> Result<Option<Position>, EngineError> {
        let symbol = signal.symbol.clone();
        let _guard = self.locks.lock(&symbol).await;

        let result = self.open_from_signal(signal, bars).await;
        if let Err(err) = &result {
            self.apply_failure_cooldown(&symbol, err);
        }
        result
    }

    async fn open_from_signal(
        &self,
        signal: Signal,
        bars: &[Bar],
    ) -> Result<Option<Position>, EngineError> {
        let symbol = signal.symbol.as_str();
        let now = self.clock.now();

        if let FilterResult::Reject(reason) = self.filter.apply(&signal, now) {
            telemetry::increment_with(CounterMetric::SignalsRejected, "reason", "filter");
            tracing::info!(symbol, strategy = %signal.strategy_id, %reason, "Signal filtered");
            return Ok(None);
        }

        match self.inspect(|s| s.ledger.admit_signal(&signal)) {
            SignalAdmission::Open => {}
            SignalAdmission::Duplicate | SignalAdmission::Excluded => {
                tracing::debug!(symbol, side = %signal.side, "Signal ignored, symbol already held or excluded");
                return Ok(None);
            }
            SignalAdmission::Reverse => {
                if let Some(held) = self.position(symbol) {
                    tracing::info!(
                        symbol,
                        held = %held.side,
                        signal = %signal.side,
                        "Opposite signal, closing instead of opening"
                    );
                    self.close_position(&held, ExitReason::SignalReversal).await?;
                }
                return Ok(None);
            }
        }

        let price = self
            .data
            .mid(symbol, CacheContext::OrderExecution)
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))?;
        let account = self
            .data
            .account(CacheContext::RiskCheck)
            .await
            .map_err(|e| EngineError::from_gateway(symbol, e))?;

        let volatility = atr_pct(bars, self.stops.config().atr_period);
        let plan = self.stops.plan_entry(
            signal.side,
            price,
            volatility,
            signal.stop_price,
            signal.target_price,
            now,
        );
        let quantity = self.gate.size_position(
            price,
            plan.stop_price,
            symbol,
            signal.side.entry_order_side(),
            &account,
            false,
            None,
        );

        let admission = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.last_equity = Some(account.equity);
            self.gate.can_open(
                &mut state.risk,
                symbol,
                signal.side,
                price,
                quantity,
                &account,
                now,
            )
        };
        match admission {
            Ok(Admission::Approved) => {}
            Ok(Admission::Denied(violation)) | Err(violation) => {
                telemetry::increment_with(CounterMetric::SignalsRejected, "reason", "risk");
                tracing::info!(symbol, side = %signal.side, qty = %quantity, %violation, "Admission denied");
                return Err(violation.into());
            }
        }

        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.scheduler.record_signal(symbol, &state.risk, now);
        }

        let fill = self.execution.enter(symbol, signal.side, quantity).await?;

        let opened_at = self.clock.now();
        let plan = self.stops.plan_entry(
            signal.side,
            fill.price,
            volatility,
            signal.stop_price,
            signal.target_price,
            opened_at,
        );
        let position = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let position = state
                .ledger
                .open(&signal, fill.price, fill.qty, &plan, opened_at)?
                .clone();
            state.risk.record_open(symbol, signal.side, position.notional());
            position
        };
        Ok(Some(position))
    }

    /// Align the ledger with broker positions and carry the result into risk state
    pub async fn reconcile(&self) -> Result<ReconcileReport, EngineError> {
        let broker = self
            .data
            .positions(CacheContext::RiskCheck)
            .await
            .map_err(|e| EngineError::from_gateway(ACCOUNT_KEY, e))?;
        let now = self.clock.now();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let report =
            state
                .ledger
                .reconcile(&broker, self.reconcile_config.adopt_untracked, &self.stops, now);
        for adopted in &report.adopted {
            state
                .risk
                .record_open(&adopted.symbol, adopted.side, adopted.notional());
        }
        for phantom in &report.phantoms {
            state
                .risk
                .record_close(&phantom.symbol, phantom.side, Decimal::ZERO);
        }
        if !report.is_clean() {
            tracing::info!(
                adopted = report.adopted.len(),
                excluded = report.excluded.len(),
                phantoms = report.phantoms.len(),
                resized = report.resized.len(),
                released = report.released.len(),
                "Reconciled with broker"
            );
        }
        Ok(report)
    }

    fn apply_failure_cooldown(&self, symbol: &str, err: &EngineError) {
        let now = self.clock.now();
        let mut state = self.state.lock();
        match err {
            EngineError::FillUnverified { .. } => state.scheduler.record_extended(symbol, now),
            EngineError::Execution(e) if e.kind == ExecutionErrorKind::Timeout => {
                state.scheduler.record_extended(symbol, now)
            }
            EngineError::DataUnavailable { .. } => {}
            _ => state.scheduler.record_failure(symbol, now),
        }
    }

    fn note_error(&self, symbol: &str, err: &EngineError, report: &mut TickReport) {
        if err.is_feed_level() {
            report.data_healthy = false;
        } else if err.is_symbol_data()
            && !report.unhealthy_symbols.iter().any(|s| s == symbol)
        {
            report.unhealthy_symbols.push(symbol.to_string());
        }
        match err {
            EngineError::Risk(_) => tracing::info!(symbol, kind = err.tag(), error = %err, "Action declined"),
            _ => tracing::warn!(symbol, kind = err.tag(), error = %err, "Action failed"),
        }
        report.errors.push((symbol.to_string(), err.tag().to_string()));

        let execution = matches!(
            err,
            EngineError::Execution(_) | EngineError::FillUnverified { .. }
        );
        self.diagnostics.update(|d| {
            d.last_errors_by_symbol
                .insert(symbol.to_string(), err.to_string());
            if execution {
                d.last_execution_error = Some(err.to_string());
            }
        });
    }

    fn publish_diagnostics(&self, report: &TickReport) {
        let now = self.clock.now();
        let positions = self.positions();
        let (multiplier, pause, pnl, equity) = self.inspect(|s| {
            (
                s.risk.cooldown_multiplier,
                s.risk.pause_remaining(now),
                s.risk.daily_realized_pnl,
                s.last_equity,
            )
        });

        self.diagnostics.update(|d| {
            d.data_healthy = report.data_healthy;
            d.unhealthy_symbols = report.unhealthy_symbols.clone();
            d.active_positions = positions;
            d.last_filtered_symbols = report.filtered.clone();
            d.cooldown_multiplier = multiplier;
            d.global_pause_remaining_secs = pause.map(|p| p.num_seconds());
            d.daily_realized_pnl = pnl;
            d.equity = equity;
            d.updated_at = Some(now);
        });
        telemetry::set_gauge(GaugeMetric::DataHealthy, health_gauge(report.data_healthy));
        self.persist_diagnostics();
    }

    fn persist_diagnostics(&self) {
        if let Some(path) = &self.diagnostics_path {
            if let Err(e) = self.diagnostics.write_to(path) {
                tracing::warn!(path = %path.display(), error = %e, "Could not write diagnostics");
            }
        }
    }

    /// Time according to the engine clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }
}

fn health_gauge(healthy: bool) -> f64 {
    if healthy {
        1.0
    } else {
        0.0
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

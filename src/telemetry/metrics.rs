//! Prometheus metrics
//!
//! Thin typed wrappers over the `metrics` facade. Without an installed
//! recorder every call is a no-op, so library code records unconditionally.

use std::time::Duration;

/// Counter metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterMetric {
    /// Cache lookups served
    CacheHit,
    /// Cache lookups that fell through to the gateway
    CacheMiss,
    /// Entries removed by invalidation
    CacheInvalidation,
    /// Cache locks not acquired in time
    CacheLockTimeout,
    /// Quotes or bars rejected for an old source timestamp
    StaleSourceData,
    /// Signals produced by strategies
    SignalsReceived,
    /// Signals rejected by filters or admission
    SignalsRejected,
    /// Orders sent to the broker
    OrdersSubmitted,
    /// Orders rejected by the broker
    OrderRejections,
    /// Resubmissions after a recoverable rejection
    OrderRetries,
    /// Fills not confirmed within the timeout
    FillsUnverified,
    /// Positions opened
    PositionsOpened,
    /// Positions closed
    PositionsClosed,
    /// Tracked positions missing at the broker
    PhantomPositions,
    /// Untracked broker positions adopted
    AdoptedPositions,
    /// Stop exits that lost more than planned
    StopOverruns,
    /// Short exposure reset with no lots backing it
    ExposureDriftResets,
    /// Strategy errors and panics
    StrategyErrors,
    /// Global pauses triggered by loss streaks
    GlobalPauses,
}

impl CounterMetric {
    pub fn name(self) -> &'static str {
        match self {
            CounterMetric::CacheHit => "scalp_cache_hits_total",
            CounterMetric::CacheMiss => "scalp_cache_misses_total",
            CounterMetric::CacheInvalidation => "scalp_cache_invalidations_total",
            CounterMetric::CacheLockTimeout => "scalp_cache_lock_timeouts_total",
            CounterMetric::StaleSourceData => "scalp_stale_source_data_total",
            CounterMetric::SignalsReceived => "scalp_signals_received_total",
            CounterMetric::SignalsRejected => "scalp_signals_rejected_total",
            CounterMetric::OrdersSubmitted => "scalp_orders_submitted_total",
            CounterMetric::OrderRejections => "scalp_order_rejections_total",
            CounterMetric::OrderRetries => "scalp_order_retries_total",
            CounterMetric::FillsUnverified => "scalp_fills_unverified_total",
            CounterMetric::PositionsOpened => "scalp_positions_opened_total",
            CounterMetric::PositionsClosed => "scalp_positions_closed_total",
            CounterMetric::PhantomPositions => "scalp_phantom_positions_total",
            CounterMetric::AdoptedPositions => "scalp_adopted_positions_total",
            CounterMetric::StopOverruns => "scalp_stop_overruns_total",
            CounterMetric::ExposureDriftResets => "scalp_short_exposure_drift_resets_total",
            CounterMetric::StrategyErrors => "scalp_strategy_errors_total",
            CounterMetric::GlobalPauses => "scalp_global_pauses_total",
        }
    }
}

/// Gauge metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GaugeMetric {
    /// Account equity
    Equity,
    /// Open position count
    OpenPositions,
    /// Tracked short notional
    ShortExposure,
    /// Realized P&L for the session
    DailyPnl,
    /// Adaptive cooldown multiplier
    CooldownMultiplier,
    /// 1 when live data is flowing, 0 otherwise
    DataHealthy,
}

impl GaugeMetric {
    pub fn name(self) -> &'static str {
        match self {
            GaugeMetric::Equity => "scalp_equity_usd",
            GaugeMetric::OpenPositions => "scalp_open_positions",
            GaugeMetric::ShortExposure => "scalp_short_exposure_usd",
            GaugeMetric::DailyPnl => "scalp_daily_pnl_usd",
            GaugeMetric::CooldownMultiplier => "scalp_cooldown_multiplier",
            GaugeMetric::DataHealthy => "scalp_data_healthy",
        }
    }
}

/// Latency metric types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatencyMetric {
    /// Order submission round trip
    OrderSubmission,
    /// Submit to verified fill
    FillVerification,
    /// Stop evaluation pass
    FastTick,
    /// Reconcile and signal pass
    SlowTick,
}

impl LatencyMetric {
    pub fn name(self) -> &'static str {
        match self {
            LatencyMetric::OrderSubmission => "scalp_order_submission_latency_ms",
            LatencyMetric::FillVerification => "scalp_fill_verification_latency_ms",
            LatencyMetric::FastTick => "scalp_fast_tick_latency_ms",
            LatencyMetric::SlowTick => "scalp_slow_tick_latency_ms",
        }
    }
}

/// Increment a counter by one
pub fn increment(metric: CounterMetric) {
    metrics::counter!(metric.name()).increment(1);
}

/// Increment a counter by one with a single label
pub fn increment_with(metric: CounterMetric, label: &'static str, value: impl Into<String>) {
    let value: String = value.into();
    metrics::counter!(metric.name(), label => value).increment(1);
}

/// Set a gauge value
pub fn set_gauge(metric: GaugeMetric, value: f64) {
    metrics::gauge!(metric.name()).set(value);
}

/// Record a latency measurement
pub fn record_latency(metric: LatencyMetric, duration: Duration) {
    metrics::histogram!(metric.name()).record(duration.as_secs_f64() * 1000.0);
}

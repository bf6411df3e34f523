//! Configuration types for scalp-engine

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub sizing: SizingConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub stops: StopsConfig,
    #[serde(default)]
    pub cooldown: CooldownConfig,
    #[serde(default)]
    pub reconcile: ReconcileConfig,
    #[serde(default)]
    pub signal: SignalConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Brokerage gateway configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    /// Trading API base URL
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Market data API base URL
    #[serde(default = "default_data_url")]
    pub data_url: String,

    /// Environment variable holding the API key id
    #[serde(default = "default_key_id_env")]
    pub key_id_env: String,

    /// Environment variable holding the API secret
    #[serde(default = "default_secret_key_env")]
    pub secret_key_env: String,

    /// HTTP client timeout (milliseconds)
    #[serde(default = "default_gateway_timeout_ms")]
    pub timeout_ms: u64,

    /// Bar timeframe requested from the data API
    #[serde(default = "default_bar_timeframe")]
    pub bar_timeframe: String,
}

fn default_base_url() -> String {
    crate::gateway::PAPER_TRADING_URL.to_string()
}
fn default_data_url() -> String {
    crate::gateway::MARKET_DATA_URL.to_string()
}
fn default_key_id_env() -> String {
    "APCA_API_KEY_ID".to_string()
}
fn default_secret_key_env() -> String {
    "APCA_API_SECRET_KEY".to_string()
}
fn default_gateway_timeout_ms() -> u64 {
    5000
}
fn default_bar_timeframe() -> String {
    "1Min".to_string()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            data_url: default_data_url(),
            key_id_env: default_key_id_env(),
            secret_key_env: default_secret_key_env(),
            timeout_ms: default_gateway_timeout_ms(),
            bar_timeframe: default_bar_timeframe(),
        }
    }
}

/// Driver loop configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineConfig {
    /// Symbols evaluated for new signals
    #[serde(default)]
    pub symbols: Vec<String>,

    /// Stop evaluation interval (milliseconds)
    #[serde(default = "default_fast_tick_ms")]
    pub fast_tick_ms: u64,

    /// Signal/reconcile interval (milliseconds)
    #[serde(default = "default_slow_tick_ms")]
    pub slow_tick_ms: u64,

    /// Bars fetched per signal evaluation
    #[serde(default = "default_bars_lookback")]
    pub bars_lookback: usize,

    /// Diagnostics snapshot written each slow tick
    #[serde(default = "default_diagnostics_path")]
    pub diagnostics_path: PathBuf,
}

fn default_fast_tick_ms() -> u64 {
    1000
}
fn default_slow_tick_ms() -> u64 {
    5000
}
fn default_bars_lookback() -> usize {
    60
}
fn default_diagnostics_path() -> PathBuf {
    PathBuf::from("./diagnostics.json")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbols: Vec::new(),
            fast_tick_ms: default_fast_tick_ms(),
            slow_tick_ms: default_slow_tick_ms(),
            bars_lookback: default_bars_lookback(),
            diagnostics_path: default_diagnostics_path(),
        }
    }
}

impl EngineConfig {
    pub fn fast_tick(&self) -> Duration {
        Duration::from_millis(self.fast_tick_ms)
    }

    pub fn slow_tick(&self) -> Duration {
        Duration::from_millis(self.slow_tick_ms)
    }
}

/// Market data cache TTLs (milliseconds)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default = "default_quote_ttl_ms")]
    pub quote_ttl_ms: u64,

    #[serde(default = "default_bars_ttl_ms")]
    pub bars_ttl_ms: u64,

    /// Account and position snapshots
    #[serde(default = "default_snapshot_ttl_ms")]
    pub snapshot_ttl_ms: u64,

    #[serde(default = "default_account_summary_ttl_ms")]
    pub account_summary_ttl_ms: u64,

    #[serde(default = "default_order_availability_ttl_ms")]
    pub order_availability_ttl_ms: u64,

    /// Maximum age of a critical entry served to critical contexts
    #[serde(default = "default_critical_max_age_ms")]
    pub critical_max_age_ms: u64,

    /// How long a cache operation may wait on a slot lock before treating it as a miss
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Oldest quote timestamp accepted from the source
    #[serde(default = "default_max_quote_age_ms")]
    pub max_quote_age_ms: u64,

    /// Oldest final-bar timestamp accepted from the source
    #[serde(default = "default_max_bar_age_ms")]
    pub max_bar_age_ms: u64,
}

fn default_quote_ttl_ms() -> u64 {
    1500
}
fn default_bars_ttl_ms() -> u64 {
    5000
}
fn default_snapshot_ttl_ms() -> u64 {
    1000
}
fn default_account_summary_ttl_ms() -> u64 {
    10_000
}
fn default_order_availability_ttl_ms() -> u64 {
    1000
}
fn default_critical_max_age_ms() -> u64 {
    1000
}
fn default_lock_timeout_ms() -> u64 {
    5
}
fn default_max_quote_age_ms() -> u64 {
    60_000
}
fn default_max_bar_age_ms() -> u64 {
    600_000
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_ms: default_quote_ttl_ms(),
            bars_ttl_ms: default_bars_ttl_ms(),
            snapshot_ttl_ms: default_snapshot_ttl_ms(),
            account_summary_ttl_ms: default_account_summary_ttl_ms(),
            order_availability_ttl_ms: default_order_availability_ttl_ms(),
            critical_max_age_ms: default_critical_max_age_ms(),
            lock_timeout_ms: default_lock_timeout_ms(),
            max_quote_age_ms: default_max_quote_age_ms(),
            max_bar_age_ms: default_max_bar_age_ms(),
        }
    }
}

/// Admission limits
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    /// Maximum concurrent open positions
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,

    /// Daily realized loss limit as a fraction of equity
    #[serde(default = "default_max_daily_loss_pct")]
    pub max_daily_loss_pct: Decimal,

    /// Maximum total short notional (dollars)
    #[serde(default = "default_max_short_exposure")]
    pub max_short_exposure: Decimal,

    /// Fraction of buying power a single entry may consume
    #[serde(default = "default_max_buying_power_pct")]
    pub max_buying_power_pct: Decimal,

    /// Position notional limit as a fraction of equity
    #[serde(default = "default_max_position_pct")]
    pub max_position_pct: Decimal,
}

fn default_max_positions() -> usize {
    5
}
fn default_max_daily_loss_pct() -> Decimal {
    Decimal::new(2, 2) // 0.02 = 2%
}
fn default_max_short_exposure() -> Decimal {
    Decimal::new(25_000, 0)
}
fn default_max_buying_power_pct() -> Decimal {
    Decimal::new(90, 2) // 0.90
}
fn default_max_position_pct() -> Decimal {
    Decimal::new(10, 2) // 0.10 = 10%
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            max_daily_loss_pct: default_max_daily_loss_pct(),
            max_short_exposure: default_max_short_exposure(),
            max_buying_power_pct: default_max_buying_power_pct(),
            max_position_pct: default_max_position_pct(),
        }
    }
}

/// Risk-based position sizing
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SizingConfig {
    /// Fraction of equity risked per trade
    #[serde(default = "default_account_risk_pct")]
    pub account_risk_pct: Decimal,

    /// Smallest position notional worth opening (dollars)
    #[serde(default = "default_min_position_value")]
    pub min_position_value: Decimal,

    /// Largest position notional (dollars)
    #[serde(default = "default_max_position_value")]
    pub max_position_value: Decimal,

    /// Hard share cap
    #[serde(default = "default_max_shares")]
    pub max_shares: Decimal,
}

fn default_account_risk_pct() -> Decimal {
    Decimal::new(5, 3) // 0.005 = 0.5%
}
fn default_min_position_value() -> Decimal {
    Decimal::new(100, 0)
}
fn default_max_position_value() -> Decimal {
    Decimal::new(10_000, 0)
}
fn default_max_shares() -> Decimal {
    Decimal::new(1000, 0)
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            account_risk_pct: default_account_risk_pct(),
            min_position_value: default_min_position_value(),
            max_position_value: default_max_position_value(),
            max_shares: default_max_shares(),
        }
    }
}

/// Execution configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Deadline for each submit/cancel/status call (milliseconds)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// How long to wait for a fill (milliseconds)
    #[serde(default = "default_fill_timeout_ms")]
    pub fill_timeout_ms: u64,

    /// Poll interval while waiting for a fill (milliseconds)
    #[serde(default = "default_fill_poll_interval_ms")]
    pub fill_poll_interval_ms: u64,

    /// Wait after cancelling orders before resubmitting (milliseconds)
    #[serde(default = "default_cancel_settle_ms")]
    pub cancel_settle_ms: u64,
}

/// Where orders go
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionMode {
    /// Local simulated fills over live market data
    Simulated,
    /// Broker paper account
    #[default]
    Paper,
    /// Broker live account
    Live,
}

fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_fill_timeout_ms() -> u64 {
    10_000
}
fn default_fill_poll_interval_ms() -> u64 {
    250
}
fn default_cancel_settle_ms() -> u64 {
    500
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            request_timeout_ms: default_request_timeout_ms(),
            fill_timeout_ms: default_fill_timeout_ms(),
            fill_poll_interval_ms: default_fill_poll_interval_ms(),
            cancel_settle_ms: default_cancel_settle_ms(),
        }
    }
}

/// Stop management configuration
///
/// Percentages are fractions of price (0.005 = 0.5%); R values are multiples
/// of the initial per-share risk.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StopsConfig {
    #[serde(default = "default_base_stop_pct")]
    pub base_stop_pct: Decimal,

    #[serde(default = "default_min_stop_pct")]
    pub min_stop_pct: Decimal,

    #[serde(default = "default_max_stop_pct")]
    pub max_stop_pct: Decimal,

    /// ATR multiple used for the adaptive stop distance
    #[serde(default = "default_atr_multiplier")]
    pub atr_multiplier: Decimal,

    #[serde(default = "default_atr_period")]
    pub atr_period: usize,

    /// Profit target in R
    #[serde(default = "default_target_r")]
    pub target_r: Decimal,

    /// Post-entry window in which only catastrophic losses exit (seconds)
    #[serde(default = "default_grace_secs")]
    pub grace_secs: u64,

    #[serde(default = "default_catastrophic_multiplier")]
    pub catastrophic_multiplier: Decimal,

    #[serde(default = "default_breakeven_trigger_r")]
    pub breakeven_trigger_r: Decimal,

    #[serde(default = "default_trail_trigger_r")]
    pub trail_trigger_r: Decimal,

    #[serde(default = "default_trail_atr_multiplier")]
    pub trail_atr_multiplier: Decimal,

    /// Trailing distance when no ATR is available
    #[serde(default = "default_trail_pct")]
    pub trail_pct: Decimal,

    /// Bars scanned for the trailing extreme
    #[serde(default = "default_trail_lookback")]
    pub trail_lookback: usize,

    #[serde(default = "default_max_hold_secs")]
    pub max_hold_secs: u64,

    /// Relative excess over the planned stop loss that counts as an overrun
    #[serde(default = "default_stop_overrun_tolerance")]
    pub stop_overrun_tolerance: Decimal,
}

fn default_base_stop_pct() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}
fn default_min_stop_pct() -> Decimal {
    Decimal::new(3, 3) // 0.3%
}
fn default_max_stop_pct() -> Decimal {
    Decimal::new(2, 2) // 2%
}
fn default_atr_multiplier() -> Decimal {
    Decimal::new(15, 1) // 1.5
}
fn default_atr_period() -> usize {
    14
}
fn default_target_r() -> Decimal {
    Decimal::TWO
}
fn default_grace_secs() -> u64 {
    30
}
fn default_catastrophic_multiplier() -> Decimal {
    Decimal::new(12, 1) // 1.2
}
fn default_breakeven_trigger_r() -> Decimal {
    Decimal::ONE
}
fn default_trail_trigger_r() -> Decimal {
    Decimal::new(15, 1) // 1.5
}
fn default_trail_atr_multiplier() -> Decimal {
    Decimal::ONE
}
fn default_trail_pct() -> Decimal {
    Decimal::new(5, 3) // 0.5%
}
fn default_trail_lookback() -> usize {
    5
}
fn default_max_hold_secs() -> u64 {
    1800
}
fn default_stop_overrun_tolerance() -> Decimal {
    Decimal::new(5, 2) // 5%
}

impl Default for StopsConfig {
    fn default() -> Self {
        Self {
            base_stop_pct: default_base_stop_pct(),
            min_stop_pct: default_min_stop_pct(),
            max_stop_pct: default_max_stop_pct(),
            atr_multiplier: default_atr_multiplier(),
            atr_period: default_atr_period(),
            target_r: default_target_r(),
            grace_secs: default_grace_secs(),
            catastrophic_multiplier: default_catastrophic_multiplier(),
            breakeven_trigger_r: default_breakeven_trigger_r(),
            trail_trigger_r: default_trail_trigger_r(),
            trail_atr_multiplier: default_trail_atr_multiplier(),
            trail_pct: default_trail_pct(),
            trail_lookback: default_trail_lookback(),
            max_hold_secs: default_max_hold_secs(),
            stop_overrun_tolerance: default_stop_overrun_tolerance(),
        }
    }
}

/// Cooldown and pause configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CooldownConfig {
    /// Cooldown after an accepted signal (seconds, before multiplier)
    #[serde(default = "default_base_secs")]
    pub base_secs: u64,

    /// Cooldown after a rejected or failed signal (seconds)
    #[serde(default = "default_failure_secs")]
    pub failure_secs: u64,

    /// Cooldown after an unverified fill or timeout (seconds)
    #[serde(default = "default_extended_secs")]
    pub extended_secs: u64,

    /// Extra wait after a profitable trailing-stop exit (seconds)
    #[serde(default = "default_trailing_reentry_secs")]
    pub trailing_reentry_secs: u64,

    #[serde(default = "default_loss_step")]
    pub loss_step: Decimal,

    #[serde(default = "default_win_decay")]
    pub win_decay: Decimal,

    #[serde(default = "default_max_multiplier")]
    pub max_multiplier: Decimal,

    /// Loss larger than this fraction of the per-trade risk budget is "large"
    #[serde(default = "default_large_loss_fraction")]
    pub large_loss_fraction: Decimal,

    /// Consecutive losses that trigger a global pause
    #[serde(default = "default_loss_streak")]
    pub loss_streak: u32,

    #[serde(default = "default_global_pause_secs")]
    pub global_pause_secs: u64,
}

fn default_base_secs() -> u64 {
    60
}
fn default_failure_secs() -> u64 {
    180
}
fn default_extended_secs() -> u64 {
    600
}
fn default_trailing_reentry_secs() -> u64 {
    30
}
fn default_loss_step() -> Decimal {
    Decimal::new(125, 2) // 1.25
}
fn default_win_decay() -> Decimal {
    Decimal::new(9, 1) // 0.9
}
fn default_max_multiplier() -> Decimal {
    Decimal::new(3, 0)
}
fn default_large_loss_fraction() -> Decimal {
    Decimal::new(5, 1) // 0.5
}
fn default_loss_streak() -> u32 {
    3
}
fn default_global_pause_secs() -> u64 {
    900
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            base_secs: default_base_secs(),
            failure_secs: default_failure_secs(),
            extended_secs: default_extended_secs(),
            trailing_reentry_secs: default_trailing_reentry_secs(),
            loss_step: default_loss_step(),
            win_decay: default_win_decay(),
            max_multiplier: default_max_multiplier(),
            large_loss_fraction: default_large_loss_fraction(),
            loss_streak: default_loss_streak(),
            global_pause_secs: default_global_pause_secs(),
        }
    }
}

/// Broker reconciliation configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReconcileConfig {
    /// Reconcile on every Nth slow tick
    #[serde(default = "default_every_slow_ticks")]
    pub every_slow_ticks: u64,

    /// Adopt broker positions the engine did not open; otherwise exclude them
    #[serde(default = "default_true")]
    pub adopt_untracked: bool,
}

fn default_every_slow_ticks() -> u64 {
    6
}
fn default_true() -> bool {
    true
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            every_slow_ticks: default_every_slow_ticks(),
            adopt_untracked: true,
        }
    }
}

/// Signal admission configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignalConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: Decimal,

    /// Signals older than this are dropped (milliseconds)
    #[serde(default = "default_max_signal_age_ms")]
    pub max_signal_age_ms: i64,
}

fn default_min_confidence() -> Decimal {
    Decimal::new(6, 1) // 0.6
}
fn default_max_signal_age_ms() -> i64 {
    10_000
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            max_signal_age_ms: default_max_signal_age_ms(),
        }
    }
}

/// Trade log configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DataConfig {
    #[serde(default = "default_trade_log_path")]
    pub trade_log_path: PathBuf,
}

fn default_trade_log_path() -> PathBuf {
    PathBuf::from("./trades.jsonl")
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            trade_log_path: default_trade_log_path(),
        }
    }
}

/// Telemetry configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryConfig {
    /// Prometheus listener port, 0 disables the exporter
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

fn default_metrics_port() -> u16 {
    9090
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            metrics_port: default_metrics_port(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<std::path::Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the engine misbehave silently
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.engine.fast_tick_ms == 0 || self.engine.slow_tick_ms == 0 {
            anyhow::bail!("tick intervals must be non-zero");
        }
        if self.stops.min_stop_pct > self.stops.max_stop_pct {
            anyhow::bail!(
                "stops.min_stop_pct ({}) exceeds stops.max_stop_pct ({})",
                self.stops.min_stop_pct,
                self.stops.max_stop_pct
            );
        }
        if self.cooldown.loss_streak == 0 {
            anyhow::bail!("cooldown.loss_streak must be at least 1");
        }
        if self.reconcile.every_slow_ticks == 0 {
            anyhow::bail!("reconcile.every_slow_ticks must be at least 1");
        }
        if self.cache.max_quote_age_ms == 0 || self.cache.max_bar_age_ms == 0 {
            anyhow::bail!("cache source age limits must be non-zero");
        }
        Ok(())
    }
}

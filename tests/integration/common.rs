//! Shared fixtures

use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use scalp_engine::cache::MarketDataCache;
use scalp_engine::cache::MarketData;
use scalp_engine::clock::ManualClock;
use scalp_engine::config::Config;
use scalp_engine::engine::Engine;
use scalp_engine::execution::{ExecutionClient, ExecutionSettings};
use scalp_engine::gateway::{Bar, PaperGateway};
use scalp_engine::signal::{Side, Signal, Strategy};
use std::collections::VecDeque;
use std::sync::Arc;

pub const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "NVDA"];

/// Defaults with the three test symbols and no diagnostics file
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.engine.symbols = SYMBOLS.iter().map(|s| s.to_string()).collect();
    config.reconcile.every_slow_ticks = 1;
    config
}

/// Flat bars around `price` with a one-cent range, the last one closing at the harness start
pub fn flat_bars(price: Decimal, count: usize) -> Vec<Bar> {
    let start = Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap() - Duration::minutes(count as i64);
    (0..count)
        .map(|i| Bar {
            timestamp: start + Duration::minutes(i as i64),
            open: price,
            high: price + dec!(0.005),
            low: price - dec!(0.005),
            close: price,
            volume: dec!(1000),
        })
        .collect()
}

pub struct Harness {
    pub clock: Arc<ManualClock>,
    pub gateway: Arc<PaperGateway>,
    pub engine: Engine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config(), Vec::new())
    }

    pub fn with_config(config: Config, strategies: Vec<Arc<dyn Strategy>>) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 15, 0, 0).unwrap(),
        ));
        let gateway = Arc::new(PaperGateway::default());
        let mut engine = Engine::new(&config, gateway.clone(), clock.clone());
        for strategy in strategies {
            engine = engine.with_strategy(strategy);
        }
        Self {
            clock,
            gateway,
            engine,
        }
    }

    /// Move the market for `symbol` to a one-price quote and drop cached reads
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        self.gateway.set_quote(symbol, price, price).await;
        self.gateway.set_bars(symbol, flat_bars(price, 20)).await;
        self.engine.data().invalidate_symbol(symbol, "test price change");
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(Duration::seconds(secs));
    }

    pub fn signal(&self, symbol: &str, side: Side, price: Decimal) -> Signal {
        Signal::new(symbol, side, "test", dec!(0.8), price).at(self.now())
    }

    pub fn now(&self) -> chrono::DateTime<Utc> {
        use scalp_engine::clock::Clock;
        self.clock.now()
    }

    /// Open a long at `price` through the full admission path
    pub async fn open_long(&self, symbol: &str, price: Decimal) {
        self.set_price(symbol, price).await;
        let signal = self.signal(symbol, Side::Long, price);
        let opened = self.engine.handle_signal(signal, &[]).await.unwrap();
        assert!(opened.is_some(), "expected {symbol} to open");
    }
}

/// Execution client over a fresh paper gateway
pub fn execution_client() -> (Arc<PaperGateway>, ExecutionClient) {
    let clock = Arc::new(ManualClock::default());
    let gateway = Arc::new(PaperGateway::default());
    let cache = Arc::new(MarketDataCache::new(
        test_config().cache,
        clock.clone(),
    ));
    let data = MarketData::new(gateway.clone(), cache);
    let client = ExecutionClient::new(data, ExecutionSettings::default(), clock);
    (gateway, client)
}

/// Emits queued signals, one per call
pub struct ScriptedStrategy {
    id: String,
    queue: Mutex<VecDeque<Signal>>,
}

impl ScriptedStrategy {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, signal: Signal) {
        self.queue.lock().push_back(signal);
    }
}

impl Strategy for ScriptedStrategy {
    fn id(&self) -> &str {
        &self.id
    }

    fn generate_signal(&self, symbol: &str, _bars: &[Bar]) -> anyhow::Result<Option<Signal>> {
        let mut queue = self.queue.lock();
        if queue.front().map(|s| s.symbol == symbol).unwrap_or(false) {
            return Ok(queue.pop_front());
        }
        Ok(None)
    }
}

/// Always panics
pub struct PanickingStrategy;

impl Strategy for PanickingStrategy {
    fn id(&self) -> &str {
        "panics"
    }

    fn generate_signal(&self, _symbol: &str, _bars: &[Bar]) -> anyhow::Result<Option<Signal>> {
        panic!("indicator blew up")
    }
}

/// Always errors
pub struct FailingStrategy;

impl Strategy for FailingStrategy {
    fn id(&self) -> &str {
        "fails"
    }

    fn generate_signal(&self, _symbol: &str, _bars: &[Bar]) -> anyhow::Result<Option<Signal>> {
        anyhow::bail!("not enough history")
    }
}

//! Read-through market data access

use super::{CacheContext, CacheKey, CachedData, MarketDataCache, Namespace, Priority};
use crate::gateway::{Account, Bar, BrokerGateway, BrokerPosition, GatewayError, Quote};
use crate::telemetry::{self, CounterMetric};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

/// Gateway reads routed through the [`MarketDataCache`]
///
/// Data fetched for a critical context is stored with critical priority so a
/// follow-up critical read within the same second can reuse it. Quotes and
/// bars whose source timestamp is older than the configured limit are
/// reported as unavailable, whether they came from the cache or the gateway.
#[derive(Clone)]
pub struct MarketData {
    gateway: Arc<dyn BrokerGateway>,
    cache: Arc<MarketDataCache>,
    source: &'static str,
}

impl MarketData {
    pub fn new(gateway: Arc<dyn BrokerGateway>, cache: Arc<MarketDataCache>) -> Self {
        Self {
            gateway,
            cache,
            source: "gateway",
        }
    }

    pub fn cache(&self) -> &Arc<MarketDataCache> {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<dyn BrokerGateway> {
        &self.gateway
    }

    fn store(&self, key: CacheKey, data: CachedData, context: CacheContext) {
        let priority = if context.is_critical() {
            Priority::Critical
        } else {
            Priority::Normal
        };
        self.cache.set(key, data, None, priority, self.source);
    }

    /// Reject data stamped more than `max_age` before now; future stamps count as fresh
    fn ensure_fresh(
        &self,
        symbol: &str,
        what: &str,
        stamped: DateTime<Utc>,
        max_age: Duration,
    ) -> Result<(), GatewayError> {
        let age = (self.cache.now() - stamped).to_std().unwrap_or(Duration::ZERO);
        if age <= max_age {
            return Ok(());
        }
        tracing::warn!(symbol, what, age_secs = age.as_secs(), "Rejecting stale market data");
        telemetry::increment_with(CounterMetric::StaleSourceData, "kind", what);
        Err(GatewayError::DataUnavailable(format!(
            "{what} for {symbol} is {}s old",
            age.as_secs()
        )))
    }

    pub async fn quote(&self, symbol: &str, context: CacheContext) -> Result<Quote, GatewayError> {
        let key = CacheKey::quote(symbol);
        if let Some(CachedData::Quote(quote)) = self.cache.get(&key, context) {
            self.ensure_fresh(symbol, "quote", quote.timestamp, self.cache.max_quote_age())?;
            return Ok(quote);
        }
        let quote = self.gateway.latest_quote(symbol).await?;
        self.ensure_fresh(symbol, "quote", quote.timestamp, self.cache.max_quote_age())?;
        self.store(key, CachedData::Quote(quote.clone()), context);
        Ok(quote)
    }

    /// Live mid price
    pub async fn mid(&self, symbol: &str, context: CacheContext) -> Result<Decimal, GatewayError> {
        let quote = self.quote(symbol, context).await?;
        quote
            .mid()
            .ok_or_else(|| GatewayError::DataUnavailable(format!("no mid for {symbol}")))
    }

    pub async fn bars(
        &self,
        symbol: &str,
        limit: usize,
        context: CacheContext,
    ) -> Result<Vec<Bar>, GatewayError> {
        let key = CacheKey::bars(symbol);
        if let Some(CachedData::Bars(bars)) = self.cache.get(&key, context) {
            if bars.len() >= limit {
                self.ensure_fresh_bars(symbol, &bars)?;
                return Ok(bars[bars.len() - limit..].to_vec());
            }
        }
        let bars = self.gateway.bars(symbol, limit).await?;
        self.ensure_fresh_bars(symbol, &bars)?;
        self.store(key, CachedData::Bars(bars.clone()), context);
        Ok(bars)
    }

    fn ensure_fresh_bars(&self, symbol: &str, bars: &[Bar]) -> Result<(), GatewayError> {
        match bars.last() {
            Some(last) => self.ensure_fresh(symbol, "bars", last.timestamp, self.cache.max_bar_age()),
            None => Ok(()),
        }
    }

    pub async fn account(&self, context: CacheContext) -> Result<Account, GatewayError> {
        let key = CacheKey::global(Namespace::Account);
        if let Some(CachedData::Account(account)) = self.cache.get(&key, context) {
            return Ok(account);
        }
        let account = self.gateway.account().await?;
        self.store(key, CachedData::Account(account.clone()), context);
        Ok(account)
    }

    /// Account summary for display, cached on the longer summary TTL
    pub async fn account_summary(&self) -> Result<Account, GatewayError> {
        let key = CacheKey::global(Namespace::AccountSummary);
        if let Some(CachedData::Account(account)) = self.cache.get(&key, CacheContext::Monitoring)
        {
            return Ok(account);
        }
        let account = self.gateway.account().await?;
        self.store(key, CachedData::Account(account.clone()), CacheContext::Monitoring);
        Ok(account)
    }

    pub async fn positions(
        &self,
        context: CacheContext,
    ) -> Result<Vec<BrokerPosition>, GatewayError> {
        let key = CacheKey::global(Namespace::Positions);
        if let Some(CachedData::Positions(positions)) = self.cache.get(&key, context) {
            return Ok(positions);
        }
        let positions = self.gateway.positions().await?;
        self.store(key, CachedData::Positions(positions.clone()), context);
        Ok(positions)
    }

    pub async fn position(
        &self,
        symbol: &str,
        context: CacheContext,
    ) -> Result<Option<BrokerPosition>, GatewayError> {
        let key = CacheKey::position(symbol);
        if let Some(CachedData::Position(position)) = self.cache.get(&key, context) {
            return Ok(position);
        }
        let position = self.gateway.position(symbol).await?;
        self.store(key, CachedData::Position(position.clone()), context);
        Ok(position)
    }

    /// Shares of an open position not reserved by pending orders
    pub async fn available_shares(
        &self,
        symbol: &str,
        context: CacheContext,
    ) -> Result<Decimal, GatewayError> {
        let key = CacheKey::order_availability(symbol);
        if let Some(CachedData::Shares(shares)) = self.cache.get(&key, context) {
            return Ok(shares);
        }
        let shares = self
            .gateway
            .position(symbol)
            .await?
            .map(|p| p.qty_available)
            .unwrap_or(Decimal::ZERO);
        self.store(key, CachedData::Shares(shares), context);
        Ok(shares)
    }

    /// Forget everything about `symbol` after a position-changing event
    pub fn invalidate_symbol(&self, symbol: &str, reason: &str) {
        self.cache.invalidate_symbol(symbol, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::CacheConfig;
    use crate::gateway::PaperGateway;
    use rust_decimal_macros::dec;

    fn setup() -> (Arc<ManualClock>, Arc<PaperGateway>, MarketData) {
        let clock = Arc::new(ManualClock::default());
        let gateway = Arc::new(PaperGateway::default());
        let cache = Arc::new(MarketDataCache::new(CacheConfig::default(), clock.clone()));
        let data = MarketData::new(gateway.clone(), cache);
        (clock, gateway, data)
    }

    #[tokio::test]
    async fn test_monitoring_reads_are_cached() {
        let (_, gateway, data) = setup();
        gateway.set_quote("AAPL", dec!(100), dec!(100.02)).await;
        let first = data.quote("AAPL", CacheContext::Monitoring).await.unwrap();

        gateway.set_quote("AAPL", dec!(101), dec!(101.02)).await;
        let second = data.quote("AAPL", CacheContext::Monitoring).await.unwrap();
        assert_eq!(first.bid, second.bid);
    }

    #[tokio::test]
    async fn test_critical_read_ignores_normal_entry() {
        let (_, gateway, data) = setup();
        gateway.set_quote("AAPL", dec!(100), dec!(100.02)).await;
        data.quote("AAPL", CacheContext::SignalGeneration).await.unwrap();

        gateway.set_quote("AAPL", dec!(101), dec!(101.02)).await;
        let live = data.quote("AAPL", CacheContext::StopLossCheck).await.unwrap();
        assert_eq!(live.bid, dec!(101));
    }

    #[tokio::test]
    async fn test_stale_entry_refetched() {
        let (clock, gateway, data) = setup();
        gateway.set_quote("AAPL", dec!(100), dec!(100)).await;
        data.quote("AAPL", CacheContext::Monitoring).await.unwrap();

        gateway.set_quote("AAPL", dec!(102), dec!(102)).await;
        clock.advance(chrono::Duration::milliseconds(1500));
        let mid = data.mid("AAPL", CacheContext::Monitoring).await.unwrap();
        assert_eq!(mid, dec!(102));
    }

    #[tokio::test]
    async fn test_outage_is_not_masked_by_expired_cache() {
        let (clock, gateway, data) = setup();
        gateway.set_quote("AAPL", dec!(100), dec!(100)).await;
        data.quote("AAPL", CacheContext::Monitoring).await.unwrap();

        gateway.set_quotes_unavailable(true).await;
        clock.advance(chrono::Duration::seconds(2));
        let err = data.quote("AAPL", CacheContext::Monitoring).await.unwrap_err();
        assert!(matches!(err, GatewayError::FeedUnavailable(_)));
    }

    #[tokio::test]
    async fn test_old_quote_rejected_for_stop_checks() {
        let (clock, gateway, data) = setup();
        let stamped = clock.now() - chrono::Duration::days(3);
        gateway.set_quote_at("AAPL", dec!(100), dec!(100), stamped).await;

        let err = data.mid("AAPL", CacheContext::StopLossCheck).await.unwrap_err();
        assert!(matches!(err, GatewayError::DataUnavailable(_)));
        let err = data.quote("AAPL", CacheContext::OrderExecution).await.unwrap_err();
        assert!(matches!(err, GatewayError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_cached_quote_ages_out_by_source_time() {
        let (clock, gateway, data) = setup();
        let stamped = clock.now() - chrono::Duration::seconds(59);
        gateway.set_quote_at("AAPL", dec!(100), dec!(100), stamped).await;
        data.quote("AAPL", CacheContext::Monitoring).await.unwrap();

        // Still inside the cache TTL, but the quote itself is now over a minute old
        clock.advance(chrono::Duration::seconds(1) + chrono::Duration::milliseconds(1));
        let err = data.quote("AAPL", CacheContext::Monitoring).await.unwrap_err();
        assert!(matches!(err, GatewayError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn test_old_bars_rejected() {
        let (clock, gateway, data) = setup();
        let bar = Bar {
            timestamp: clock.now() - chrono::Duration::hours(2),
            open: dec!(100),
            high: dec!(100),
            low: dec!(100),
            close: dec!(100),
            volume: dec!(1000),
        };
        gateway.set_bars("AAPL", vec![bar.clone()]).await;
        let err = data.bars("AAPL", 1, CacheContext::SignalGeneration).await.unwrap_err();
        assert!(matches!(err, GatewayError::DataUnavailable(_)));

        let fresh = Bar {
            timestamp: clock.now() - chrono::Duration::minutes(1),
            ..bar
        };
        gateway.set_bars("AAPL", vec![fresh]).await;
        assert_eq!(data.bars("AAPL", 1, CacheContext::SignalGeneration).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_available_shares_without_position() {
        let (_, _, data) = setup();
        let shares = data
            .available_shares("AAPL", CacheContext::PositionClose)
            .await
            .unwrap();
        assert_eq!(shares, Decimal::ZERO);
    }
}

//! REST brokerage gateway
//!
//! Talks to an Alpaca-style trading API (`/v2/account`, `/v2/positions`,
//! `/v2/orders`) and its market-data API (`/v2/stocks/{symbol}/...`).

use super::error::classify_rejection;
use super::{
    Account, Bar, BrokerGateway, BrokerOrder, BrokerPosition, GatewayError, OrderRequest,
    OrderSide, OrderStatus, Quote,
};
use crate::config::GatewayConfig;
use crate::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Paper trading endpoint
pub const PAPER_TRADING_URL: &str = "https://paper-api.alpaca.markets";
/// Market data endpoint
pub const MARKET_DATA_URL: &str = "https://data.alpaca.markets";

/// Configuration for the REST gateway
#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// Trading API base URL
    pub base_url: String,
    /// Market data API base URL
    pub data_url: String,
    /// API key id
    pub key_id: String,
    /// API secret
    pub secret_key: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Bar timeframe, e.g. "1Min"
    pub bar_timeframe: String,
}

impl Default for RestGatewayConfig {
    fn default() -> Self {
        Self {
            base_url: PAPER_TRADING_URL.to_string(),
            data_url: MARKET_DATA_URL.to_string(),
            key_id: String::new(),
            secret_key: String::new(),
            timeout: Duration::from_secs(5),
            bar_timeframe: "1Min".to_string(),
        }
    }
}

impl RestGatewayConfig {
    /// Build from file config, reading credentials from the named env vars
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        let key_id = std::env::var(&config.key_id_env)
            .map_err(|_| anyhow::anyhow!("missing env var {}", config.key_id_env))?;
        let secret_key = std::env::var(&config.secret_key_env)
            .map_err(|_| anyhow::anyhow!("missing env var {}", config.secret_key_env))?;

        Ok(Self {
            base_url: config.base_url.clone(),
            data_url: config.data_url.clone(),
            key_id,
            secret_key,
            timeout: Duration::from_millis(config.timeout_ms),
            bar_timeframe: config.bar_timeframe.clone(),
        })
    }
}

/// Client for the brokerage REST API
pub struct RestGateway {
    config: RestGatewayConfig,
    client: Client,
}

impl RestGateway {
    /// Create a new gateway client
    pub fn new(config: RestGatewayConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { config, client })
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("APCA-API-KEY-ID", &self.config.key_id)
            .header("APCA-API-SECRET-KEY", &self.config.secret_key)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: String,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        tracing::trace!(url = %url, "GET");
        let response = self
            .authed(self.client.get(&url))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(url));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))
    }
}

#[async_trait]
impl BrokerGateway for RestGateway {
    async fn account(&self) -> Result<Account, GatewayError> {
        let url = format!("{}/v2/account", self.config.base_url);
        let account: ApiAccount = self.get_json(url, &[]).await?;
        Ok(Account {
            equity: account.equity,
            buying_power: account.buying_power,
            cash: account.cash,
        })
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let url = format!("{}/v2/positions", self.config.base_url);
        let positions: Vec<ApiPosition> = self.get_json(url, &[]).await?;
        Ok(positions.into_iter().map(ApiPosition::into_position).collect())
    }

    async fn position(&self, symbol: &str) -> Result<Option<BrokerPosition>, GatewayError> {
        let url = format!("{}/v2/positions/{}", self.config.base_url, symbol);
        match self.get_json::<ApiPosition>(url, &[]).await {
            Ok(position) => Ok(Some(position.into_position())),
            Err(GatewayError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let url = format!("{}/v2/stocks/{}/quotes/latest", self.config.data_url, symbol);
        let response: ApiQuoteResponse = match self.get_json(url, &[]).await {
            Ok(response) => response,
            Err(GatewayError::NotFound(_)) => {
                return Err(GatewayError::DataUnavailable(format!("no quote for {symbol}")))
            }
            Err(e) => return Err(e),
        };

        let quote = Quote {
            symbol: symbol.to_string(),
            bid: response.quote.bp,
            ask: response.quote.ap,
            timestamp: response.quote.t,
        };
        if quote.mid().is_none() {
            return Err(GatewayError::DataUnavailable(format!(
                "empty quote for {symbol}"
            )));
        }
        Ok(quote)
    }

    async fn bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError> {
        let url = format!("{}/v2/stocks/{}/bars", self.config.data_url, symbol);
        let response: ApiBarsResponse = self
            .get_json(
                url,
                &[
                    ("timeframe", self.config.bar_timeframe.clone()),
                    ("limit", limit.to_string()),
                ],
            )
            .await?;

        let bars: Vec<Bar> = response
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(|b| Bar {
                timestamp: b.t,
                open: b.o,
                high: b.h,
                low: b.l,
                close: b.c,
                volume: b.v,
            })
            .collect();

        if bars.is_empty() {
            return Err(GatewayError::DataUnavailable(format!("no bars for {symbol}")));
        }
        Ok(bars)
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<BrokerOrder, GatewayError> {
        let url = format!("{}/v2/orders", self.config.base_url);
        let body = ApiOrderRequest {
            symbol: &order.symbol,
            qty: order.qty.to_string(),
            side: order.side.as_str(),
            order_type: "market",
            time_in_force: "day",
            client_order_id: &order.client_order_id,
        };

        tracing::debug!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            client_order_id = %order.client_order_id,
            "Submitting order"
        );

        let response = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status == StatusCode::FORBIDDEN || status == StatusCode::UNPROCESSABLE_ENTITY {
                return Err(GatewayError::Rejected(classify_rejection(&body, order.qty)));
            }
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let api_order: ApiOrder = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        Ok(api_order.into_order())
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let url = format!("{}/v2/orders/{}", self.config.base_url, order_id);
        let response = self.authed(self.client.delete(&url)).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(order_id.to_string()));
        }
        // 422 means the order is no longer cancelable (already filled or cancelled)
        if !status.is_success() && status != StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<BrokerOrder>, GatewayError> {
        let url = format!("{}/v2/orders", self.config.base_url);
        let orders: Vec<ApiOrder> = self
            .get_json(
                url,
                &[
                    ("status", "open".to_string()),
                    ("symbols", symbol.to_string()),
                ],
            )
            .await?;
        Ok(orders
            .into_iter()
            .map(ApiOrder::into_order)
            .filter(|o| o.symbol == symbol)
            .collect())
    }

    async fn order(&self, order_id: &str) -> Result<BrokerOrder, GatewayError> {
        let url = format!("{}/v2/orders/{}", self.config.base_url, order_id);
        let order: ApiOrder = self.get_json(url, &[]).await?;
        Ok(order.into_order())
    }
}

#[derive(Debug, Deserialize)]
struct ApiAccount {
    equity: Decimal,
    buying_power: Decimal,
    cash: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiPosition {
    symbol: String,
    qty: Decimal,
    side: String,
    avg_entry_price: Decimal,
    #[serde(default)]
    current_price: Option<Decimal>,
    #[serde(default)]
    qty_available: Option<Decimal>,
}

impl ApiPosition {
    fn into_position(self) -> BrokerPosition {
        let side = if self.side.eq_ignore_ascii_case("short") || self.qty < Decimal::ZERO {
            Side::Short
        } else {
            Side::Long
        };
        let qty = self.qty.abs();
        BrokerPosition {
            symbol: self.symbol,
            side,
            qty,
            qty_available: self.qty_available.map(|q| q.abs()).unwrap_or(qty),
            avg_entry_price: self.avg_entry_price,
            current_price: self.current_price,
        }
    }
}

#[derive(Debug, Serialize)]
struct ApiOrderRequest<'a> {
    symbol: &'a str,
    qty: String,
    side: &'a str,
    #[serde(rename = "type")]
    order_type: &'a str,
    time_in_force: &'a str,
    client_order_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct ApiOrder {
    id: String,
    #[serde(default)]
    client_order_id: String,
    symbol: String,
    side: String,
    #[serde(default)]
    qty: Option<Decimal>,
    #[serde(default)]
    filled_qty: Option<Decimal>,
    #[serde(default)]
    filled_avg_price: Option<Decimal>,
    status: String,
    #[serde(default)]
    submitted_at: Option<DateTime<Utc>>,
}

impl ApiOrder {
    fn into_order(self) -> BrokerOrder {
        let side = if self.side.eq_ignore_ascii_case("sell") {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        BrokerOrder {
            id: self.id,
            client_order_id: self.client_order_id,
            symbol: self.symbol,
            side,
            qty: self.qty.unwrap_or_default(),
            filled_qty: self.filled_qty.unwrap_or_default(),
            filled_avg_price: self.filled_avg_price,
            status: OrderStatus::parse(&self.status),
            submitted_at: self.submitted_at.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiQuoteResponse {
    quote: ApiQuote,
}

#[derive(Debug, Deserialize)]
struct ApiQuote {
    t: DateTime<Utc>,
    #[serde(default)]
    ap: Decimal,
    #[serde(default)]
    bp: Decimal,
}

#[derive(Debug, Deserialize)]
struct ApiBarsResponse {
    #[serde(default)]
    bars: Option<Vec<ApiBar>>,
}

#[derive(Debug, Deserialize)]
struct ApiBar {
    t: DateTime<Utc>,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: Decimal,
}

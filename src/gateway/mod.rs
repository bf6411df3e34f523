//! Brokerage gateway module
//!
//! The boundary to the broker and its market-data feed. Raw broker errors are
//! classified here and nowhere else.

mod error;
mod paper;
mod rest;
mod types;

pub use error::{classify_rejection, ExecutionError, ExecutionErrorKind, GatewayError};
pub use paper::{FillMode, PaperGateway};
pub use rest::{RestGateway, RestGatewayConfig, MARKET_DATA_URL, PAPER_TRADING_URL};
pub use types::{
    Account, Bar, BrokerOrder, BrokerPosition, OrderRequest, OrderSide, OrderStatus, Quote,
};

use async_trait::async_trait;

/// Trait for brokerage gateway implementations
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Account equity and buying power
    async fn account(&self) -> Result<Account, GatewayError>;
    /// All open positions
    async fn positions(&self) -> Result<Vec<BrokerPosition>, GatewayError>;
    /// Latest top-of-book quote
    async fn latest_quote(&self, symbol: &str) -> Result<Quote, GatewayError>;
    /// Most recent `limit` bars, oldest first
    async fn bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError>;
    /// Submit a market order
    async fn submit_order(&self, order: &OrderRequest) -> Result<BrokerOrder, GatewayError>;
    /// Cancel an order by broker id
    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError>;
    /// Open orders for a symbol
    async fn open_orders(&self, symbol: &str) -> Result<Vec<BrokerOrder>, GatewayError>;
    /// Current state of an order
    async fn order(&self, order_id: &str) -> Result<BrokerOrder, GatewayError>;

    /// Position for a single symbol, if any
    async fn position(&self, symbol: &str) -> Result<Option<BrokerPosition>, GatewayError> {
        let positions = self.positions().await?;
        Ok(positions.into_iter().find(|p| p.symbol == symbol))
    }
}

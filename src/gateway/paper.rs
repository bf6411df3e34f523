//! In-memory paper brokerage
//!
//! Fills market orders against the latest quote (buys at the ask, sells at
//! the bid) and keeps positions, orders and account state locally. Quotes and
//! bars come from seeded values or, when configured, from another gateway.
//! Rejections can be scripted for tests, and the broker-side checks for wash
//! trades and insufficient quantity are simulated.

use super::error::classify_rejection;
use super::{
    Account, Bar, BrokerGateway, BrokerOrder, BrokerPosition, ExecutionError, GatewayError,
    OrderRequest, OrderSide, OrderStatus, Quote,
};
use crate::signal::Side;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// How submitted orders are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FillMode {
    /// Fill completely at submission
    #[default]
    Immediate,
    /// Leave orders open until [`PaperGateway::fill_order`] is called
    Manual,
}

#[derive(Default)]
struct PaperState {
    account: Option<Account>,
    quotes: HashMap<String, Quote>,
    bars: HashMap<String, Vec<Bar>>,
    positions: HashMap<String, BrokerPosition>,
    orders: HashMap<String, BrokerOrder>,
    order_seq: Vec<String>,
    rejections: VecDeque<ExecutionError>,
    submitted: Vec<OrderRequest>,
    cancelled: Vec<String>,
    fill_mode: FillMode,
    quotes_unavailable: bool,
}

impl PaperState {
    /// Shares reserved by open orders on `side` for `symbol`
    fn held(&self, symbol: &str, side: OrderSide) -> Decimal {
        self.orders
            .values()
            .filter(|o| o.symbol == symbol && o.side == side && o.status.is_open())
            .map(|o| o.qty - o.filled_qty)
            .sum()
    }

    fn with_availability(&self, position: &BrokerPosition) -> BrokerPosition {
        let held = self.held(&position.symbol, position.side.exit_order_side());
        let mut position = position.clone();
        position.qty_available = (position.qty - held).max(Decimal::ZERO);
        position
    }

    /// Apply a fill of `qty` at `price` to positions and equity
    fn apply_fill(&mut self, symbol: &str, side: OrderSide, qty: Decimal, price: Decimal) {
        let delta = side.signed(qty);
        let existing = self.positions.get(symbol).cloned();
        let before = existing.as_ref().map(|p| p.signed_qty()).unwrap_or_default();
        let after = before + delta;

        if let Some(position) = &existing {
            let reducing = (before > Decimal::ZERO) != (delta > Decimal::ZERO);
            if reducing {
                let closed = qty.min(position.qty);
                let realized = closed * (price - position.avg_entry_price) * position.side.sign();
                if let Some(account) = self.account.as_mut() {
                    account.equity += realized;
                    account.cash += realized;
                }
            }
        }

        if after.is_zero() {
            self.positions.remove(symbol);
            return;
        }

        let side = if after > Decimal::ZERO {
            Side::Long
        } else {
            Side::Short
        };
        let avg_entry_price = match &existing {
            Some(p) if p.side == side && after.abs() > p.qty => {
                (p.avg_entry_price * p.qty + price * qty) / after.abs()
            }
            Some(p) if p.side == side => p.avg_entry_price,
            _ => price,
        };

        self.positions.insert(
            symbol.to_string(),
            BrokerPosition {
                symbol: symbol.to_string(),
                side,
                qty: after.abs(),
                qty_available: after.abs(),
                avg_entry_price,
                current_price: Some(price),
            },
        );
    }

    /// Broker-side pre-trade checks, returning a raw rejection body
    fn precheck(&self, order: &OrderRequest) -> Option<String> {
        let opposite_open = self.orders.values().any(|o| {
            o.symbol == order.symbol && o.side == order.side.opposite() && o.status.is_open()
        });
        if opposite_open {
            return Some(
                serde_json::json!({
                    "code": 40310000,
                    "message": "potential wash trade detected. use complex orders",
                    "reject_reason": "opposite side market/stop order exists",
                })
                .to_string(),
            );
        }

        let position = self.positions.get(&order.symbol)?;
        if position.side.exit_order_side() != order.side {
            return None;
        }
        let held = self.held(&order.symbol, order.side);
        let available = (position.qty - held).max(Decimal::ZERO);
        if order.qty > available {
            return Some(
                serde_json::json!({
                    "code": 40310000,
                    "message": format!(
                        "insufficient qty available for order (requested: {}, available: {})",
                        order.qty, available
                    ),
                    "available": available.to_string(),
                    "existing_qty": position.qty.to_string(),
                    "held_for_orders": held.to_string(),
                    "symbol": order.symbol,
                })
                .to_string(),
            );
        }
        None
    }
}

/// Paper brokerage with simulated fills
pub struct PaperGateway {
    market: Option<Arc<dyn BrokerGateway>>,
    state: Arc<RwLock<PaperState>>,
}

impl Default for PaperGateway {
    fn default() -> Self {
        Self::new(Account {
            equity: Decimal::from(100_000),
            buying_power: Decimal::from(200_000),
            cash: Decimal::from(100_000),
        })
    }
}

impl PaperGateway {
    /// Create a paper brokerage with the given starting account
    pub fn new(account: Account) -> Self {
        let state = PaperState {
            account: Some(account),
            ..Default::default()
        };
        Self {
            market: None,
            state: Arc::new(RwLock::new(state)),
        }
    }

    /// Source quotes and bars from another gateway when not seeded locally
    pub fn with_market_data(mut self, market: Arc<dyn BrokerGateway>) -> Self {
        self.market = Some(market);
        self
    }

    pub async fn set_account(&self, account: Account) {
        self.state.write().await.account = Some(account);
    }

    /// Seed a two-sided quote
    pub async fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.set_quote_at(symbol, bid, ask, Utc::now()).await;
    }

    /// Set a quote carrying an explicit source timestamp
    pub async fn set_quote_at(
        &self,
        symbol: &str,
        bid: Decimal,
        ask: Decimal,
        timestamp: DateTime<Utc>,
    ) {
        let quote = Quote {
            symbol: symbol.to_string(),
            bid,
            ask,
            timestamp,
        };
        self.state
            .write()
            .await
            .quotes
            .insert(symbol.to_string(), quote);
    }

    pub async fn set_bars(&self, symbol: &str, bars: Vec<Bar>) {
        self.state
            .write()
            .await
            .bars
            .insert(symbol.to_string(), bars);
    }

    /// Simulate a market-data outage
    pub async fn set_quotes_unavailable(&self, unavailable: bool) {
        self.state.write().await.quotes_unavailable = unavailable;
    }

    pub async fn set_fill_mode(&self, mode: FillMode) {
        self.state.write().await.fill_mode = mode;
    }

    /// Reject the next submission with `error`; queued rejections apply in order
    pub async fn push_rejection(&self, error: ExecutionError) {
        self.state.write().await.rejections.push_back(error);
    }

    /// Place a broker position directly, bypassing order flow
    pub async fn seed_position(&self, position: BrokerPosition) {
        self.state
            .write()
            .await
            .positions
            .insert(position.symbol.clone(), position);
    }

    /// Drop a broker position, e.g. one closed outside the engine
    pub async fn remove_position(&self, symbol: &str) {
        self.state.write().await.positions.remove(symbol);
    }

    /// Place a resting open order without filling it
    pub async fn seed_open_order(&self, symbol: &str, side: OrderSide, qty: Decimal) -> BrokerOrder {
        let order = BrokerOrder {
            id: Uuid::new_v4().to_string(),
            client_order_id: Uuid::new_v4().to_string(),
            symbol: symbol.to_string(),
            side,
            qty,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            status: OrderStatus::New,
            submitted_at: Utc::now(),
        };
        let mut state = self.state.write().await;
        state.order_seq.push(order.id.clone());
        state.orders.insert(order.id.clone(), order.clone());
        order
    }

    /// Fill an open order, fully when `qty` is `None`
    pub async fn fill_order(&self, order_id: &str, qty: Option<Decimal>) -> Result<BrokerOrder, GatewayError> {
        let symbol = {
            let state = self.state.read().await;
            let order = state
                .orders
                .get(order_id)
                .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))?;
            order.symbol.clone()
        };
        let quote = self.quote_for(&symbol).await?;

        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))?;
        let remaining = order.qty - order.filled_qty;
        let fill_qty = qty.unwrap_or(remaining).min(remaining);
        let price = fill_price(&quote, order.side)?;

        let prior = order.filled_avg_price.unwrap_or_default() * order.filled_qty;
        order.filled_qty += fill_qty;
        if !order.filled_qty.is_zero() {
            order.filled_avg_price = Some((prior + price * fill_qty) / order.filled_qty);
        }
        order.status = if order.filled_qty >= order.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        let (side, filled) = (order.side, order.clone());
        state.apply_fill(&symbol, side, fill_qty, price);
        Ok(filled)
    }

    /// Force an order into a terminal or intermediate status
    pub async fn set_order_status(&self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.state.write().await.orders.get_mut(order_id) {
            order.status = status;
        }
    }

    /// Every order request received, in submission order
    pub async fn submitted(&self) -> Vec<OrderRequest> {
        self.state.read().await.submitted.clone()
    }

    /// Ids of every order cancelled
    pub async fn cancelled(&self) -> Vec<String> {
        self.state.read().await.cancelled.clone()
    }

    async fn quote_for(&self, symbol: &str) -> Result<Quote, GatewayError> {
        {
            let state = self.state.read().await;
            if state.quotes_unavailable {
                return Err(GatewayError::FeedUnavailable(format!(
                    "quote feed down at {symbol}"
                )));
            }
            if let Some(quote) = state.quotes.get(symbol) {
                return Ok(quote.clone());
            }
        }
        match &self.market {
            Some(market) => market.latest_quote(symbol).await,
            None => Err(GatewayError::DataUnavailable(format!(
                "no quote for {symbol}"
            ))),
        }
    }
}

fn fill_price(quote: &Quote, side: OrderSide) -> Result<Decimal, GatewayError> {
    let touch = match side {
        OrderSide::Buy => quote.ask,
        OrderSide::Sell => quote.bid,
    };
    if touch > Decimal::ZERO {
        return Ok(touch);
    }
    quote
        .mid()
        .ok_or_else(|| GatewayError::DataUnavailable(format!("no price for {}", quote.symbol)))
}

#[async_trait]
impl BrokerGateway for PaperGateway {
    async fn account(&self) -> Result<Account, GatewayError> {
        let state = self.state.read().await;
        state
            .account
            .clone()
            .ok_or_else(|| GatewayError::FeedUnavailable("no account".to_string()))
    }

    async fn positions(&self) -> Result<Vec<BrokerPosition>, GatewayError> {
        let state = self.state.read().await;
        let mut positions: Vec<BrokerPosition> = state
            .positions
            .values()
            .map(|p| state.with_availability(p))
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn position(&self, symbol: &str) -> Result<Option<BrokerPosition>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .positions
            .get(symbol)
            .map(|p| state.with_availability(p)))
    }

    async fn latest_quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        self.quote_for(symbol).await
    }

    async fn bars(&self, symbol: &str, limit: usize) -> Result<Vec<Bar>, GatewayError> {
        {
            let state = self.state.read().await;
            if let Some(bars) = state.bars.get(symbol) {
                let start = bars.len().saturating_sub(limit);
                return Ok(bars[start..].to_vec());
            }
        }
        match &self.market {
            Some(market) => market.bars(symbol, limit).await,
            None => Err(GatewayError::DataUnavailable(format!("no bars for {symbol}"))),
        }
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<BrokerOrder, GatewayError> {
        {
            let mut state = self.state.write().await;
            state.submitted.push(order.clone());

            if let Some(rejection) = state.rejections.pop_front() {
                tracing::info!(symbol = %order.symbol, kind = rejection.kind.tag(), "Paper order rejected (scripted)");
                return Err(GatewayError::Rejected(rejection));
            }
            if order.qty <= Decimal::ZERO || !order.qty.fract().is_zero() {
                let body = format!("{{\"code\":42210000,\"message\":\"qty must be > 0 and whole, got {}\"}}", order.qty);
                return Err(GatewayError::Rejected(classify_rejection(&body, order.qty)));
            }
            if let Some(body) = state.precheck(order) {
                tracing::info!(symbol = %order.symbol, side = %order.side, "Paper order rejected");
                return Err(GatewayError::Rejected(classify_rejection(&body, order.qty)));
            }
        }

        let quote = self.quote_for(&order.symbol).await?;
        let price = fill_price(&quote, order.side)?;

        let mut state = self.state.write().await;
        let mut placed = BrokerOrder {
            id: Uuid::new_v4().to_string(),
            client_order_id: order.client_order_id.clone(),
            symbol: order.symbol.clone(),
            side: order.side,
            qty: order.qty,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            status: OrderStatus::Accepted,
            submitted_at: Utc::now(),
        };

        if state.fill_mode == FillMode::Immediate {
            placed.filled_qty = order.qty;
            placed.filled_avg_price = Some(price);
            placed.status = OrderStatus::Filled;
            state.apply_fill(&order.symbol, order.side, order.qty, price);
        }

        state.order_seq.push(placed.id.clone());
        state.orders.insert(placed.id.clone(), placed.clone());

        tracing::info!(
            order_id = %placed.id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            status = ?placed.status,
            "Paper order accepted"
        );
        Ok(placed)
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), GatewayError> {
        let mut state = self.state.write().await;
        let order = state
            .orders
            .get_mut(order_id)
            .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))?;
        if order.status.is_open() {
            order.status = OrderStatus::Cancelled;
        }
        state.cancelled.push(order_id.to_string());
        tracing::info!(order_id, "Paper order cancelled");
        Ok(())
    }

    async fn open_orders(&self, symbol: &str) -> Result<Vec<BrokerOrder>, GatewayError> {
        let state = self.state.read().await;
        Ok(state
            .order_seq
            .iter()
            .filter_map(|id| state.orders.get(id))
            .filter(|o| o.symbol == symbol && o.status.is_open())
            .cloned()
            .collect())
    }

    async fn order(&self, order_id: &str) -> Result<BrokerOrder, GatewayError> {
        let state = self.state.read().await;
        state
            .orders
            .get(order_id)
            .cloned()
            .ok_or_else(|| GatewayError::NotFound(order_id.to_string()))
    }
}

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Account view (shared by the live broker and the simulated portfolio)
// ---------------------------------------------------------------------------

/// A single position as reported by an account source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockHolding {
    pub stock_code: String,
    pub stock_name: String,
    pub quantity: u64,
    pub avg_buy_price: f64,
    pub current_price: f64,
    pub eval_amount: f64,
    pub profit_loss: f64,
    /// Unrealized return as a fraction: -0.05 means down 5%.
    pub profit_rate: f64,
}

impl StockHolding {
    /// Build a holding marked at `current_price`, deriving the evaluation
    /// amount and P&L fields.
    pub fn marked(
        stock_code: impl Into<String>,
        stock_name: impl Into<String>,
        quantity: u64,
        avg_buy_price: f64,
        current_price: f64,
    ) -> Self {
        let eval_amount = quantity as f64 * current_price;
        let profit_loss = (current_price - avg_buy_price) * quantity as f64;
        let profit_rate = if avg_buy_price > 0.0 {
            current_price / avg_buy_price - 1.0
        } else {
            0.0
        };
        Self {
            stock_code: stock_code.into(),
            stock_name: stock_name.into(),
            quantity,
            avg_buy_price,
            current_price,
            eval_amount,
            profit_loss,
            profit_rate,
        }
    }

    pub fn total_cost(&self) -> f64 {
        self.quantity as f64 * self.avg_buy_price
    }
}

/// Account balance snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub cash: f64,
    pub total_eval_amount: f64,
    pub total_profit_loss: f64,
    /// Total return as a percentage of the account's starting value.
    pub total_profit_rate: f64,
    pub holdings: Vec<StockHolding>,
}

impl AccountBalance {
    pub fn stock_eval_amount(&self) -> f64 {
        self.holdings.iter().map(|h| h.eval_amount).sum()
    }

    pub fn holding(&self, stock_code: &str) -> Option<&StockHolding> {
        self.holdings.iter().find(|h| h.stock_code == stock_code)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderSide::Buy => "buy",
            OrderSide::Sell => "sell",
        }
    }
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of an order submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderResult {
    pub success: bool,
    pub order_id: Option<String>,
    pub stock_code: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: Option<f64>,
    pub message: Option<String>,
    pub executed_at: Option<DateTime<Local>>,
}

impl OrderResult {
    pub fn filled(
        order_id: impl Into<String>,
        stock_code: impl Into<String>,
        side: OrderSide,
        quantity: u64,
        price: Option<f64>,
    ) -> Self {
        Self {
            success: true,
            order_id: Some(order_id.into()),
            stock_code: stock_code.into(),
            side,
            quantity,
            price,
            message: None,
            executed_at: Some(Local::now()),
        }
    }

    /// An order the account refused to fill.
    pub fn rejected(
        stock_code: impl Into<String>,
        side: OrderSide,
        quantity: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            order_id: None,
            stock_code: stock_code.into(),
            side,
            quantity,
            price: None,
            message: Some(message.into()),
            executed_at: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Anything that can report an `AccountBalance`.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Current cash, holdings and valuation.
    async fn get_balance(&self) -> Result<AccountBalance>;

    /// Source name for logging
    fn source_name(&self) -> &str;
}

/// Order-capable account. Implemented by a live brokerage client and by the
/// simulated broker used for paper trading.
#[async_trait]
pub trait BrokerClient: BalanceSource {
    /// Get a specific position (None if not held)
    async fn get_holding(&self, stock_code: &str) -> Result<Option<StockHolding>>;

    /// Latest traded price
    async fn get_current_price(&self, stock_code: &str) -> Result<f64>;

    /// Submit a market buy
    async fn buy_market(&self, stock_code: &str, quantity: u64) -> Result<OrderResult>;

    /// Submit a market sell
    async fn sell_market(&self, stock_code: &str, quantity: u64) -> Result<OrderResult>;

    /// Whether the exchange is currently accepting orders
    async fn is_market_open(&self) -> Result<bool>;

    /// Whether this is a paper/simulated account
    fn is_paper(&self) -> bool;
}

use chrono::{NaiveDate, NaiveDateTime};
use news_trading::TradeAction;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Realized loss, as a fraction of the day's starting value, that halts trading (-0.03 = -3%)
    pub daily_loss_limit: f64,
    pub max_trades_per_day: u32,
    pub max_single_trade_ratio: f64,
    /// Unit price assumed for a BUY without a target price. A rough stand-in:
    /// stocks priced far from it are over- or under-estimated.
    pub fallback_unit_price: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: -0.03,
            max_trades_per_day: 10,
            max_single_trade_ratio: 0.1,
            fallback_unit_price: 100_000.0,
        }
    }
}

/// One executed trade in the daily ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: NaiveDateTime,
    pub stock_code: String,
    pub action: TradeAction,
    pub quantity: u64,
    pub price: f64,
    pub total_amount: f64,
    pub realized_pnl: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub trade_count: u32,
    pub buy_count: u32,
    pub sell_count: u32,
    pub total_bought: f64,
    pub total_sold: f64,
    pub realized_pnl: f64,
    pub trades: Vec<TradeRecord>,
}

impl DailyStats {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            date,
            trade_count: 0,
            buy_count: 0,
            sell_count: 0,
            total_bought: 0.0,
            total_sold: 0.0,
            realized_pnl: 0.0,
            trades: Vec::new(),
        }
    }
}

/// Serializable view of the day's counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyStatsSummary {
    pub date: String,
    pub trade_count: u32,
    pub buy_count: u32,
    pub sell_count: u32,
    pub total_bought: f64,
    pub total_sold: f64,
    pub realized_pnl: f64,
    pub remaining_trades: u32,
}

/// Outcome of a gatekeeping check. A rejection is an ordinary value, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskCheck {
    pub allowed: bool,
    pub reason: String,
}

impl RiskCheck {
    pub fn ok() -> Self {
        Self {
            allowed: true,
            reason: "OK".to_string(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

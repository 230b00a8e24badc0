use broker_trait::OrderSide;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeAction {
    Buy,
    Sell,
}

impl TradeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            TradeAction::Buy => "buy",
            TradeAction::Sell => "sell",
        }
    }

    pub fn side(&self) -> OrderSide {
        match self {
            TradeAction::Buy => OrderSide::Buy,
            TradeAction::Sell => OrderSide::Sell,
        }
    }
}

impl std::fmt::Display for TradeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_str().to_uppercase())
    }
}

/// A single trade the strategy wants executed. Built once per evaluation and
/// consumed by either the order executor or the backtest loop.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeDecision {
    pub action: TradeAction,
    pub stock_code: String,
    pub stock_name: String,
    pub quantity: u64,
    pub reason: String,
    /// 0.0 - 1.0
    pub confidence: f64,
    pub target_price: Option<f64>,
}

impl TradeDecision {
    pub fn is_stop_loss(&self) -> bool {
        self.reason.to_lowercase().contains("stop-loss")
    }

    pub fn is_take_profit(&self) -> bool {
        self.reason.to_lowercase().contains("take-profit")
    }

    /// Notional value at the target price, if one is set.
    pub fn notional(&self) -> Option<f64> {
        self.target_price.map(|p| p * self.quantity as f64)
    }
}

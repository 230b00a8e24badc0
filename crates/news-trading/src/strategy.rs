use std::cmp::Ordering;
use std::collections::HashMap;

use analysis_core::TradingSignal;
use broker_trait::{AccountBalance, StockHolding};
use serde::{Deserialize, Serialize};

use crate::decision::{TradeAction, TradeDecision};

/// Minimum confidence for sentiment-driven decisions to be executed.
const MIN_EXECUTION_CONFIDENCE: f64 = 0.5;

/// Price lookup injected into the strategy: stock code -> latest price.
pub trait PriceLookup {
    fn current_price(&self, stock_code: &str) -> Option<f64>;
}

impl<F> PriceLookup for F
where
    F: Fn(&str) -> Option<f64>,
{
    fn current_price(&self, stock_code: &str) -> Option<f64> {
        self(stock_code)
    }
}

impl PriceLookup for HashMap<String, f64> {
    fn current_price(&self, stock_code: &str) -> Option<f64> {
        self.get(stock_code).copied()
    }
}

/// Strategy thresholds. Rates are fractions (-0.05 = -5%).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    // Position sizing
    pub max_single_trade_ratio: f64,
    pub split_count: u32,

    // Exits
    pub stop_loss_rate: f64,
    pub take_profit_rate: f64,
    pub max_holding_ratio: f64,

    // Signal thresholds
    pub buy_threshold: f64,
    pub sell_threshold: f64,
    pub min_mentions: u32,
}

impl Default for StrategyConfig {
    fn default() -> Self {
        Self {
            max_single_trade_ratio: 0.1,
            split_count: 3,
            stop_loss_rate: -0.05,
            take_profit_rate: 0.10,
            max_holding_ratio: 0.2,
            buy_threshold: 0.3,
            sell_threshold: -0.2,
            min_mentions: 3,
        }
    }
}

/// Conservative news-sentiment strategy.
///
/// Exit rules on held positions (stop-loss, take-profit, negative news) always
/// take priority over entries; at most one decision is produced per signal.
pub struct TradingStrategy {
    config: StrategyConfig,
}

impl TradingStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    fn split_count(&self) -> u64 {
        u64::from(self.config.split_count.max(1))
    }

    /// Evaluate one signal against the current account. Returns `None` to hold.
    pub fn evaluate(
        &self,
        signal: &TradingSignal,
        holdings: &[StockHolding],
        balance: &AccountBalance,
        prices: &dyn PriceLookup,
    ) -> Option<TradeDecision> {
        let holding = holdings.iter().find(|h| h.stock_code == signal.stock_code);
        let avg_sentiment = signal.avg_sentiment();
        let confidence = signal.mention_score();

        if let Some(holding) = holding {
            if holding.profit_rate <= self.config.stop_loss_rate {
                return Some(self.sell(
                    signal,
                    holding,
                    holding.quantity,
                    format!("Stop-loss triggered ({:.1}%)", holding.profit_rate * 100.0),
                    1.0,
                ));
            }

            if holding.profit_rate >= self.config.take_profit_rate {
                return Some(self.sell(
                    signal,
                    holding,
                    (holding.quantity / 2).max(1),
                    format!("Take-profit ({:+.1}%)", holding.profit_rate * 100.0),
                    0.8,
                ));
            }

            if avg_sentiment < self.config.sell_threshold {
                return Some(self.sell(
                    signal,
                    holding,
                    (holding.quantity / self.split_count()).max(1),
                    format!("Negative sentiment ({avg_sentiment:.2})"),
                    confidence,
                ));
            }
        }

        if avg_sentiment <= self.config.buy_threshold || signal.mentions < self.config.min_mentions {
            return None;
        }

        if let Some(holding) = holding {
            let current_ratio = (holding.quantity as f64 * holding.current_price)
                / balance.total_eval_amount.max(1.0);
            if current_ratio >= self.config.max_holding_ratio {
                tracing::debug!(
                    "Position limit reached for {}: {:.1}% >= {:.1}%",
                    signal.stock_code,
                    current_ratio * 100.0,
                    self.config.max_holding_ratio * 100.0
                );
                return None;
            }
        }

        let Some(price) = prices.current_price(&signal.stock_code).filter(|p| *p > 0.0) else {
            tracing::warn!("No usable price for {}, skipping buy", signal.stock_code);
            return None;
        };

        let buy_qty = self.buy_quantity(balance.cash, price);
        if buy_qty == 0 {
            return None;
        }

        Some(TradeDecision {
            action: TradeAction::Buy,
            stock_code: signal.stock_code.clone(),
            stock_name: signal.stock_name.clone(),
            quantity: buy_qty,
            reason: format!(
                "Positive news ({} mentions, sentiment: {avg_sentiment:.2})",
                signal.mentions
            ),
            confidence,
            target_price: Some(price),
        })
    }

    /// Shares to buy with one split of the per-trade budget.
    pub fn buy_quantity(&self, cash: f64, price: f64) -> u64 {
        if price <= 0.0 || cash <= 0.0 {
            return 0;
        }
        let max_invest =
            cash * self.config.max_single_trade_ratio / self.split_count() as f64;
        (max_invest / price).floor() as u64
    }

    fn sell(
        &self,
        signal: &TradingSignal,
        holding: &StockHolding,
        quantity: u64,
        reason: String,
        confidence: f64,
    ) -> TradeDecision {
        TradeDecision {
            action: TradeAction::Sell,
            stock_code: signal.stock_code.clone(),
            stock_name: signal.stock_name.clone(),
            quantity,
            reason,
            confidence,
            target_price: Some(holding.current_price),
        }
    }

    /// Evaluate signals strongest first and return up to `max_decisions`.
    ///
    /// Evaluation stops as soon as the cap is reached; weaker signals after
    /// that point are never looked at.
    pub fn evaluate_batch(
        &self,
        signals: &HashMap<String, TradingSignal>,
        holdings: &[StockHolding],
        balance: &AccountBalance,
        prices: &dyn PriceLookup,
        max_decisions: usize,
    ) -> Vec<TradeDecision> {
        let mut decisions = Vec::new();
        if max_decisions == 0 {
            return decisions;
        }

        let mut ranked: Vec<&TradingSignal> = signals.values().collect();
        ranked.sort_by(|a, b| {
            b.signal_strength()
                .partial_cmp(&a.signal_strength())
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.stock_code.cmp(&b.stock_code))
        });

        for signal in ranked {
            if let Some(decision) = self.evaluate(signal, holdings, balance, prices) {
                decisions.push(decision);
            }
            if decisions.len() >= max_decisions {
                break;
            }
        }

        decisions
    }

    /// Risk-reducing exits always execute; everything else needs confidence.
    pub fn should_execute(&self, decision: &TradeDecision) -> bool {
        if decision.is_stop_loss() || decision.is_take_profit() {
            return true;
        }
        decision.confidence >= MIN_EXECUTION_CONFIDENCE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signal(code: &str, mentions: u32, avg_sentiment: f64) -> TradingSignal {
        TradingSignal::new(code, format!("Stock {code}"), "Test").with_mentions(mentions, avg_sentiment)
    }

    fn balance(cash: f64, holdings: Vec<StockHolding>) -> AccountBalance {
        let stock: f64 = holdings.iter().map(|h| h.eval_amount).sum();
        AccountBalance {
            cash,
            total_eval_amount: cash + stock,
            total_profit_loss: 0.0,
            total_profit_rate: 0.0,
            holdings,
        }
    }

    fn flat_price(price: f64) -> impl Fn(&str) -> Option<f64> {
        move |_: &str| Some(price)
    }

    fn strategy() -> TradingStrategy {
        TradingStrategy::new(StrategyConfig::default())
    }

    #[test]
    fn test_buy_quantity_example() {
        // floor(1,000,000 * 0.1 / 3 / 10,000) = 3
        assert_eq!(strategy().buy_quantity(1_000_000.0, 10_000.0), 3);
        assert_eq!(strategy().buy_quantity(1_000_000.0, 0.0), 0);
        assert_eq!(strategy().buy_quantity(0.0, 10_000.0), 0);
    }

    #[test]
    fn test_buy_on_positive_news() {
        let s = strategy();
        let bal = balance(1_000_000.0, vec![]);
        let decision = s
            .evaluate(&signal("A", 6, 0.5), &bal.holdings, &bal, &flat_price(10_000.0))
            .unwrap();
        assert_eq!(decision.action, TradeAction::Buy);
        assert_eq!(decision.quantity, 3);
        assert!((decision.confidence - 0.6).abs() < 1e-9);
        assert_eq!(decision.target_price, Some(10_000.0));
    }

    #[test]
    fn test_no_buy_below_min_mentions_or_threshold() {
        let s = strategy();
        let bal = balance(1_000_000.0, vec![]);
        let prices = flat_price(10_000.0);
        assert!(s.evaluate(&signal("A", 2, 0.9), &bal.holdings, &bal, &prices).is_none());
        assert!(s.evaluate(&signal("A", 5, 0.2), &bal.holdings, &bal, &prices).is_none());
    }

    #[test]
    fn test_no_buy_when_price_missing_or_too_expensive() {
        let s = strategy();
        let bal = balance(1_000_000.0, vec![]);
        let none = |_: &str| -> Option<f64> { None };
        assert!(s.evaluate(&signal("A", 6, 0.5), &bal.holdings, &bal, &none).is_none());
        // budget 33,333 cannot buy a 50,000 share
        assert!(s
            .evaluate(&signal("A", 6, 0.5), &bal.holdings, &bal, &flat_price(50_000.0))
            .is_none());
    }

    #[test]
    fn test_stop_loss_sells_everything_regardless_of_sentiment() {
        let s = strategy();
        let held = StockHolding::marked("A", "Stock A", 17, 10_000.0, 9_400.0);
        let bal = balance(500_000.0, vec![held]);
        let decision = s
            .evaluate(&signal("A", 10, 0.9), &bal.holdings, &bal, &flat_price(9_400.0))
            .unwrap();
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(decision.quantity, 17);
        assert_eq!(decision.confidence, 1.0);
        assert!(decision.is_stop_loss());
    }

    #[test]
    fn test_take_profit_sells_half() {
        let s = strategy();
        for (qty, expected) in [(9u64, 4u64), (10, 5), (1, 1)] {
            let held = StockHolding::marked("A", "Stock A", qty, 10_000.0, 11_500.0);
            let bal = balance(500_000.0, vec![held]);
            let decision = s
                .evaluate(&signal("A", 1, 0.0), &bal.holdings, &bal, &flat_price(11_500.0))
                .unwrap();
            assert_eq!(decision.quantity, expected);
            assert_eq!(decision.confidence, 0.8);
            assert!(decision.is_take_profit());
        }
    }

    #[test]
    fn test_negative_sentiment_partial_sell() {
        let s = strategy();
        let held = StockHolding::marked("A", "Stock A", 10, 10_000.0, 10_100.0);
        let bal = balance(500_000.0, vec![held]);
        let decision = s
            .evaluate(&signal("A", 4, -0.5), &bal.holdings, &bal, &flat_price(10_100.0))
            .unwrap();
        assert_eq!(decision.action, TradeAction::Sell);
        assert_eq!(decision.quantity, 3);
        assert!((decision.confidence - 0.4).abs() < 1e-9);

        let tiny = StockHolding::marked("A", "Stock A", 2, 10_000.0, 10_100.0);
        let bal = balance(500_000.0, vec![tiny]);
        let decision = s
            .evaluate(&signal("A", 4, -0.5), &bal.holdings, &bal, &flat_price(10_100.0))
            .unwrap();
        assert_eq!(decision.quantity, 1);
    }

    #[test]
    fn test_position_cap_blocks_additional_buy() {
        let s = strategy();
        // 30 * 10,000 = 300,000 of 1,000,000 total -> 30% >= 20%
        let held = StockHolding::marked("A", "Stock A", 30, 10_000.0, 10_000.0);
        let bal = balance(700_000.0, vec![held]);
        assert!(s
            .evaluate(&signal("A", 8, 0.6), &bal.holdings, &bal, &flat_price(10_000.0))
            .is_none());

        // 10% position is allowed to grow
        let held = StockHolding::marked("A", "Stock A", 10, 10_000.0, 10_000.0);
        let bal = balance(900_000.0, vec![held]);
        let decision = s
            .evaluate(&signal("A", 8, 0.6), &bal.holdings, &bal, &flat_price(10_000.0))
            .unwrap();
        assert_eq!(decision.action, TradeAction::Buy);
    }

    #[test]
    fn test_evaluate_batch_ranks_and_caps() {
        let s = strategy();
        let bal = balance(10_000_000.0, vec![]);
        let mut signals = HashMap::new();
        for (code, mentions, sentiment) in [
            ("A", 10, 0.9),
            ("B", 9, 0.8),
            ("C", 8, 0.7),
            ("D", 7, 0.6),
        ] {
            signals.insert(code.to_string(), signal(code, mentions, sentiment));
        }

        let decisions = s.evaluate_batch(&signals, &bal.holdings, &bal, &flat_price(10_000.0), 2);
        let codes: Vec<&str> = decisions.iter().map(|d| d.stock_code.as_str()).collect();
        assert_eq!(codes, vec!["A", "B"]);
    }

    #[test]
    fn test_evaluate_batch_stops_at_cap_even_after_holds() {
        let s = strategy();
        let bal = balance(10_000_000.0, vec![]);
        let mut signals = HashMap::new();
        // strongest signal is lukewarm and holds
        signals.insert("HOLD".to_string(), signal("HOLD", 10, 0.25));
        signals.insert("BUY1".to_string(), signal("BUY1", 6, 0.5));
        signals.insert("BUY2".to_string(), signal("BUY2", 5, 0.4));

        let decisions = s.evaluate_batch(&signals, &bal.holdings, &bal, &flat_price(10_000.0), 1);
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].stock_code, "BUY1");
    }

    #[test]
    fn test_should_execute() {
        let s = strategy();
        let mut d = TradeDecision {
            action: TradeAction::Sell,
            stock_code: "A".to_string(),
            stock_name: "Stock A".to_string(),
            quantity: 1,
            reason: "Take-profit (+10.0%)".to_string(),
            confidence: 0.1,
            target_price: None,
        };
        assert!(s.should_execute(&d));

        d.reason = "Negative sentiment (-0.50)".to_string();
        assert!(!s.should_execute(&d));
        d.confidence = 0.5;
        assert!(s.should_execute(&d));
    }
}

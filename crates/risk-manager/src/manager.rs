use std::sync::Arc;

use broker_trait::{AccountBalance, OrderResult};
use news_trading::{TradeAction, TradeDecision};

use crate::clock::{Clock, SystemClock};
use crate::models::*;

/// Daily trading gatekeeper. Counters live in memory and roll over lazily the
/// first time any method runs on a new calendar day.
pub struct RiskManager {
    config: RiskConfig,
    clock: Arc<dyn Clock>,
    daily: DailyStats,
    initial_portfolio_value: Option<f64>,
}

impl RiskManager {
    pub fn new(config: RiskConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RiskConfig, clock: Arc<dyn Clock>) -> Self {
        let today = clock.now().date();
        Self {
            config,
            clock,
            daily: DailyStats::new(today),
            initial_portfolio_value: None,
        }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Loss-limit baseline for today. A stale value from a previous day is
    /// dropped first.
    pub fn initial_portfolio_value(&mut self) -> Option<f64> {
        self.ensure_today();
        self.initial_portfolio_value
    }

    /// Baseline for the daily loss limit. Normally set once at the start of the day.
    pub fn set_initial_portfolio_value(&mut self, value: f64) {
        self.initial_portfolio_value = Some(value);
        tracing::info!("Initial portfolio value set: {:.0}", value);
    }

    fn ensure_today(&mut self) {
        let today = self.clock.now().date();
        if self.daily.date != today {
            tracing::info!("New trading day {}, resetting daily stats", today);
            self.daily = DailyStats::new(today);
            self.initial_portfolio_value = None;
        }
    }

    /// Clear the day's counters and the loss-limit baseline.
    pub fn reset_daily(&mut self) {
        self.daily = DailyStats::new(self.clock.now().date());
        self.initial_portfolio_value = None;
        tracing::info!("Daily risk stats reset");
    }

    /// Whether any trade is allowed right now.
    pub fn can_trade(&mut self) -> RiskCheck {
        self.ensure_today();

        if self.daily.trade_count >= self.config.max_trades_per_day {
            return RiskCheck::reject(format!(
                "Daily trade limit reached ({}/{})",
                self.daily.trade_count, self.config.max_trades_per_day
            ));
        }

        if let Some(initial) = self.initial_portfolio_value.filter(|v| *v > 0.0) {
            let loss_rate = self.daily.realized_pnl / initial;
            if loss_rate <= self.config.daily_loss_limit {
                return RiskCheck::reject(format!(
                    "Daily loss limit reached ({:.2}%)",
                    loss_rate * 100.0
                ));
            }
        }

        RiskCheck::ok()
    }

    /// Check a single decision against the current account.
    pub fn validate_order(
        &mut self,
        decision: &TradeDecision,
        balance: &AccountBalance,
    ) -> RiskCheck {
        let check = self.can_trade();
        if !check.allowed {
            return check;
        }

        match decision.action {
            TradeAction::Buy => {
                let unit_price = decision
                    .target_price
                    .unwrap_or(self.config.fallback_unit_price);
                let required = decision.quantity as f64 * unit_price;

                if required > balance.cash {
                    return RiskCheck::reject(format!(
                        "Insufficient cash (need {:.0}, have {:.0})",
                        required, balance.cash
                    ));
                }

                let trade_ratio = required / balance.total_eval_amount.max(1.0);
                if trade_ratio > self.config.max_single_trade_ratio {
                    return RiskCheck::reject(format!(
                        "Single trade ratio {:.1}% exceeds limit {:.1}%",
                        trade_ratio * 100.0,
                        self.config.max_single_trade_ratio * 100.0
                    ));
                }
            }
            TradeAction::Sell => match balance.holding(&decision.stock_code) {
                None => {
                    return RiskCheck::reject(format!("No holding for {}", decision.stock_code));
                }
                Some(holding) if decision.quantity > holding.quantity => {
                    return RiskCheck::reject(format!(
                        "Sell quantity {} exceeds held quantity {}",
                        decision.quantity, holding.quantity
                    ));
                }
                Some(_) => {}
            },
        }

        RiskCheck::ok()
    }

    /// Append an executed trade to the daily ledger. `realized_pnl` only
    /// moves the loss counter when the caller supplies it.
    pub fn record_trade(
        &mut self,
        decision: &TradeDecision,
        order: &OrderResult,
        realized_pnl: Option<f64>,
    ) {
        self.ensure_today();

        let price = order.price.unwrap_or(0.0);
        let total_amount = decision.quantity as f64 * price;
        let timestamp = order
            .executed_at
            .map(|t| t.naive_local())
            .unwrap_or_else(|| self.clock.now());

        self.daily.trades.push(TradeRecord {
            timestamp,
            stock_code: decision.stock_code.clone(),
            action: decision.action,
            quantity: decision.quantity,
            price,
            total_amount,
            realized_pnl,
        });
        self.daily.trade_count += 1;

        match decision.action {
            TradeAction::Buy => {
                self.daily.buy_count += 1;
                self.daily.total_bought += total_amount;
            }
            TradeAction::Sell => {
                self.daily.sell_count += 1;
                self.daily.total_sold += total_amount;
            }
        }

        if let Some(pnl) = realized_pnl {
            self.daily.realized_pnl += pnl;
        }

        tracing::info!(
            "Trade recorded: {} {} x{} @ {:.0} ({}/{} today)",
            decision.action,
            decision.stock_code,
            decision.quantity,
            price,
            self.daily.trade_count,
            self.config.max_trades_per_day
        );
    }

    pub fn daily_stats(&mut self) -> DailyStatsSummary {
        self.ensure_today();
        DailyStatsSummary {
            date: self.daily.date.format("%Y-%m-%d").to_string(),
            trade_count: self.daily.trade_count,
            buy_count: self.daily.buy_count,
            sell_count: self.daily.sell_count,
            total_bought: self.daily.total_bought,
            total_sold: self.daily.total_sold,
            realized_pnl: self.daily.realized_pnl,
            remaining_trades: self
                .config
                .max_trades_per_day
                .saturating_sub(self.daily.trade_count),
        }
    }

    /// Today's trades in execution order.
    pub fn trade_history(&mut self) -> Vec<TradeRecord> {
        self.ensure_today();
        self.daily.trades.clone()
    }
}

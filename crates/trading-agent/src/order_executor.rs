use std::sync::Arc;

use anyhow::Result;
use broker_trait::{BrokerClient, OrderResult};
use chrono::{DateTime, Local};
use news_trading::{TradeAction, TradeDecision};
use risk_manager::{DailyStatsSummary, RiskManager};
use serde::{Deserialize, Serialize};

/// Outcome of one decision. Rejections and broker faults both end up here
/// with `success == false`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub decision: TradeDecision,
    pub order_result: Option<OrderResult>,
    pub error_message: Option<String>,
    pub executed_at: Option<DateTime<Local>>,
}

impl ExecutionResult {
    fn executed(decision: &TradeDecision, order: OrderResult) -> Self {
        Self {
            success: true,
            decision: decision.clone(),
            order_result: Some(order),
            error_message: None,
            executed_at: Some(Local::now()),
        }
    }

    fn failed(decision: &TradeDecision, message: impl Into<String>) -> Self {
        Self {
            success: false,
            decision: decision.clone(),
            order_result: None,
            error_message: Some(message.into()),
            executed_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub daily_stats: DailyStatsSummary,
}

/// Validates decisions through the risk manager and sends them to the broker.
/// In dry-run mode fills are synthesized and the broker only supplies balances.
pub struct OrderExecutor {
    broker: Arc<dyn BrokerClient>,
    risk: RiskManager,
    dry_run: bool,
}

impl OrderExecutor {
    pub fn new(broker: Arc<dyn BrokerClient>, risk: RiskManager, dry_run: bool) -> Self {
        Self {
            broker,
            risk,
            dry_run,
        }
    }

    pub fn broker(&self) -> &Arc<dyn BrokerClient> {
        &self.broker
    }

    pub fn risk(&mut self) -> &mut RiskManager {
        &mut self.risk
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Execute one decision. Never fails: every problem becomes a failed result.
    pub async fn execute(&mut self, decision: &TradeDecision) -> ExecutionResult {
        let balance = match self.broker.get_balance().await {
            Ok(balance) => balance,
            Err(e) => {
                return ExecutionResult::failed(decision, format!("Failed to get balance: {:#}", e))
            }
        };

        if self.risk.initial_portfolio_value().is_none() {
            self.risk
                .set_initial_portfolio_value(balance.total_eval_amount);
        }

        let check = self.risk.validate_order(decision, &balance);
        if !check.allowed {
            tracing::info!("Order rejected: {} - {}", decision.stock_code, check.reason);
            return ExecutionResult::failed(decision, check.reason);
        }

        if self.dry_run {
            return self.simulate(decision);
        }

        match self.submit(decision).await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Order failed: {} - {:#}", decision.stock_code, e);
                ExecutionResult::failed(decision, format!("{:#}", e))
            }
        }
    }

    async fn submit(&mut self, decision: &TradeDecision) -> Result<ExecutionResult> {
        let (order, realized_pnl) = match decision.action {
            TradeAction::Buy => {
                let order = self
                    .broker
                    .buy_market(&decision.stock_code, decision.quantity)
                    .await?;
                (order, None)
            }
            TradeAction::Sell => {
                // P&L is taken from the position as it stood before the sell.
                let realized_pnl = match self.broker.get_holding(&decision.stock_code).await? {
                    Some(holding) => {
                        let current = self.broker.get_current_price(&decision.stock_code).await?;
                        Some((current - holding.avg_buy_price) * decision.quantity as f64)
                    }
                    None => None,
                };
                let order = self
                    .broker
                    .sell_market(&decision.stock_code, decision.quantity)
                    .await?;
                (order, realized_pnl)
            }
        };

        if !order.success {
            let message = order
                .message
                .clone()
                .unwrap_or_else(|| "Order not filled".to_string());
            tracing::warn!("Order failed: {} - {}", decision.stock_code, message);
            return Ok(ExecutionResult {
                order_result: Some(order),
                ..ExecutionResult::failed(decision, message)
            });
        }

        self.risk.record_trade(decision, &order, realized_pnl);
        tracing::info!(
            "Executed: {} {} x{} | Order ID: {}",
            decision.action,
            decision.stock_code,
            decision.quantity,
            order.order_id.as_deref().unwrap_or("-")
        );
        Ok(ExecutionResult::executed(decision, order))
    }

    /// Synthesize a fill. Simulated fills stay out of the risk ledger.
    fn simulate(&self, decision: &TradeDecision) -> ExecutionResult {
        tracing::info!(
            "[DRY RUN] {} {} x{} | Reason: {}",
            decision.action,
            decision.stock_code,
            decision.quantity,
            decision.reason
        );

        let order = OrderResult::filled(
            format!("DRY-{}", Local::now().format("%H%M%S")),
            decision.stock_code.as_str(),
            decision.action.side(),
            decision.quantity,
            decision.target_price,
        )
        .with_message("Dry run simulation");

        ExecutionResult::executed(decision, order)
    }

    /// Execute in order, re-checking the daily gates before each decision.
    pub async fn execute_batch(&mut self, decisions: &[TradeDecision]) -> Vec<ExecutionResult> {
        let mut results = Vec::with_capacity(decisions.len());
        for decision in decisions {
            let check = self.risk.can_trade();
            if !check.allowed {
                tracing::warn!("Cannot continue trading: {}", check.reason);
                results.push(ExecutionResult::failed(decision, check.reason));
                continue;
            }
            results.push(self.execute(decision).await);
        }
        results
    }

    pub fn execution_summary(&mut self, results: &[ExecutionResult]) -> ExecutionSummary {
        let successful: Vec<&ExecutionResult> = results.iter().filter(|r| r.success).collect();
        let buy_count = successful
            .iter()
            .filter(|r| r.decision.action == TradeAction::Buy)
            .count();

        ExecutionSummary {
            total: results.len(),
            successful: successful.len(),
            failed: results.len() - successful.len(),
            buy_count,
            sell_count: successful.len() - buy_count,
            daily_stats: self.risk.daily_stats(),
        }
    }
}

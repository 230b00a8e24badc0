use anyhow::Result;
use async_trait::async_trait;
use broker_trait::AccountBalance;
use risk_manager::DailyStatsSummary;

use crate::agent::CycleSummary;
use crate::order_executor::ExecutionResult;

/// Outbound alerts about executions, cycles and the end-of-day report.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_execution(&self, result: &ExecutionResult) -> Result<()>;

    async fn notify_cycle(
        &self,
        summary: &CycleSummary,
        balance: Option<&AccountBalance>,
    ) -> Result<()>;

    async fn notify_daily_report(
        &self,
        stats: &DailyStatsSummary,
        balance: Option<&AccountBalance>,
    ) -> Result<()>;
}

pub fn format_execution(result: &ExecutionResult) -> String {
    let decision = &result.decision;
    let status = if result.success { "EXECUTED" } else { "FAILED" };
    let mut message = format!(
        "**{} {}** {} ({}) x{}\nReason: {}",
        status,
        decision.action,
        decision.stock_name,
        decision.stock_code,
        decision.quantity,
        decision.reason
    );
    if let Some(price) = result.order_result.as_ref().and_then(|o| o.price) {
        message.push_str(&format!("\nPrice: {:.0} KRW", price));
    }
    if let Some(error) = &result.error_message {
        message.push_str(&format!("\nError: {}", error));
    }
    message
}

fn format_balance(balance: &AccountBalance) -> String {
    format!(
        "Cash: {:.0} KRW | Total: {:.0} KRW ({:+.2}%) | Holdings: {}",
        balance.cash,
        balance.total_eval_amount,
        balance.total_profit_rate,
        balance.holdings.len()
    )
}

pub fn format_cycle(summary: &CycleSummary, balance: Option<&AccountBalance>) -> String {
    let mut message = format!(
        "**Analysis Cycle** {}\nSignals: {} | Decisions: {} | Executed: {} | Failed: {}",
        summary.timestamp.format("%Y-%m-%d %H:%M"),
        summary.signals_generated,
        summary.decisions_made,
        summary.trades_executed,
        summary.trades_failed
    );
    if let Some(error) = &summary.error {
        message.push_str(&format!("\nError: {}", error));
    }
    if let Some(balance) = balance {
        message.push('\n');
        message.push_str(&format_balance(balance));
    }
    message
}

pub fn format_daily_report(stats: &DailyStatsSummary, balance: Option<&AccountBalance>) -> String {
    let mut message = format!(
        r#"**Daily Trading Report** {}

**Trades**: {} (buy {}, sell {})
**Bought**: {:.0} KRW
**Sold**: {:.0} KRW
**Realized P/L**: {:+.0} KRW
**Remaining trades**: {}"#,
        stats.date,
        stats.trade_count,
        stats.buy_count,
        stats.sell_count,
        stats.total_bought,
        stats.total_sold,
        stats.realized_pnl,
        stats.remaining_trades
    );
    if let Some(balance) = balance {
        message.push_str("\n\n");
        message.push_str(&format_balance(balance));
    }
    message
}

/// Writes every notification to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify_execution(&self, result: &ExecutionResult) -> Result<()> {
        tracing::info!("{}", format_execution(result));
        Ok(())
    }

    async fn notify_cycle(
        &self,
        summary: &CycleSummary,
        balance: Option<&AccountBalance>,
    ) -> Result<()> {
        tracing::info!("{}", format_cycle(summary, balance));
        Ok(())
    }

    async fn notify_daily_report(
        &self,
        stats: &DailyStatsSummary,
        balance: Option<&AccountBalance>,
    ) -> Result<()> {
        tracing::info!("{}", format_daily_report(stats, balance));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use news_trading::{TradeAction, TradeDecision};

    fn decision() -> TradeDecision {
        TradeDecision {
            action: TradeAction::Sell,
            stock_code: "005930".to_string(),
            stock_name: "Samsung Electronics".to_string(),
            quantity: 3,
            reason: "Stop-loss triggered (-6.0%)".to_string(),
            confidence: 1.0,
            target_price: Some(65_000.0),
        }
    }

    #[test]
    fn test_failed_execution_message_carries_error() {
        let result = ExecutionResult {
            success: false,
            decision: decision(),
            order_result: None,
            error_message: Some("No holding for 005930".to_string()),
            executed_at: None,
        };
        let message = format_execution(&result);
        assert!(message.starts_with("**FAILED SELL**"));
        assert!(message.contains("Error: No holding for 005930"));
        assert!(!message.contains("Price:"));
    }

    #[test]
    fn test_cycle_message_includes_balance() {
        let summary = CycleSummary {
            timestamp: Local::now(),
            signals_generated: 4,
            decisions_made: 2,
            trades_executed: 1,
            trades_failed: 1,
            error: None,
        };
        let balance = AccountBalance {
            cash: 400_000.0,
            total_eval_amount: 510_000.0,
            total_profit_loss: 10_000.0,
            total_profit_rate: 2.0,
            holdings: Vec::new(),
        };
        let message = format_cycle(&summary, Some(&balance));
        assert!(message.contains("Signals: 4 | Decisions: 2 | Executed: 1 | Failed: 1"));
        assert!(message.contains("Total: 510000 KRW (+2.00%)"));
    }

    #[test]
    fn test_daily_report_lists_counters() {
        let stats = DailyStatsSummary {
            date: "2024-03-04".to_string(),
            trade_count: 3,
            buy_count: 2,
            sell_count: 1,
            total_bought: 210_000.0,
            total_sold: 70_000.0,
            realized_pnl: -4_000.0,
            remaining_trades: 7,
        };
        let message = format_daily_report(&stats, None);
        assert!(message.contains("2024-03-04"));
        assert!(message.contains("**Trades**: 3 (buy 2, sell 1)"));
        assert!(message.contains("**Realized P/L**: -4000 KRW"));
    }
}

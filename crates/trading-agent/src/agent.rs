use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use broker_trait::AccountBalance;
use chrono::{DateTime, Local};
use news_trading::{TradeDecision, TradingStrategy};
use risk_manager::DailyStatsSummary;
use serde::{Deserialize, Serialize};

use crate::journal::TradeJournal;
use crate::notifier::Notifier;
use crate::order_executor::{ExecutionResult, OrderExecutor};
use crate::signals::SignalSource;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleSummary {
    pub timestamp: DateTime<Local>,
    pub signals_generated: usize,
    pub decisions_made: usize,
    pub trades_executed: usize,
    pub trades_failed: usize,
    pub error: Option<String>,
}

impl CycleSummary {
    fn start() -> Self {
        Self {
            timestamp: Local::now(),
            signals_generated: 0,
            decisions_made: 0,
            trades_executed: 0,
            trades_failed: 0,
            error: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AgentStatus {
    pub dry_run: bool,
    pub broker: String,
    pub balance: Option<AccountBalance>,
    pub daily_stats: DailyStatsSummary,
}

/// One analysis-to-execution pipeline. Owned by a single worker task so
/// cycles never overlap.
pub struct TradingAgent {
    strategy: TradingStrategy,
    executor: OrderExecutor,
    signals: Box<dyn SignalSource>,
    notifier: Arc<dyn Notifier>,
    journal: Option<TradeJournal>,
    max_decisions: usize,
}

impl TradingAgent {
    pub fn new(
        strategy: TradingStrategy,
        executor: OrderExecutor,
        signals: impl SignalSource + 'static,
        notifier: Arc<dyn Notifier>,
        max_decisions: usize,
    ) -> Self {
        Self {
            strategy,
            executor,
            signals: Box::new(signals),
            notifier,
            journal: None,
            max_decisions,
        }
    }

    pub fn with_journal(mut self, journal: TradeJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    /// Run one cycle. Errors are folded into the summary, which is always
    /// handed to the notifier.
    pub async fn run_cycle(&mut self) -> CycleSummary {
        tracing::info!("Starting analysis cycle...");
        let mut summary = CycleSummary::start();

        if let Err(e) = self.cycle_steps(&mut summary).await {
            tracing::error!("Error in analysis cycle: {:#}", e);
            summary.error = Some(format!("{:#}", e));
        }

        let balance = match self.executor.broker().get_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!("Failed to fetch balance for cycle summary: {}", e);
                None
            }
        };
        if let Err(e) = self
            .notifier
            .notify_cycle(&summary, balance.as_ref())
            .await
        {
            tracing::warn!("Failed to send cycle notification: {}", e);
        }

        tracing::info!(
            "Cycle complete: {} signals, {} decisions, {} executed, {} failed",
            summary.signals_generated,
            summary.decisions_made,
            summary.trades_executed,
            summary.trades_failed
        );
        summary
    }

    async fn cycle_steps(&mut self, summary: &mut CycleSummary) -> Result<()> {
        let signals = self.signals.collect().await?;
        summary.signals_generated = signals.len();
        if signals.is_empty() {
            tracing::info!("No signals this cycle");
            return Ok(());
        }

        let decisions = self.make_decisions(&signals).await?;
        summary.decisions_made = decisions.len();
        if decisions.is_empty() {
            tracing::info!("No executable decisions this cycle");
            return Ok(());
        }

        let results = self.executor.execute_batch(&decisions).await;
        for result in &results {
            self.publish(result).await;
        }

        let execution = self.executor.execution_summary(&results);
        tracing::info!(
            "Execution: {}/{} successful (buy {}, sell {}) | trades today: {}, remaining: {}",
            execution.successful,
            execution.total,
            execution.buy_count,
            execution.sell_count,
            execution.daily_stats.trade_count,
            execution.daily_stats.remaining_trades
        );
        summary.trades_executed = execution.successful;
        summary.trades_failed = execution.failed;
        Ok(())
    }

    async fn make_decisions(
        &self,
        signals: &HashMap<String, analysis_core::TradingSignal>,
    ) -> Result<Vec<TradeDecision>> {
        let broker = self.executor.broker();
        let balance = broker.get_balance().await?;

        // quotes for every signalled or held code, fetched up front
        let mut prices: HashMap<String, f64> = HashMap::new();
        let codes = signals
            .keys()
            .chain(balance.holdings.iter().map(|h| &h.stock_code));
        for code in codes {
            if prices.contains_key(code) {
                continue;
            }
            match broker.get_current_price(code).await {
                Ok(price) => {
                    prices.insert(code.clone(), price);
                }
                Err(e) => tracing::debug!("No quote for {}: {}", code, e),
            }
        }

        let decisions = self.strategy.evaluate_batch(
            signals,
            &balance.holdings,
            &balance,
            &prices,
            self.max_decisions,
        );
        Ok(decisions
            .into_iter()
            .filter(|d| self.strategy.should_execute(d))
            .collect())
    }

    async fn publish(&self, result: &ExecutionResult) {
        if let Some(journal) = &self.journal {
            journal.record(result).await;
        }
        if let Err(e) = self.notifier.notify_execution(result).await {
            tracing::warn!("Failed to send execution notification: {}", e);
        }
    }

    pub async fn daily_report(&mut self) -> DailyStatsSummary {
        let stats = self.executor.risk().daily_stats();
        let balance = self.executor.broker().get_balance().await.ok();
        if let Err(e) = self
            .notifier
            .notify_daily_report(&stats, balance.as_ref())
            .await
        {
            tracing::warn!("Failed to send daily report: {}", e);
        }
        stats
    }

    pub fn reset_risk_limits(&mut self) {
        self.executor.risk().reset_daily();
        tracing::info!("Daily risk limits reset");
    }

    pub async fn status(&mut self) -> AgentStatus {
        let broker = self.executor.broker().clone();
        let balance = match broker.get_balance().await {
            Ok(balance) => Some(balance),
            Err(e) => {
                tracing::warn!("Failed to fetch balance: {}", e);
                None
            }
        };
        AgentStatus {
            dry_run: self.executor.is_dry_run(),
            broker: broker.source_name().to_string(),
            balance,
            daily_stats: self.executor.risk().daily_stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use analysis_core::TradingSignal;
    use async_trait::async_trait;
    use backtest_engine::{SimulatedBroker, SimulatedPortfolio};
    use news_trading::StrategyConfig;
    use risk_manager::{RiskConfig, RiskManager};

    struct FixedSignals(Result<HashMap<String, TradingSignal>, String>);

    #[async_trait]
    impl SignalSource for FixedSignals {
        async fn collect(&self) -> Result<HashMap<String, TradingSignal>> {
            self.0.clone().map_err(anyhow::Error::msg)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        executions: Mutex<Vec<ExecutionResult>>,
        cycles: Mutex<Vec<(CycleSummary, bool)>>,
        reports: Mutex<Vec<DailyStatsSummary>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify_execution(&self, result: &ExecutionResult) -> Result<()> {
            self.executions.lock().unwrap().push(result.clone());
            Ok(())
        }

        async fn notify_cycle(
            &self,
            summary: &CycleSummary,
            balance: Option<&AccountBalance>,
        ) -> Result<()> {
            self.cycles
                .lock()
                .unwrap()
                .push((summary.clone(), balance.is_some()));
            Ok(())
        }

        async fn notify_daily_report(
            &self,
            stats: &DailyStatsSummary,
            _balance: Option<&AccountBalance>,
        ) -> Result<()> {
            self.reports.lock().unwrap().push(stats.clone());
            Ok(())
        }
    }

    fn quotes() -> HashMap<String, f64> {
        [("005930".to_string(), 10_000.0), ("000660".to_string(), 20_000.0)]
            .into_iter()
            .collect()
    }

    fn signal(code: &str, mentions: u32, sentiment: f64) -> TradingSignal {
        TradingSignal::new(code, format!("Stock {code}"), "Tech").with_mentions(mentions, sentiment)
    }

    fn agent(
        portfolio: SimulatedPortfolio,
        signals: Result<HashMap<String, TradingSignal>, String>,
        dry_run: bool,
    ) -> (TradingAgent, Arc<RecordingNotifier>, Arc<SimulatedBroker>) {
        let quotes = quotes();
        let broker = Arc::new(SimulatedBroker::from_portfolio(portfolio, move |code: &str| {
            quotes.get(code).copied()
        }));
        let notifier = Arc::new(RecordingNotifier::default());
        let executor = OrderExecutor::new(
            broker.clone(),
            RiskManager::new(RiskConfig::default()),
            dry_run,
        );
        let agent = TradingAgent::new(
            TradingStrategy::new(StrategyConfig::default()),
            executor,
            FixedSignals(signals),
            notifier.clone(),
            5,
        );
        (agent, notifier, broker)
    }

    #[tokio::test]
    async fn test_cycle_buys_on_strong_signal() {
        let signals: HashMap<String, TradingSignal> =
            [("005930".to_string(), signal("005930", 10, 0.8))]
                .into_iter()
                .collect();
        let (mut agent, notifier, broker) =
            agent(SimulatedPortfolio::new(1_000_000.0), Ok(signals), false);

        let summary = agent.run_cycle().await;
        assert!(summary.error.is_none());
        assert_eq!(summary.signals_generated, 1);
        assert_eq!(summary.decisions_made, 1);
        assert_eq!(summary.trades_executed, 1);
        assert_eq!(summary.trades_failed, 0);

        assert!(broker.portfolio().await.quantity_of("005930") > 0);
        assert_eq!(notifier.executions.lock().unwrap().len(), 1);
        let cycles = notifier.cycles.lock().unwrap();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].1);
    }

    #[tokio::test]
    async fn test_cycle_error_is_reported_not_raised() {
        let (mut agent, notifier, _) = agent(
            SimulatedPortfolio::new(1_000_000.0),
            Err("news feed unavailable".to_string()),
            false,
        );

        let summary = agent.run_cycle().await;
        assert_eq!(summary.error.as_deref(), Some("news feed unavailable"));
        assert_eq!(summary.signals_generated, 0);

        let cycles = notifier.cycles.lock().unwrap();
        assert_eq!(cycles.len(), 1);
        assert!(cycles[0].0.error.is_some());
    }

    #[tokio::test]
    async fn test_stop_loss_exit_without_signal_mentions() {
        let today = Local::now().date_naive();
        let mut portfolio = SimulatedPortfolio::new(200_000.0);
        assert!(portfolio.buy("000660", "Stock 000660", 5, 25_000.0, today));

        // held stock is quoted at 20,000: -20% against the average
        let signals: HashMap<String, TradingSignal> =
            [("000660".to_string(), signal("000660", 1, 0.0))]
                .into_iter()
                .collect();
        let (mut agent, notifier, broker) = agent(portfolio, Ok(signals), false);

        let summary = agent.run_cycle().await;
        assert_eq!(summary.trades_executed, 1);
        let executions = notifier.executions.lock().unwrap();
        assert!(executions[0].decision.is_stop_loss());
        assert_eq!(broker.portfolio().await.quantity_of("000660"), 0);

        let stats = agent.executor.risk().daily_stats();
        assert!((stats.realized_pnl - (-25_000.0)).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_dry_run_cycle_reports_no_trades() {
        let signals: HashMap<String, TradingSignal> =
            [("005930".to_string(), signal("005930", 10, 0.8))]
                .into_iter()
                .collect();
        let (mut agent, _notifier, broker) =
            agent(SimulatedPortfolio::new(1_000_000.0), Ok(signals), true);

        let summary = agent.run_cycle().await;
        assert_eq!(summary.trades_executed, 1);
        // dry run leaves the paper account and the risk ledger alone
        assert!(broker.portfolio().await.trade_history().is_empty());
        assert_eq!(agent.daily_report().await.trade_count, 0);
    }

    #[tokio::test]
    async fn test_daily_report_and_reset() {
        let signals: HashMap<String, TradingSignal> =
            [("005930".to_string(), signal("005930", 10, 0.8))]
                .into_iter()
                .collect();
        let (mut agent, notifier, broker) =
            agent(SimulatedPortfolio::new(1_000_000.0), Ok(signals), false);

        agent.run_cycle().await;
        assert_eq!(broker.portfolio().await.trade_history().len(), 1);

        let stats = agent.daily_report().await;
        assert_eq!(stats.trade_count, 1);
        assert_eq!(notifier.reports.lock().unwrap().len(), 1);

        agent.reset_risk_limits();
        let status = agent.status().await;
        assert_eq!(status.daily_stats.trade_count, 0);
        assert!(!status.dry_run);
        assert_eq!(status.broker, "simulated");
        assert!(status.balance.is_some());
    }
}

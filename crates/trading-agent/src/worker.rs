use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::agent::TradingAgent;

const QUEUE_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentCommand {
    RunCycle,
    DailyReport,
    ResetRisk,
    Shutdown,
}

/// Sending side of the agent's command queue.
#[derive(Clone)]
pub struct AgentHandle {
    tx: mpsc::Sender<AgentCommand>,
}

impl AgentHandle {
    pub async fn send(&self, command: AgentCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow::anyhow!("Agent worker has stopped"))
    }
}

/// Move the agent onto its own task. Commands run one at a time in arrival
/// order, so a slow cycle delays later triggers instead of overlapping them.
pub fn spawn_worker(mut agent: TradingAgent) -> (AgentHandle, JoinHandle<TradingAgent>) {
    let (tx, mut rx) = mpsc::channel(QUEUE_CAPACITY);

    let task = tokio::spawn(async move {
        while let Some(command) = rx.recv().await {
            tracing::debug!("Agent command: {:?}", command);
            match command {
                AgentCommand::RunCycle => {
                    agent.run_cycle().await;
                }
                AgentCommand::DailyReport => {
                    agent.daily_report().await;
                }
                AgentCommand::ResetRisk => agent.reset_risk_limits(),
                AgentCommand::Shutdown => {
                    tracing::info!("Agent worker shutting down");
                    break;
                }
            }
        }
        agent
    });

    (AgentHandle { tx }, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    use analysis_core::TradingSignal;
    use async_trait::async_trait;
    use backtest_engine::SimulatedBroker;
    use news_trading::{StrategyConfig, TradingStrategy};
    use risk_manager::{RiskConfig, RiskManager};

    use crate::notifier::LogNotifier;
    use crate::order_executor::OrderExecutor;
    use crate::signals::SignalSource;

    struct OneStock;

    #[async_trait]
    impl SignalSource for OneStock {
        async fn collect(&self) -> Result<HashMap<String, TradingSignal>> {
            let signal = TradingSignal::new("005930", "Samsung", "Tech").with_mentions(10, 0.9);
            Ok([("005930".to_string(), signal)].into_iter().collect())
        }
    }

    fn agent() -> TradingAgent {
        let broker = Arc::new(SimulatedBroker::new(10_000_000.0, |code: &str| {
            (code == "005930").then_some(10_000.0)
        }));
        let executor = OrderExecutor::new(broker, RiskManager::new(RiskConfig::default()), false);
        TradingAgent::new(
            TradingStrategy::new(StrategyConfig::default()),
            executor,
            OneStock,
            Arc::new(LogNotifier),
            5,
        )
    }

    #[tokio::test]
    async fn test_commands_run_in_order() {
        let (handle, task) = spawn_worker(agent());

        handle.send(AgentCommand::RunCycle).await.unwrap();
        handle.send(AgentCommand::RunCycle).await.unwrap();
        handle.send(AgentCommand::Shutdown).await.unwrap();

        let mut agent = task.await.unwrap();
        assert_eq!(agent.status().await.daily_stats.trade_count, 2);
    }

    #[tokio::test]
    async fn test_reset_clears_counters_and_send_after_shutdown_fails() {
        let (handle, task) = spawn_worker(agent());

        handle.send(AgentCommand::RunCycle).await.unwrap();
        handle.send(AgentCommand::ResetRisk).await.unwrap();
        handle.send(AgentCommand::DailyReport).await.unwrap();
        handle.send(AgentCommand::Shutdown).await.unwrap();

        let mut agent = task.await.unwrap();
        assert_eq!(agent.status().await.daily_stats.trade_count, 0);
        assert!(handle.send(AgentCommand::RunCycle).await.is_err());
    }
}

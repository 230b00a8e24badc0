use anyhow::Result;
use serde::Serialize;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

use crate::order_executor::ExecutionResult;

/// One persisted journal row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalEntry {
    pub recorded_at: String,
    pub action: String,
    pub stock_code: String,
    pub quantity: i64,
    pub price: Option<f64>,
    pub success: bool,
    pub order_id: Option<String>,
    pub reason: String,
    pub error_message: Option<String>,
}

type JournalRow = (
    String,
    String,
    String,
    i64,
    Option<f64>,
    i64,
    Option<String>,
    String,
    Option<String>,
);

/// Append-only log of execution results in SQLite.
#[derive(Clone)]
pub struct TradeJournal {
    pool: AnyPool,
}

impl TradeJournal {
    pub async fn connect(database_url: &str) -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;
        let journal = Self::new(pool);
        journal.init_tables().await?;
        Ok(journal)
    }

    pub fn new(pool: AnyPool) -> Self {
        Self { pool }
    }

    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trade_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at TEXT NOT NULL,
                action TEXT NOT NULL,
                stock_code TEXT NOT NULL,
                stock_name TEXT NOT NULL,
                quantity INTEGER NOT NULL,
                price REAL,
                success INTEGER NOT NULL,
                order_id TEXT,
                reason TEXT NOT NULL,
                confidence REAL NOT NULL,
                error_message TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trade_journal_code ON trade_journal(stock_code)")
            .execute(&self.pool)
            .await
            .ok();

        Ok(())
    }

    async fn insert(&self, result: &ExecutionResult) -> Result<()> {
        let decision = &result.decision;
        let order = result.order_result.as_ref();
        let recorded_at = result
            .executed_at
            .unwrap_or_else(chrono::Local::now)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();

        sqlx::query(
            "INSERT INTO trade_journal
                (recorded_at, action, stock_code, stock_name, quantity, price, success,
                 order_id, reason, confidence, error_message)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(recorded_at)
        .bind(decision.action.as_str())
        .bind(&decision.stock_code)
        .bind(&decision.stock_name)
        .bind(decision.quantity as i64)
        .bind(order.and_then(|o| o.price).or(decision.target_price))
        .bind(result.success as i64)
        .bind(order.and_then(|o| o.order_id.clone()))
        .bind(&decision.reason)
        .bind(decision.confidence)
        .bind(result.error_message.clone())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Persist one result. Failures are logged and swallowed.
    pub async fn record(&self, result: &ExecutionResult) {
        if let Err(e) = self.insert(result).await {
            tracing::warn!(
                "Failed to journal {} {}: {}",
                result.decision.action,
                result.decision.stock_code,
                e
            );
        }
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: i64) -> Result<Vec<JournalEntry>> {
        let rows: Vec<JournalRow> = sqlx::query_as(
            "SELECT recorded_at, action, stock_code, quantity, price, success, order_id,
                    reason, error_message
             FROM trade_journal ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(
                    recorded_at,
                    action,
                    stock_code,
                    quantity,
                    price,
                    success,
                    order_id,
                    reason,
                    error_message,
                )| JournalEntry {
                    recorded_at,
                    action,
                    stock_code,
                    quantity,
                    price,
                    success: success != 0,
                    order_id,
                    reason,
                    error_message,
                },
            )
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use broker_trait::OrderResult;
    use news_trading::{TradeAction, TradeDecision};

    async fn journal() -> TradeJournal {
        TradeJournal::connect("sqlite::memory:").await.unwrap()
    }

    fn decision(code: &str) -> TradeDecision {
        TradeDecision {
            action: TradeAction::Buy,
            stock_code: code.to_string(),
            stock_name: code.to_string(),
            quantity: 2,
            reason: "Positive sentiment".to_string(),
            confidence: 0.7,
            target_price: Some(50_000.0),
        }
    }

    #[tokio::test]
    async fn test_record_and_list_recent() {
        let journal = journal().await;

        let d = decision("005930");
        let filled = ExecutionResult {
            success: true,
            order_result: Some(OrderResult::filled(
                "SIM-000001",
                "005930",
                TradeAction::Buy.side(),
                2,
                Some(51_000.0),
            )),
            decision: d.clone(),
            error_message: None,
            executed_at: Some(chrono::Local::now()),
        };
        let rejected = ExecutionResult {
            success: false,
            decision: decision("000660"),
            order_result: None,
            error_message: Some("Daily trade limit reached (10/10)".to_string()),
            executed_at: None,
        };
        journal.record(&filled).await;
        journal.record(&rejected).await;

        let entries = journal.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].stock_code, "000660");
        assert!(!entries[0].success);
        assert_eq!(entries[0].price, Some(50_000.0));
        assert_eq!(
            entries[0].error_message.as_deref(),
            Some("Daily trade limit reached (10/10)")
        );

        assert_eq!(entries[1].action, "buy");
        assert!(entries[1].success);
        assert_eq!(entries[1].price, Some(51_000.0));
        assert_eq!(entries[1].order_id.as_deref(), Some("SIM-000001"));
        assert_eq!(entries[1].quantity, 2);
    }

    #[tokio::test]
    async fn test_recent_respects_limit() {
        let journal = journal().await;
        for code in ["000001", "000002", "000003"] {
            journal
                .record(&ExecutionResult {
                    success: true,
                    decision: decision(code),
                    order_result: None,
                    error_message: None,
                    executed_at: None,
                })
                .await;
        }
        let entries = journal.recent(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].stock_code, "000003");
    }
}

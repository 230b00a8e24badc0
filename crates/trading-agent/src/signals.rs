use std::collections::HashMap;
use std::sync::Arc;

use analysis_core::{AggregationOptions, SignalAggregator, TradingSignal};
use anyhow::Result;
use async_trait::async_trait;
use backtest_engine::{ArticleArchive, ArticleSource};
use chrono::{Local, NaiveDate};

/// Produces the per-cycle signal map consumed by the strategy.
#[async_trait]
pub trait SignalSource: Send + Sync {
    async fn collect(&self) -> Result<HashMap<String, TradingSignal>>;
}

/// Aggregates the articles archived for the current day.
pub struct ArchiveSignalSource {
    archive: ArticleArchive,
    aggregator: Arc<dyn SignalAggregator>,
}

impl ArchiveSignalSource {
    pub fn new(archive: ArticleArchive, aggregator: Arc<dyn SignalAggregator>) -> Self {
        Self {
            archive,
            aggregator,
        }
    }

    pub fn collect_for(&self, date: NaiveDate) -> HashMap<String, TradingSignal> {
        let articles = self.archive.load_articles(date, date);
        tracing::info!("Loaded {} archived articles for {}", articles.len(), date);
        if articles.is_empty() {
            return HashMap::new();
        }
        self.aggregator
            .aggregate(&articles, AggregationOptions::with_trends())
    }
}

#[async_trait]
impl SignalSource for ArchiveSignalSource {
    async fn collect(&self) -> Result<HashMap<String, TradingSignal>> {
        Ok(self.collect_for(Local::now().date_naive()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use analysis_core::{ArchivedArticle, KeywordSignalAggregator, StockMapping};
    use tempfile::TempDir;

    fn article(url: &str, date: NaiveDate, sentiment: f64) -> ArchivedArticle {
        ArchivedArticle {
            source: "wire".to_string(),
            title: "Chip demand".to_string(),
            content: String::new(),
            url: url.to_string(),
            published_at: date.and_hms_opt(9, 0, 0).unwrap(),
            summary: None,
            keywords: vec!["semiconductor".to_string()],
            sentiment_score: sentiment,
        }
    }

    fn source(dir: &TempDir) -> ArchiveSignalSource {
        let aggregator = KeywordSignalAggregator::new(vec![StockMapping {
            stock_code: "005930".to_string(),
            stock_name: "Samsung Electronics".to_string(),
            industry: "Semiconductors".to_string(),
            keywords: vec!["semiconductor".to_string()],
        }]);
        ArchiveSignalSource::new(ArticleArchive::new(dir.path()), Arc::new(aggregator))
    }

    #[test]
    fn test_collect_for_aggregates_only_that_day() {
        let dir = TempDir::new().unwrap();
        let day = NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        let next = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        let archive = ArticleArchive::new(dir.path());
        archive
            .save_articles(&[
                article("https://a/1", day, 0.6),
                article("https://a/2", day, 0.2),
                article("https://a/3", next, -0.9),
            ])
            .unwrap();

        let signals = source(&dir).collect_for(day);
        let signal = &signals["005930"];
        assert_eq!(signal.mentions, 2);
        assert!((signal.avg_sentiment() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_archive_yields_no_signals() {
        let dir = TempDir::new().unwrap();
        let signals = source(&dir).collect().await.unwrap();
        assert!(signals.is_empty());
    }
}

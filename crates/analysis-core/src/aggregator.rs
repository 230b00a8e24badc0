use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::{AggregationOptions, AnalysisError, ArchivedArticle, SignalAggregator, StockMapping, TradingSignal};

/// Keywords from each article that are carried onto the stock's signal.
const KEYWORDS_PER_ARTICLE: usize = 5;

#[derive(Debug, Deserialize)]
struct MappingFile {
    #[serde(default)]
    stocks: Vec<StockMapping>,
}

/// Maps article keywords to stocks through a static keyword index and sums
/// mention-weighted sentiment per stock.
pub struct KeywordSignalAggregator {
    stocks: Vec<StockMapping>,
    /// lowercase keyword -> indices into `stocks`
    index: HashMap<String, Vec<usize>>,
}

impl KeywordSignalAggregator {
    pub fn new(stocks: Vec<StockMapping>) -> Self {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, stock) in stocks.iter().enumerate() {
            let names = stock
                .keywords
                .iter()
                .map(String::as_str)
                .chain(std::iter::once(stock.stock_name.as_str()));
            for keyword in names {
                let key = keyword.trim().to_lowercase();
                if key.is_empty() {
                    continue;
                }
                let entry = index.entry(key).or_default();
                if !entry.contains(&i) {
                    entry.push(i);
                }
            }
        }

        tracing::debug!(
            "Keyword index built: {} stocks, {} keywords",
            stocks.len(),
            index.len()
        );

        Self { stocks, index }
    }

    /// Load mappings from a JSON file shaped as `{"stocks": [...]}`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| AnalysisError::MappingLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let file: MappingFile =
            serde_json::from_str(&raw).map_err(|e| AnalysisError::MappingLoad {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::new(file.stocks))
    }

    pub fn stock_count(&self) -> usize {
        self.stocks.len()
    }

    pub fn stocks(&self) -> &[StockMapping] {
        &self.stocks
    }

    /// Stocks related to `keywords` with their match counts, highest first.
    ///
    /// An exact (case-insensitive) hit counts once per indexed stock. A keyword
    /// with no exact hit falls back to substring containment in either direction.
    pub fn find_stocks(&self, keywords: &[String]) -> Vec<(&StockMapping, u32)> {
        let mut counts: HashMap<usize, u32> = HashMap::new();

        for keyword in keywords {
            let key = keyword.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }

            if let Some(hits) = self.index.get(&key) {
                for &i in hits {
                    *counts.entry(i).or_insert(0) += 1;
                }
                continue;
            }

            for (indexed, hits) in &self.index {
                if indexed.contains(&key) || key.contains(indexed.as_str()) {
                    for &i in hits {
                        *counts.entry(i).or_insert(0) += 1;
                    }
                }
            }
        }

        let mut matches: Vec<(&StockMapping, u32)> = counts
            .into_iter()
            .map(|(i, count)| (&self.stocks[i], count))
            .collect();
        matches.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.stock_code.cmp(&b.0.stock_code))
        });
        matches
    }
}

impl SignalAggregator for KeywordSignalAggregator {
    fn aggregate(
        &self,
        articles: &[ArchivedArticle],
        options: AggregationOptions,
    ) -> HashMap<String, TradingSignal> {
        let mut signals: HashMap<String, TradingSignal> = HashMap::new();

        for article in articles {
            for (stock, match_count) in self.find_stocks(&article.keywords) {
                let signal = signals
                    .entry(stock.stock_code.clone())
                    .or_insert_with(|| {
                        TradingSignal::new(&stock.stock_code, &stock.stock_name, &stock.industry)
                    });
                signal.record_mentions(match_count, article.sentiment_score);
                signal
                    .keywords
                    .extend(article.keywords.iter().take(KEYWORDS_PER_ARTICLE).cloned());
            }
        }

        if options.trend_enhancement {
            tracing::debug!("Trend enhancement requested; static keyword index has no trend state");
        }

        tracing::info!(
            "Generated signals for {} stocks from {} articles",
            signals.len(),
            articles.len()
        );
        signals
    }
}

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};

/// Aggregated news signal for one stock within a single analysis cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradingSignal {
    pub stock_code: String,
    pub stock_name: String,
    #[serde(default)]
    pub industry: String,
    pub mentions: u32,
    pub sentiment_sum: f64,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
}

impl TradingSignal {
    pub fn new(
        stock_code: impl Into<String>,
        stock_name: impl Into<String>,
        industry: impl Into<String>,
    ) -> Self {
        Self {
            stock_code: stock_code.into(),
            stock_name: stock_name.into(),
            industry: industry.into(),
            ..Default::default()
        }
    }

    /// Set mention count and an average sentiment in one step.
    pub fn with_mentions(mut self, mentions: u32, avg_sentiment: f64) -> Self {
        self.mentions = mentions;
        self.sentiment_sum = avg_sentiment * mentions as f64;
        self
    }

    /// Add `count` mentions that all carry the same sentiment score.
    pub fn record_mentions(&mut self, count: u32, sentiment: f64) {
        self.mentions += count;
        self.sentiment_sum += sentiment * count as f64;
    }

    pub fn avg_sentiment(&self) -> f64 {
        if self.mentions == 0 {
            return 0.0;
        }
        self.sentiment_sum / self.mentions as f64
    }

    /// Mention-volume confidence, saturating at ten mentions.
    pub fn mention_score(&self) -> f64 {
        (self.mentions as f64 / 10.0).min(1.0)
    }

    /// Composite ranking score in [0, 1]: half mention volume, half
    /// sentiment rescaled from [-1, 1].
    pub fn signal_strength(&self) -> f64 {
        let sentiment_score = (self.avg_sentiment() + 1.0) / 2.0;
        self.mention_score() * 0.5 + sentiment_score * 0.5
    }
}

/// A collected news article with its extracted keywords and sentiment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedArticle {
    pub source: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    pub url: String,
    /// Publication time in the exchange's local time.
    #[serde(deserialize_with = "deserialize_published_at")]
    pub published_at: NaiveDateTime,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub sentiment_score: f64,
}

impl ArchivedArticle {
    pub fn published_date(&self) -> NaiveDate {
        self.published_at.date()
    }
}

impl PartialEq for ArchivedArticle {
    fn eq(&self, other: &Self) -> bool {
        self.url == other.url
    }
}

/// Parse a publish timestamp with or without a UTC offset. Offsets are
/// dropped: the wall-clock time is what decides the trading day.
pub fn parse_published_at(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .ok()
}

fn deserialize_published_at<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    parse_published_at(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid published_at: {raw}")))
}

/// Static keyword to stock mapping entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockMapping {
    pub stock_code: String,
    pub stock_name: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub keywords: Vec<String>,
}

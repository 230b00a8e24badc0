use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::BacktestError;

/// Days fetched before the first missing date, to cover holidays.
const FETCH_LEAD_DAYS: i64 = 5;
/// How far back `get_price_on_date` looks for the nearest trading day.
const LOOKBACK_DAYS: i64 = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OhlcvBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Daily bars for one stock keyed by trading date.
pub type PriceSeries = BTreeMap<NaiveDate, OhlcvBar>;

/// Upstream source of historical daily bars (market data vendor, CSV dump, ...).
pub trait OhlcvSource: Send + Sync {
    fn fetch(&self, stock_code: &str, start: NaiveDate, end: NaiveDate)
        -> anyhow::Result<PriceSeries>;
}

#[derive(Default)]
struct StockCache {
    bars: PriceSeries,
    /// Dates already requested from the source, so gaps (weekends, holidays)
    /// are not refetched on every lookup.
    attempted: HashSet<NaiveDate>,
}

/// Historical close prices backed by one JSON cache file per stock.
pub struct PriceDataProvider {
    cache_dir: PathBuf,
    source: Option<Box<dyn OhlcvSource>>,
    stocks: Mutex<HashMap<String, StockCache>>,
}

impl PriceDataProvider {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            source: None,
            stocks: Mutex::new(HashMap::new()),
        }
    }

    /// Fill cache gaps from `source`.
    pub fn with_source(mut self, source: impl OhlcvSource + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache_path(&self, stock_code: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", stock_code))
    }

    fn stocks(&self) -> MutexGuard<'_, HashMap<String, StockCache>> {
        self.stocks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_cache_file(&self, stock_code: &str) -> Result<PriceSeries, BacktestError> {
        let path = self.cache_path(stock_code);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(PriceSeries::new()),
            Err(e) => return Err(BacktestError::io(path, e)),
        };
        serde_json::from_str(&raw).map_err(|e| BacktestError::json(path, e))
    }

    fn write_cache_file(&self, stock_code: &str, bars: &PriceSeries) -> Result<(), BacktestError> {
        std::fs::create_dir_all(&self.cache_dir)
            .map_err(|e| BacktestError::io(&self.cache_dir, e))?;
        let path = self.cache_path(stock_code);
        let json = serde_json::to_string(bars).map_err(|e| BacktestError::json(&path, e))?;
        std::fs::write(&path, json).map_err(|e| BacktestError::io(path, e))
    }

    fn load_stock(&self, stock_code: &str) -> StockCache {
        let bars = self.read_cache_file(stock_code).unwrap_or_else(|e| {
            tracing::warn!("Ignoring unreadable price cache for {}: {}", stock_code, e);
            PriceSeries::new()
        });
        StockCache {
            bars,
            attempted: HashSet::new(),
        }
    }

    /// Daily bars for `stock_code` within `[start, end]`.
    ///
    /// Dates missing from the cache trigger one fetch covering
    /// `[first_missing - 5d, last_missing + 1d]` when a source is configured.
    /// Fetch failures degrade to whatever the cache already holds.
    pub fn get_prices(&self, stock_code: &str, start: NaiveDate, end: NaiveDate) -> PriceSeries {
        if start > end {
            return PriceSeries::new();
        }

        let mut stocks = self.stocks();
        let cache = stocks
            .entry(stock_code.to_string())
            .or_insert_with(|| self.load_stock(stock_code));

        if let Some(source) = &self.source {
            let missing: Vec<NaiveDate> = days_between(start, end)
                .filter(|d| !cache.bars.contains_key(d) && !cache.attempted.contains(d))
                .collect();

            if let (Some(first), Some(last)) = (missing.first(), missing.last()) {
                let from = *first - Duration::days(FETCH_LEAD_DAYS);
                let to = *last + Duration::days(1);
                cache.attempted.extend(days_between(from, to));

                match source.fetch(stock_code, from, to) {
                    Ok(bars) if bars.is_empty() => {
                        tracing::warn!("No price data for {} ({} ~ {})", stock_code, from, to);
                    }
                    Ok(bars) => {
                        let fetched = bars.len();
                        cache.bars.extend(bars);
                        if let Err(e) = self.write_cache_file(stock_code, &cache.bars) {
                            tracing::warn!("Failed to persist price cache for {}: {}", stock_code, e);
                        }
                        tracing::info!(
                            "Fetched {} price records for {} ({} ~ {})",
                            fetched,
                            stock_code,
                            from,
                            to
                        );
                    }
                    Err(e) => {
                        tracing::warn!("Failed to fetch price data for {}: {}", stock_code, e);
                    }
                }
            }
        }

        cache
            .bars
            .range(start..=end)
            .map(|(date, bar)| (*date, *bar))
            .collect()
    }

    /// Close on `date`, or on the nearest earlier day within a week.
    pub fn get_price_on_date(&self, stock_code: &str, date: NaiveDate) -> Option<f64> {
        for back in 0..LOOKBACK_DAYS {
            let day = date - Duration::days(back);
            if let Some(bar) = self.get_prices(stock_code, day, day).get(&day) {
                return Some(bar.close);
            }
        }
        tracing::warn!("No price found for {} near {}", stock_code, date);
        None
    }

    /// Merge bars into the cache and persist them.
    pub fn store_prices(&self, stock_code: &str, bars: PriceSeries) -> Result<(), BacktestError> {
        let mut stocks = self.stocks();
        let cache = stocks
            .entry(stock_code.to_string())
            .or_insert_with(|| self.load_stock(stock_code));
        cache.bars.extend(bars);
        self.write_cache_file(stock_code, &cache.bars)
    }
}

/// Every calendar day in `[start, end]`.
pub(crate) fn days_between(start: NaiveDate, end: NaiveDate) -> impl Iterator<Item = NaiveDate> {
    start.iter_days().take_while(move |d| *d <= end)
}

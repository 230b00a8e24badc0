use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use analysis_core::{AggregationOptions, ArchivedArticle, SignalAggregator};
use broker_trait::OrderResult;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};
use news_trading::{TradeAction, TradeDecision, TradingStrategy};
use risk_manager::{Clock, RiskConfig, RiskManager};
use serde::{Deserialize, Serialize};

use crate::archive::ArticleSource;
use crate::error::BacktestError;
use crate::portfolio::SimulatedPortfolio;
use crate::price_data::{days_between, PriceDataProvider};
use crate::report::BacktestReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestOptions {
    pub initial_cash: f64,
    pub max_decisions: usize,
    /// Gate fills through a `RiskManager` as the live path does. Off by
    /// default: replay applies strategy rules only, with no daily trade
    /// count or loss limit.
    pub apply_risk_limits: bool,
    pub risk: RiskConfig,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            initial_cash: 500_000.0,
            max_decisions: 5,
            apply_risk_limits: false,
            risk: RiskConfig::default(),
        }
    }
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Saturday and Sunday roll forward to Monday.
fn next_trading_day(mut date: NaiveDate) -> NaiveDate {
    while is_weekend(date) {
        date += Duration::days(1);
    }
    date
}

/// Clock pinned to the simulated day, for risk gating during replay.
struct ReplayClock(Mutex<NaiveDateTime>);

impl ReplayClock {
    fn new(date: NaiveDate) -> Self {
        Self(Mutex::new(date.and_time(NaiveTime::MIN)))
    }

    fn set_date(&self, date: NaiveDate) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = date.and_time(NaiveTime::MIN);
    }
}

impl Clock for ReplayClock {
    fn now(&self) -> NaiveDateTime {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Replays archived articles day by day against historical closes.
pub struct BacktestEngine {
    strategy: TradingStrategy,
    aggregator: Box<dyn SignalAggregator>,
    articles: Box<dyn ArticleSource>,
    prices: Arc<PriceDataProvider>,
    options: BacktestOptions,
}

impl BacktestEngine {
    pub fn new(
        strategy: TradingStrategy,
        aggregator: impl SignalAggregator + 'static,
        articles: impl ArticleSource + 'static,
        prices: Arc<PriceDataProvider>,
        options: BacktestOptions,
    ) -> Self {
        Self {
            strategy,
            aggregator: Box::new(aggregator),
            articles: Box::new(articles),
            prices,
            options,
        }
    }

    pub fn options(&self) -> &BacktestOptions {
        &self.options
    }

    /// Run the replay over `[start, end]`. Articles published on a weekend are
    /// traded on the following Monday, and the range is extended to that
    /// Monday when `end` falls on a weekend.
    pub fn run(&self, start: NaiveDate, end: NaiveDate) -> Result<BacktestReport, BacktestError> {
        if start > end {
            return Err(BacktestError::InvalidRange { start, end });
        }

        tracing::info!("Starting backtest: {} ~ {}", start, end);
        tracing::info!("Initial cash: {:.0} KRW", self.options.initial_cash);

        let mut portfolio = SimulatedPortfolio::new(self.options.initial_cash);

        let articles = self.articles.load_articles(start, end);
        if articles.is_empty() {
            tracing::warn!("No archived articles found for {} ~ {}", start, end);
            return Ok(BacktestReport::new(start, end, portfolio));
        }

        let mut by_day: BTreeMap<NaiveDate, Vec<ArchivedArticle>> = BTreeMap::new();
        for article in articles {
            by_day
                .entry(next_trading_day(article.published_date()))
                .or_default()
                .push(article);
        }

        let effective_end = next_trading_day(end);
        let clock = Arc::new(ReplayClock::new(start));
        let mut risk = self
            .options
            .apply_risk_limits
            .then(|| RiskManager::with_clock(self.options.risk.clone(), clock.clone()));

        let mut days_processed = 0;
        for date in days_between(start, effective_end) {
            if !is_weekend(date) {
                if let Some(day_articles) = by_day.get(&date) {
                    clock.set_date(date);
                    self.process_day(&mut portfolio, risk.as_mut(), date, day_articles);
                    days_processed += 1;
                }
            }

            let prices = &self.prices;
            portfolio.record_daily_value(date, move |code: &str| {
                prices.get_price_on_date(code, date)
            });
        }

        tracing::info!("Backtest complete: {} trading days processed", days_processed);
        Ok(BacktestReport::new(start, end, portfolio))
    }

    fn process_day(
        &self,
        portfolio: &mut SimulatedPortfolio,
        mut risk: Option<&mut RiskManager>,
        date: NaiveDate,
        articles: &[ArchivedArticle],
    ) -> usize {
        tracing::debug!("[{}] Processing {} articles", date, articles.len());

        // Trend state would leak information from later days.
        let signals = self
            .aggregator
            .aggregate(articles, AggregationOptions::static_only());
        if signals.is_empty() {
            return 0;
        }

        let price_of = |code: &str| self.prices.get_price_on_date(code, date);
        let balance = portfolio.to_account_balance(&price_of);

        if let Some(risk) = risk.as_deref_mut() {
            if risk.initial_portfolio_value().is_none() {
                risk.set_initial_portfolio_value(balance.total_eval_amount);
            }
        }

        let decisions = self.strategy.evaluate_batch(
            &signals,
            &balance.holdings,
            &balance,
            &price_of,
            self.options.max_decisions,
        );

        let mut filled = 0;
        for decision in decisions.iter().filter(|d| self.strategy.should_execute(d)) {
            let Some(price) = price_of(decision.stock_code.as_str()).filter(|p| *p > 0.0) else {
                tracing::debug!("[{}] No price for {}, skipping", date, decision.stock_code);
                continue;
            };

            if let Some(risk) = risk.as_deref_mut() {
                let check = risk.validate_order(decision, &portfolio.to_account_balance(&price_of));
                if !check.allowed {
                    tracing::info!(
                        "[{}] Risk rejected {} {}: {}",
                        date,
                        decision.action,
                        decision.stock_code,
                        check.reason
                    );
                    continue;
                }
            }

            let avg_before = portfolio.avg_price_of(&decision.stock_code);
            if !apply(portfolio, decision, price, date) {
                continue;
            }
            filled += 1;
            tracing::info!(
                "[{}] {} {} x{} @ {:.0}",
                date,
                decision.action,
                decision.stock_name,
                decision.quantity,
                price
            );

            if let Some(risk) = risk.as_deref_mut() {
                let realized_pnl = match decision.action {
                    TradeAction::Sell => {
                        avg_before.map(|avg| (price - avg) * decision.quantity as f64)
                    }
                    TradeAction::Buy => None,
                };
                let order = OrderResult {
                    executed_at: None,
                    ..OrderResult::filled(
                        format!("BT-{}-{}", date.format("%Y%m%d"), filled),
                        decision.stock_code.as_str(),
                        decision.action.side(),
                        decision.quantity,
                        Some(price),
                    )
                };
                risk.record_trade(decision, &order, realized_pnl);
            }
        }
        filled
    }
}

fn apply(portfolio: &mut SimulatedPortfolio, decision: &TradeDecision, price: f64, date: NaiveDate) -> bool {
    match decision.action {
        TradeAction::Buy => portfolio.buy(
            &decision.stock_code,
            &decision.stock_name,
            decision.quantity,
            price,
            date,
        ),
        TradeAction::Sell => portfolio.sell(&decision.stock_code, decision.quantity, price, date),
    }
}

use std::env;
use std::str::FromStr;

use anyhow::{Context, Result};
use backtest_engine::BacktestOptions;
use chrono::NaiveTime;
use chrono_tz::Tz;
use news_trading::StrategyConfig;
use risk_manager::RiskConfig;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    // Strategy
    pub strategy: StrategyConfig,
    pub max_decisions: usize, // 5

    // Risk limits
    pub risk: RiskConfig,

    // Execution
    pub dry_run: bool, // true

    // Data locations
    pub price_cache_dir: String,
    pub article_archive_dir: String,
    pub stock_mapping_file: String,
    pub database_url: String,

    // Paper account / backtest starting cash
    pub initial_cash: f64, // 500,000 KRW

    // Schedule (weekdays only)
    pub timezone: Tz,
    pub analysis_times: Vec<NaiveTime>,
    pub daily_report_time: NaiveTime,
    pub risk_reset_time: NaiveTime,
}

fn env_parse<T>(key: &str, default: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .trim()
        .parse()
        .with_context(|| format!("Invalid value for {}", key))
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{}', expected HH:MM", raw))
}

fn env_time(key: &str, default: &str) -> Result<NaiveTime> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    parse_time(&raw).with_context(|| format!("Invalid value for {}", key))
}

impl AgentConfig {
    /// Read settings from the environment (after loading `.env`), falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let strategy = StrategyConfig {
            max_single_trade_ratio: env_parse("MAX_SINGLE_TRADE_RATIO", "0.1")?,
            split_count: env_parse("SPLIT_COUNT", "3")?,
            stop_loss_rate: env_parse("STOP_LOSS_RATE", "-0.05")?,
            take_profit_rate: env_parse("TAKE_PROFIT_RATE", "0.10")?,
            max_holding_ratio: env_parse("MAX_HOLDING_RATIO", "0.2")?,
            buy_threshold: env_parse("BUY_THRESHOLD", "0.3")?,
            sell_threshold: env_parse("SELL_THRESHOLD", "-0.2")?,
            min_mentions: env_parse("MIN_MENTIONS", "3")?,
        };

        let risk = RiskConfig {
            daily_loss_limit: env_parse("DAILY_LOSS_LIMIT", "-0.03")?,
            max_trades_per_day: env_parse("MAX_TRADES_PER_DAY", "10")?,
            max_single_trade_ratio: strategy.max_single_trade_ratio,
            fallback_unit_price: env_parse("FALLBACK_UNIT_PRICE", "100000")?,
        };

        let tz_name = env::var("SCHEDULE_TIMEZONE").unwrap_or_else(|_| "Asia/Seoul".to_string());
        let timezone: Tz = tz_name
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid SCHEDULE_TIMEZONE '{}': {}", tz_name, e))?;

        let analysis_times = env::var("ANALYSIS_TIMES")
            .unwrap_or_else(|_| "08:30,11:00,14:00".to_string())
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .map(parse_time)
            .collect::<Result<Vec<_>>>()
            .context("Invalid value for ANALYSIS_TIMES")?;

        let config = Self {
            strategy,
            max_decisions: env_parse("MAX_DECISIONS", "5")?,
            risk,
            dry_run: env_parse("DRY_RUN", "true")?,

            price_cache_dir: env::var("PRICE_CACHE_DIR")
                .unwrap_or_else(|_| "./data/price_cache".to_string()),
            article_archive_dir: env::var("ARTICLE_ARCHIVE_DIR")
                .unwrap_or_else(|_| "./data/article_archive".to_string()),
            stock_mapping_file: env::var("STOCK_MAPPING_FILE")
                .unwrap_or_else(|_| "./config/stock_mapping.json".to_string()),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:trading.db?mode=rwc".to_string()),

            initial_cash: env_parse("INITIAL_CASH", "500000")?,

            timezone,
            analysis_times,
            daily_report_time: env_time("DAILY_REPORT_TIME", "15:40")?,
            risk_reset_time: env_time("RISK_RESET_TIME", "08:00")?,
        };

        Ok(config)
    }

    pub fn backtest_options(&self, initial_cash: Option<f64>) -> BacktestOptions {
        BacktestOptions {
            initial_cash: initial_cash.unwrap_or(self.initial_cash),
            max_decisions: self.max_decisions,
            apply_risk_limits: false,
            risk: self.risk.clone(),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use analysis_core::KeywordSignalAggregator;
use anyhow::{bail, Context, Result};
use backtest_engine::{ArticleArchive, BacktestEngine, PriceDataProvider, SimulatedBroker};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use news_trading::TradingStrategy;
use risk_manager::RiskManager;

mod agent;
mod config;
mod journal;
mod notifier;
mod order_executor;
mod scheduler;
mod signals;
mod worker;

use agent::TradingAgent;
use config::AgentConfig;
use journal::TradeJournal;
use notifier::LogNotifier;
use order_executor::OrderExecutor;
use scheduler::Scheduler;
use signals::ArchiveSignalSource;

const SCHEDULER_TICK: Duration = Duration::from_secs(20);

#[derive(Parser)]
#[command(name = "trading-agent", about = "News-sentiment trading agent and backtester")]
struct Cli {
    /// Submit orders to the broker instead of simulating fills.
    #[arg(long, global = true, default_value_t = false)]
    live: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run scheduled analysis cycles until Ctrl-C.
    Daemon,
    /// Run a single analysis cycle and exit.
    Once,
    /// Print account balance and today's risk counters.
    Status,
    /// Replay archived articles against cached prices.
    Backtest {
        /// First day (YYYY-MM-DD).
        #[arg(long)]
        start: NaiveDate,

        /// Last day (YYYY-MM-DD).
        #[arg(long)]
        end: NaiveDate,

        /// Starting cash. Defaults to INITIAL_CASH.
        #[arg(long)]
        initial_cash: Option<f64>,

        /// Print the structured export instead of the text summary.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn init_tracing() {
    let filter = || {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    let json_logging = std::env::var("RUST_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt().json().with_env_filter(filter()).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter()).init();
    }

    // Panic hook: log panic info before crashing
    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();
    let mut config = AgentConfig::from_env()?;
    if cli.live {
        config.dry_run = false;
    }

    match cli.command {
        Commands::Daemon => run_daemon(config).await,
        Commands::Once => {
            let mut agent = build_agent(&config).await?;
            let summary = agent.run_cycle().await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Commands::Status => {
            let mut agent = build_agent(&config).await?;
            let status = agent.status().await;
            println!("{}", serde_json::to_string_pretty(&status)?);

            let journal = TradeJournal::connect(&config.database_url).await?;
            let recent = journal.recent(10).await?;
            println!("{}", serde_json::to_string_pretty(&recent)?);
            Ok(())
        }
        Commands::Backtest {
            start,
            end,
            initial_cash,
            json,
        } => run_backtest(&config, start, end, initial_cash, json),
    }
}

fn load_aggregator(config: &AgentConfig) -> Result<KeywordSignalAggregator> {
    let aggregator = KeywordSignalAggregator::from_json_file(&config.stock_mapping_file)
        .context("Failed to load stock mapping")?;
    tracing::info!("Loaded {} stock mappings", aggregator.stock_count());
    Ok(aggregator)
}

async fn build_agent(config: &AgentConfig) -> Result<TradingAgent> {
    tracing::info!("Configuration loaded");
    tracing::info!("  Dry run: {}", config.dry_run);
    tracing::info!(
        "  Buy threshold: {:.2} | Sell threshold: {:.2} | Min mentions: {}",
        config.strategy.buy_threshold,
        config.strategy.sell_threshold,
        config.strategy.min_mentions
    );
    tracing::info!(
        "  Daily loss limit: {:.1}% | Max trades/day: {}",
        config.risk.daily_loss_limit * 100.0,
        config.risk.max_trades_per_day
    );

    let aggregator = load_aggregator(config)?;
    let names: Vec<(String, String)> = aggregator
        .stocks()
        .iter()
        .map(|s| (s.stock_code.clone(), s.stock_name.clone()))
        .collect();
    let signals = ArchiveSignalSource::new(
        ArticleArchive::new(&config.article_archive_dir),
        Arc::new(aggregator),
    );

    // No brokerage is wired in: orders fill on a paper account at today's
    // cached close.
    let prices = Arc::new(PriceDataProvider::new(&config.price_cache_dir));
    let broker = Arc::new(SimulatedBroker::new(config.initial_cash, move |code: &str| {
        prices.get_price_on_date(code, Local::now().date_naive())
    })
    .with_stock_names(names));
    if !config.dry_run {
        tracing::warn!("Live mode: orders are sent to the paper account");
    }

    let executor = OrderExecutor::new(
        broker,
        RiskManager::new(config.risk.clone()),
        config.dry_run,
    );

    let mut agent = TradingAgent::new(
        TradingStrategy::new(config.strategy.clone()),
        executor,
        signals,
        Arc::new(LogNotifier),
        config.max_decisions,
    );

    match TradeJournal::connect(&config.database_url).await {
        Ok(journal) => {
            tracing::info!("Trade journal ready ({})", config.database_url);
            agent = agent.with_journal(journal);
        }
        Err(e) => tracing::warn!("Trade journal disabled: {}", e),
    }

    Ok(agent)
}

async fn run_daemon(config: AgentConfig) -> Result<()> {
    tracing::info!("Starting news trading agent");

    let agent = build_agent(&config).await?;
    let scheduler = Scheduler::from_config(&config);
    let (handle, task) = worker::spawn_worker(agent);

    tracing::info!("Agent is now running. Press Ctrl+C to stop.");
    scheduler.run(handle, SCHEDULER_TICK).await?;

    task.await.context("Agent worker panicked")?;
    tracing::info!("Trading agent shut down.");
    Ok(())
}

fn run_backtest(
    config: &AgentConfig,
    start: NaiveDate,
    end: NaiveDate,
    initial_cash: Option<f64>,
    json: bool,
) -> Result<()> {
    if start > end {
        bail!("--start {} is after --end {}", start, end);
    }

    let engine = BacktestEngine::new(
        TradingStrategy::new(config.strategy.clone()),
        load_aggregator(config)?,
        ArticleArchive::new(&config.article_archive_dir),
        Arc::new(PriceDataProvider::new(&config.price_cache_dir)),
        config.backtest_options(initial_cash),
    );
    let report = engine.run(start, end)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.to_export())?);
    } else {
        println!("{}", report.summary());
    }
    Ok(())
}

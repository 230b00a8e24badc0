use std::collections::HashMap;
use std::fmt::Write as _;

use broker_trait::OrderSide;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::portfolio::SimulatedPortfolio;

const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const RISK_FREE_RATE: f64 = 0.03;
/// Volatility assumed when only one daily return exists.
const SINGLE_RETURN_STD: f64 = 0.001;

/// Results of a finished replay. All metrics are derived on demand from the
/// final ledger.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    portfolio: SimulatedPortfolio,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportedTrade {
    pub date: NaiveDate,
    pub action: OrderSide,
    pub stock_code: String,
    pub stock_name: String,
    pub quantity: u64,
    pub price: f64,
}

/// Machine-readable form of a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestExport {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_cash: f64,
    pub final_value: f64,
    pub total_return_pct: f64,
    pub max_drawdown_pct: f64,
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub total_trades: usize,
    pub buy_count: usize,
    pub sell_count: usize,
    pub remaining_holdings: Vec<String>,
    pub trade_history: Vec<ExportedTrade>,
}

impl BacktestReport {
    pub fn new(start_date: NaiveDate, end_date: NaiveDate, portfolio: SimulatedPortfolio) -> Self {
        Self {
            start_date,
            end_date,
            portfolio,
        }
    }

    pub fn portfolio(&self) -> &SimulatedPortfolio {
        &self.portfolio
    }

    pub fn initial_cash(&self) -> f64 {
        self.portfolio.initial_cash()
    }

    pub fn final_value(&self) -> f64 {
        self.portfolio
            .daily_values()
            .last()
            .map_or(self.initial_cash(), |s| s.total_value)
    }

    pub fn total_return_pct(&self) -> f64 {
        (self.final_value() / self.initial_cash() - 1.0) * 100.0
    }

    pub fn total_trades(&self) -> usize {
        self.portfolio.trade_history().len()
    }

    pub fn buy_count(&self) -> usize {
        self.count_side(OrderSide::Buy)
    }

    pub fn sell_count(&self) -> usize {
        self.count_side(OrderSide::Sell)
    }

    fn count_side(&self, side: OrderSide) -> usize {
        self.portfolio
            .trade_history()
            .iter()
            .filter(|t| t.side == side)
            .count()
    }

    pub fn remaining_holdings(&self) -> Vec<String> {
        self.portfolio.holding_codes()
    }

    /// Most negative decline from the running peak, in percent. The peak
    /// starts at the initial cash.
    pub fn max_drawdown_pct(&self) -> f64 {
        let mut peak = self.initial_cash();
        let mut max_dd = 0.0_f64;
        for snapshot in self.portfolio.daily_values() {
            if snapshot.total_value > peak {
                peak = snapshot.total_value;
            }
            if peak > 0.0 {
                max_dd = max_dd.min((snapshot.total_value - peak) / peak * 100.0);
            }
        }
        max_dd
    }

    /// Percentage of sells priced above the average cost of every buy of
    /// that stock recorded before it. This is a running-average
    /// approximation, not lot matching.
    pub fn win_rate(&self) -> f64 {
        let mut bought: HashMap<&str, (f64, u64)> = HashMap::new();
        let mut sells = 0usize;
        let mut wins = 0usize;

        for trade in self.portfolio.trade_history() {
            match trade.side {
                OrderSide::Buy => {
                    let entry = bought.entry(trade.stock_code.as_str()).or_insert((0.0, 0));
                    entry.0 += trade.price * trade.quantity as f64;
                    entry.1 += trade.quantity;
                }
                OrderSide::Sell => {
                    sells += 1;
                    if let Some((cost, qty)) = bought.get(trade.stock_code.as_str()) {
                        if *qty > 0 && trade.price > cost / *qty as f64 {
                            wins += 1;
                        }
                    }
                }
            }
        }

        if sells == 0 {
            return 0.0;
        }
        wins as f64 / sells as f64 * 100.0
    }

    /// Annualized Sharpe over day-to-day snapshot returns, 3% risk-free.
    pub fn sharpe_ratio(&self) -> f64 {
        let values = self.portfolio.daily_values();
        if values.len() < 2 {
            return 0.0;
        }

        let returns: Vec<f64> = values
            .windows(2)
            .filter(|w| w[0].total_value > 0.0)
            .map(|w| w[1].total_value / w[0].total_value - 1.0)
            .collect();
        if returns.is_empty() {
            return 0.0;
        }

        let mean = returns.iter().copied().mean();
        let std_dev = if returns.len() > 1 {
            returns.iter().copied().std_dev()
        } else {
            SINGLE_RETURN_STD
        };
        if std_dev == 0.0 || std_dev.is_nan() {
            return 0.0;
        }

        (mean * TRADING_DAYS_PER_YEAR - RISK_FREE_RATE) / (std_dev * TRADING_DAYS_PER_YEAR.sqrt())
    }

    pub fn to_export(&self) -> BacktestExport {
        BacktestExport {
            start_date: self.start_date,
            end_date: self.end_date,
            initial_cash: self.initial_cash(),
            final_value: self.final_value(),
            total_return_pct: self.total_return_pct(),
            max_drawdown_pct: self.max_drawdown_pct(),
            sharpe_ratio: self.sharpe_ratio(),
            win_rate: self.win_rate(),
            total_trades: self.total_trades(),
            buy_count: self.buy_count(),
            sell_count: self.sell_count(),
            remaining_holdings: self.remaining_holdings(),
            trade_history: self
                .portfolio
                .trade_history()
                .iter()
                .map(|t| ExportedTrade {
                    date: t.date,
                    action: t.side,
                    stock_code: t.stock_code.clone(),
                    stock_name: t.stock_name.clone(),
                    quantity: t.quantity,
                    price: t.price,
                })
                .collect(),
        }
    }

    /// Human-readable report with the trade list and daily values.
    pub fn summary(&self) -> String {
        let rule = "-".repeat(60);
        let heavy = "=".repeat(60);
        let mut out = String::new();

        let _ = writeln!(out, "{heavy}");
        let _ = writeln!(out, "  BACKTEST REPORT");
        let _ = writeln!(out, "{heavy}");
        let _ = writeln!(out, "  Period:       {} ~ {}", self.start_date, self.end_date);
        let _ = writeln!(out, "  Initial Cash: {:>15} KRW", group_thousands(self.initial_cash()));
        let _ = writeln!(out, "  Final Value:  {:>15} KRW", group_thousands(self.final_value()));
        let _ = writeln!(out);
        let _ = writeln!(out, "  Total Return: {:>+15.2} %", self.total_return_pct());
        let _ = writeln!(out, "  Max Drawdown: {:>15.2} %", self.max_drawdown_pct());
        let _ = writeln!(out, "  Sharpe Ratio: {:>15.2}", self.sharpe_ratio());
        let _ = writeln!(out, "  Win Rate:     {:>15.1} %", self.win_rate());
        let _ = writeln!(out);
        let _ = writeln!(out, "  Total Trades: {:>15}", self.total_trades());
        let _ = writeln!(out, "    - Buy:      {:>15}", self.buy_count());
        let _ = writeln!(out, "    - Sell:     {:>15}", self.sell_count());

        let trades = self.portfolio.trade_history();
        if !trades.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "{rule}");
            let _ = writeln!(
                out,
                "  {:<12} {:<6} {:<14} {:>6} {:>10}",
                "Date", "Action", "Stock", "Qty", "Price"
            );
            let _ = writeln!(out, "{rule}");
            for t in trades {
                let _ = writeln!(
                    out,
                    "  {:<12} {:<6} {:<14} {:>6} {:>10}",
                    t.date.to_string(),
                    t.side.as_str().to_uppercase(),
                    t.stock_name,
                    t.quantity,
                    group_thousands(t.price)
                );
            }
            let _ = writeln!(out, "{rule}");
        }

        let daily = self.portfolio.daily_values();
        if !daily.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "  Daily Portfolio Value:");
            let _ = writeln!(out, "{rule}");
            for snap in daily {
                let bar_len = ((snap.return_pct.abs() * 2.0) as usize).min(20);
                let bar = if snap.return_pct >= 0.0 { "+" } else { "-" }.repeat(bar_len);
                let _ = writeln!(
                    out,
                    "  {}  {:>12} KRW  {:>+7.2}%  {}",
                    snap.date,
                    group_thousands(snap.total_value),
                    snap.return_pct,
                    bar
                );
            }
            let _ = writeln!(out, "{rule}");
        }

        let held = self.remaining_holdings();
        if !held.is_empty() {
            let _ = writeln!(out);
            let _ = writeln!(out, "  Remaining Holdings: {}", held.join(", "));
        }
        let _ = writeln!(out, "{heavy}");
        out
    }
}

/// Round to whole units and insert thousands separators.
fn group_thousands(value: f64) -> String {
    let rounded = value.round() as i64;
    let digits = rounded.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }
    if rounded < 0 {
        grouped.insert(0, '-');
    }
    grouped
}

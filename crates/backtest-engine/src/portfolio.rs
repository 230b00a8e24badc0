use std::collections::BTreeMap;

use broker_trait::{AccountBalance, OrderSide, StockHolding};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One simulated fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioTrade {
    pub date: NaiveDate,
    pub stock_code: String,
    pub stock_name: String,
    pub side: OrderSide,
    pub quantity: u64,
    pub price: f64,
    pub total_amount: f64,
}

/// End-of-day valuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySnapshot {
    pub date: NaiveDate,
    pub total_value: f64,
    pub cash: f64,
    pub stock_value: f64,
    pub return_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct Position {
    name: String,
    quantity: u64,
    avg_price: f64,
}

/// In-memory ledger for one backtest run. Exposes the same `AccountBalance`
/// view a live broker returns.
#[derive(Debug, Clone)]
pub struct SimulatedPortfolio {
    initial_cash: f64,
    cash: f64,
    positions: BTreeMap<String, Position>,
    trades: Vec<PortfolioTrade>,
    daily_values: Vec<DailySnapshot>,
}

impl SimulatedPortfolio {
    pub fn new(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            cash: initial_cash,
            positions: BTreeMap::new(),
            trades: Vec::new(),
            daily_values: Vec::new(),
        }
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn trade_history(&self) -> &[PortfolioTrade] {
        &self.trades
    }

    pub fn daily_values(&self) -> &[DailySnapshot] {
        &self.daily_values
    }

    pub fn holding_codes(&self) -> Vec<String> {
        self.positions.keys().cloned().collect()
    }

    pub fn quantity_of(&self, stock_code: &str) -> u64 {
        self.positions.get(stock_code).map_or(0, |p| p.quantity)
    }

    pub fn avg_price_of(&self, stock_code: &str) -> Option<f64> {
        self.positions.get(stock_code).map(|p| p.avg_price)
    }

    /// Returns false, leaving the ledger untouched, when the quantity is zero
    /// or the cost exceeds available cash.
    pub fn buy(
        &mut self,
        stock_code: &str,
        stock_name: &str,
        quantity: u64,
        price: f64,
        date: NaiveDate,
    ) -> bool {
        let total_cost = quantity as f64 * price;
        if quantity == 0 || total_cost > self.cash {
            return false;
        }

        self.cash -= total_cost;

        match self.positions.get_mut(stock_code) {
            Some(position) => {
                let old_cost = position.quantity as f64 * position.avg_price;
                position.quantity += quantity;
                position.avg_price = (old_cost + total_cost) / position.quantity as f64;
            }
            None => {
                self.positions.insert(
                    stock_code.to_string(),
                    Position {
                        name: stock_name.to_string(),
                        quantity,
                        avg_price: price,
                    },
                );
            }
        }

        self.trades.push(PortfolioTrade {
            date,
            stock_code: stock_code.to_string(),
            stock_name: stock_name.to_string(),
            side: OrderSide::Buy,
            quantity,
            price,
            total_amount: total_cost,
        });
        true
    }

    /// Returns false when nothing is held or `quantity` exceeds the position.
    /// Selling the whole position drops its cost basis.
    pub fn sell(&mut self, stock_code: &str, quantity: u64, price: f64, date: NaiveDate) -> bool {
        let Some(position) = self.positions.get_mut(stock_code) else {
            return false;
        };
        if quantity > position.quantity {
            return false;
        }

        let proceeds = quantity as f64 * price;
        self.cash += proceeds;
        position.quantity -= quantity;
        let stock_name = position.name.clone();
        if position.quantity == 0 {
            self.positions.remove(stock_code);
        }

        self.trades.push(PortfolioTrade {
            date,
            stock_code: stock_code.to_string(),
            stock_name,
            side: OrderSide::Sell,
            quantity,
            price,
            total_amount: proceeds,
        });
        true
    }

    /// Mark holdings to market and append a snapshot. Stocks without a price
    /// contribute nothing to the stock value.
    pub fn record_daily_value<F>(&mut self, date: NaiveDate, price_of: F) -> DailySnapshot
    where
        F: Fn(&str) -> Option<f64>,
    {
        let stock_value: f64 = self
            .positions
            .iter()
            .filter_map(|(code, p)| price_of(code).map(|price| p.quantity as f64 * price))
            .sum();

        let total_value = self.cash + stock_value;
        let snapshot = DailySnapshot {
            date,
            total_value,
            cash: self.cash,
            stock_value,
            return_pct: (total_value / self.initial_cash - 1.0) * 100.0,
        };
        self.daily_values.push(snapshot.clone());
        snapshot
    }

    /// Build the broker-shaped view. A missing price falls back to the
    /// average buy price.
    pub fn to_account_balance<F>(&self, price_of: F) -> AccountBalance
    where
        F: Fn(&str) -> Option<f64>,
    {
        let holdings: Vec<StockHolding> = self
            .positions
            .iter()
            .map(|(code, p)| {
                let current = price_of(code).unwrap_or(p.avg_price);
                StockHolding::marked(code, &p.name, p.quantity, p.avg_price, current)
            })
            .collect();

        let stock_eval: f64 = holdings.iter().map(|h| h.eval_amount).sum();
        let total_profit_loss: f64 = holdings.iter().map(|h| h.profit_loss).sum();
        let total_eval_amount = self.cash + stock_eval;

        AccountBalance {
            cash: self.cash,
            total_eval_amount,
            total_profit_loss,
            total_profit_rate: (total_eval_amount / self.initial_cash - 1.0) * 100.0,
            holdings,
        }
    }
}

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use broker_trait::{AccountBalance, BalanceSource, BrokerClient, OrderResult, OrderSide, StockHolding};
use chrono::Local;
use tokio::sync::Mutex;

use crate::portfolio::SimulatedPortfolio;

type QuoteFn = Box<dyn Fn(&str) -> Option<f64> + Send + Sync>;

/// Paper-trading account: a `SimulatedPortfolio` that fills market orders
/// at whatever the quote function returns.
pub struct SimulatedBroker {
    portfolio: Mutex<SimulatedPortfolio>,
    quote: QuoteFn,
    /// stock code -> display name for new positions
    names: HashMap<String, String>,
    order_seq: AtomicU64,
}

impl SimulatedBroker {
    pub fn new<F>(initial_cash: f64, quote: F) -> Self
    where
        F: Fn(&str) -> Option<f64> + Send + Sync + 'static,
    {
        Self::from_portfolio(SimulatedPortfolio::new(initial_cash), quote)
    }

    pub fn from_portfolio<F>(portfolio: SimulatedPortfolio, quote: F) -> Self
    where
        F: Fn(&str) -> Option<f64> + Send + Sync + 'static,
    {
        Self {
            portfolio: Mutex::new(portfolio),
            quote: Box::new(quote),
            names: HashMap::new(),
            order_seq: AtomicU64::new(1),
        }
    }

    /// Name positions after these `(code, name)` pairs instead of the bare code.
    pub fn with_stock_names<I>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.names.extend(names);
        self
    }

    fn stock_name<'a>(&'a self, stock_code: &'a str) -> &'a str {
        self.names.get(stock_code).map_or(stock_code, String::as_str)
    }

    /// Copy of the underlying ledger.
    pub async fn portfolio(&self) -> SimulatedPortfolio {
        self.portfolio.lock().await.clone()
    }

    fn next_order_id(&self) -> String {
        format!("SIM-{:06}", self.order_seq.fetch_add(1, Ordering::Relaxed))
    }

    fn quote(&self, stock_code: &str) -> Result<f64> {
        match (self.quote)(stock_code) {
            Some(price) if price > 0.0 => Ok(price),
            _ => anyhow::bail!("No price available for {}", stock_code),
        }
    }
}

#[async_trait]
impl BalanceSource for SimulatedBroker {
    async fn get_balance(&self) -> Result<AccountBalance> {
        let portfolio = self.portfolio.lock().await;
        Ok(portfolio.to_account_balance(|code: &str| (self.quote)(code)))
    }

    fn source_name(&self) -> &str {
        "simulated"
    }
}

#[async_trait]
impl BrokerClient for SimulatedBroker {
    async fn get_holding(&self, stock_code: &str) -> Result<Option<StockHolding>> {
        let balance = self.get_balance().await?;
        Ok(balance.holdings.into_iter().find(|h| h.stock_code == stock_code))
    }

    async fn get_current_price(&self, stock_code: &str) -> Result<f64> {
        self.quote(stock_code)
    }

    async fn buy_market(&self, stock_code: &str, quantity: u64) -> Result<OrderResult> {
        let price = self.quote(stock_code)?;
        let today = Local::now().date_naive();

        let mut portfolio = self.portfolio.lock().await;
        let name = self.stock_name(stock_code);
        if !portfolio.buy(stock_code, name, quantity, price, today) {
            return Ok(OrderResult::rejected(
                stock_code,
                OrderSide::Buy,
                quantity,
                format!(
                    "Insufficient cash: need {:.0}, have {:.0}",
                    quantity as f64 * price,
                    portfolio.cash()
                ),
            ));
        }

        tracing::info!("Simulated BUY {} x{} @ {:.0}", stock_code, quantity, price);
        Ok(OrderResult::filled(
            self.next_order_id(),
            stock_code,
            OrderSide::Buy,
            quantity,
            Some(price),
        ))
    }

    async fn sell_market(&self, stock_code: &str, quantity: u64) -> Result<OrderResult> {
        let price = self.quote(stock_code)?;
        let today = Local::now().date_naive();

        let mut portfolio = self.portfolio.lock().await;
        let held = portfolio.quantity_of(stock_code);
        if !portfolio.sell(stock_code, quantity, price, today) {
            return Ok(OrderResult::rejected(
                stock_code,
                OrderSide::Sell,
                quantity,
                format!("Cannot sell {} of {}: holding {}", quantity, stock_code, held),
            ));
        }

        tracing::info!("Simulated SELL {} x{} @ {:.0}", stock_code, quantity, price);
        Ok(OrderResult::filled(
            self.next_order_id(),
            stock_code,
            OrderSide::Sell,
            quantity,
            Some(price),
        ))
    }

    async fn is_market_open(&self) -> Result<bool> {
        Ok(true)
    }

    fn is_paper(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn broker(cash: f64) -> SimulatedBroker {
        let quotes: HashMap<String, f64> =
            [("005930".to_string(), 70_000.0)].into_iter().collect();
        SimulatedBroker::new(cash, move |code: &str| quotes.get(code).copied())
    }

    #[tokio::test]
    async fn test_buy_then_sell_round_trip() {
        let broker = broker(1_000_000.0);

        let buy = broker.buy_market("005930", 3).await.unwrap();
        assert!(buy.success);
        assert_eq!(buy.price, Some(70_000.0));
        assert_eq!(buy.order_id.as_deref(), Some("SIM-000001"));

        let holding = broker.get_holding("005930").await.unwrap().unwrap();
        assert_eq!(holding.quantity, 3);

        let sell = broker.sell_market("005930", 3).await.unwrap();
        assert!(sell.success);
        assert!(broker.get_holding("005930").await.unwrap().is_none());

        let balance = broker.get_balance().await.unwrap();
        assert!((balance.cash - 1_000_000.0).abs() < 1e-9);
        assert_eq!(broker.portfolio().await.trade_history().len(), 2);
    }

    #[tokio::test]
    async fn test_positions_carry_mapped_names() {
        let broker = broker(1_000_000.0)
            .with_stock_names([("005930".to_string(), "Samsung Electronics".to_string())]);

        broker.buy_market("005930", 2).await.unwrap();
        let holding = broker.get_holding("005930").await.unwrap().unwrap();
        assert_eq!(holding.stock_name, "Samsung Electronics");

        broker.sell_market("005930", 1).await.unwrap();
        let portfolio = broker.portfolio().await;
        assert!(portfolio
            .trade_history()
            .iter()
            .all(|t| t.stock_name == "Samsung Electronics"));
    }

    #[tokio::test]
    async fn test_unmapped_code_is_its_own_name() {
        let broker = broker(1_000_000.0);
        broker.buy_market("005930", 1).await.unwrap();
        let holding = broker.get_holding("005930").await.unwrap().unwrap();
        assert_eq!(holding.stock_name, "005930");
    }

    #[tokio::test]
    async fn test_rejections_are_values() {
        let broker = broker(100_000.0);

        let buy = broker.buy_market("005930", 2).await.unwrap();
        assert!(!buy.success);
        assert!(buy.message.unwrap().contains("Insufficient cash"));

        let sell = broker.sell_market("005930", 1).await.unwrap();
        assert!(!sell.success);
    }

    #[tokio::test]
    async fn test_unknown_quote_is_an_error() {
        let broker = broker(100_000.0);
        assert!(broker.get_current_price("999999").await.is_err());
        assert!(broker.buy_market("999999", 1).await.is_err());
        assert!(broker.is_paper());
    }
}

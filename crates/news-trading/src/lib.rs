pub mod decision;
pub mod strategy;

pub use decision::{TradeAction, TradeDecision};
pub use strategy::{PriceLookup, StrategyConfig, TradingStrategy};

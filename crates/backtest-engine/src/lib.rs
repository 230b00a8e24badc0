pub mod archive;
pub mod engine;
pub mod error;
pub mod portfolio;
pub mod price_data;
pub mod report;
pub mod simulated_broker;


pub use archive::{ArticleArchive, ArticleSource};
pub use engine::{BacktestEngine, BacktestOptions};
pub use error::BacktestError;
pub use portfolio::{DailySnapshot, PortfolioTrade, SimulatedPortfolio};
pub use price_data::{OhlcvBar, OhlcvSource, PriceDataProvider, PriceSeries};
pub use report::{BacktestExport, BacktestReport, ExportedTrade};
pub use simulated_broker::SimulatedBroker;

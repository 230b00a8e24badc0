pub mod aggregator;
pub mod error;
pub mod traits;
pub mod types;

pub use aggregator::KeywordSignalAggregator;
pub use error::*;
pub use traits::*;
pub use types::*;

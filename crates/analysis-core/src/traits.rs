use std::collections::HashMap;

use crate::{ArchivedArticle, TradingSignal};

/// Options controlling how article analyses are folded into signals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AggregationOptions {
    /// Boost signals with keywords currently trending across recent cycles.
    ///
    /// Replays must leave this off: trend state accumulated over later days
    /// would leak into earlier simulated days.
    pub trend_enhancement: bool,
}

impl AggregationOptions {
    pub fn static_only() -> Self {
        Self {
            trend_enhancement: false,
        }
    }

    /// Ask for trend boosting. `KeywordSignalAggregator` keeps no trend
    /// state, so it returns the same signals as [`AggregationOptions::static_only`].
    pub fn with_trends() -> Self {
        Self {
            trend_enhancement: true,
        }
    }
}

/// Turns a batch of analysed articles into one signal per stock code.
pub trait SignalAggregator: Send + Sync {
    fn aggregate(
        &self,
        articles: &[ArchivedArticle],
        options: AggregationOptions,
    ) -> HashMap<String, TradingSignal>;
}

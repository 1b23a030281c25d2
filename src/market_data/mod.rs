// =============================================================================
// Market data source contract
// =============================================================================
//
// The scanner only depends on this trait. The production implementation is
// `binance::client::BinanceClient`; tests plug in scripted fakes.
// =============================================================================

use async_trait::async_trait;

use crate::error::SourceError;
use crate::types::PriceBar;

/// Provider of bar history and of the tradable symbol universe.
#[async_trait]
pub trait MarketDataSource: Send + Sync {
    /// Every symbol currently tradable, in the provider's order.
    async fn list_tradable_symbols(&self) -> Result<Vec<String>, SourceError>;

    /// The most recent `limit` bars for `symbol` at `interval`, oldest first.
    /// `interval` is passed through verbatim.
    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<PriceBar>, SourceError>;
}

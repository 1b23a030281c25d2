// =============================================================================
// Binance REST API Client — public market data
// =============================================================================
//
// Only unsigned endpoints are used: `exchangeInfo` for the tradable universe
// and `klines` for bar history. Request weight is checked against the
// `RateLimitTracker` before every call and refreshed from the response
// headers afterwards.
//
// Error mapping:
//   - Binance code -1121 ("Invalid symbol.")      => SourceError::SymbolUnknown
//   - transport / non-2xx / malformed body        => SourceError::Unavailable
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::binance::rate_limit::RateLimitTracker;
use crate::error::SourceError;
use crate::market_data::MarketDataSource;
use crate::runtime_config::RuntimeConfig;
use crate::types::PriceBar;

/// Binance error code for an unknown trading pair.
const INVALID_SYMBOL_CODE: i64 = -1121;

const KLINES_WEIGHT: u32 = 2;
const EXCHANGE_INFO_WEIGHT: u32 = 20;

/// Binance REST API client for public market data.
#[derive(Clone)]
pub struct BinanceClient {
    base_url: String,
    quote_asset: String,
    pinned_symbols: Vec<String>,
    client: reqwest::Client,
    rate_limit: Arc<RateLimitTracker>,
}

impl BinanceClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a client from the runtime configuration.
    ///
    /// When `config.symbols` is non-empty the universe is pinned to that list
    /// and `exchangeInfo` is never queried.
    pub fn new(config: &RuntimeConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .context("failed to build reqwest client")?;

        debug!(base_url = %config.binance_base_url, "BinanceClient initialised");

        Ok(Self {
            base_url: config.binance_base_url.trim_end_matches('/').to_string(),
            quote_asset: config.quote_asset.to_uppercase(),
            pinned_symbols: config.symbols.clone(),
            client,
            rate_limit: Arc::new(RateLimitTracker::new()),
        })
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/klines.
    #[instrument(skip(self), name = "binance::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<PriceBar>, SourceError> {
        let limit = limit.to_string();
        let query = [("symbol", symbol), ("interval", interval), ("limit", limit.as_str())];
        let body = self.get_json("/api/v3/klines", &query, KLINES_WEIGHT).await?;

        let bars = parse_klines(&body).map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;
        debug!(symbol, interval, count = bars.len(), "klines fetched");
        Ok(bars)
    }

    /// GET /api/v3/exchangeInfo, keeping symbols that are trading against the
    /// configured quote asset.
    #[instrument(skip(self), name = "binance::get_tradable_symbols")]
    pub async fn get_tradable_symbols(&self) -> Result<Vec<String>, SourceError> {
        if !self.pinned_symbols.is_empty() {
            return Ok(self.pinned_symbols.clone());
        }

        let body = self.get_json("/api/v3/exchangeInfo", &[], EXCHANGE_INFO_WEIGHT).await?;
        let symbols = parse_tradable_symbols(&body, &self.quote_asset)
            .map_err(|e| SourceError::Unavailable(format!("{e:#}")))?;

        debug!(count = symbols.len(), quote = %self.quote_asset, "tradable symbols listed");
        Ok(symbols)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Query values are url-encoded, so an interval can never add parameters
    /// of its own.
    async fn get_json(
        &self,
        path: &str,
        query: &[(&str, &str)],
        weight: u32,
    ) -> Result<serde_json::Value, SourceError> {
        if !self.rate_limit.can_send_request(weight) {
            return Err(SourceError::Unavailable(
                "request weight budget exhausted".to_string(),
            ));
        }

        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .send()
            .await
            .map_err(|e| SourceError::Unavailable(format!("GET {path} request failed: {e}")))?;

        self.rate_limit.update_from_headers(resp.headers());

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| SourceError::Unavailable(format!("failed to parse {path} response: {e}")))?;

        if !status.is_success() {
            warn!(%status, path, "Binance returned an error response");
            return Err(map_error_body(status.as_u16(), &body, path));
        }

        Ok(body)
    }
}

#[async_trait]
impl MarketDataSource for BinanceClient {
    async fn list_tradable_symbols(&self) -> Result<Vec<String>, SourceError> {
        self.get_tradable_symbols().await
    }

    async fn fetch_bars(
        &self,
        symbol: &str,
        interval: &str,
        limit: u32,
    ) -> Result<Vec<PriceBar>, SourceError> {
        self.get_klines(symbol, interval, limit).await
    }
}

impl std::fmt::Debug for BinanceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceClient")
            .field("base_url", &self.base_url)
            .field("quote_asset", &self.quote_asset)
            .field("pinned_symbols", &self.pinned_symbols.len())
            .finish()
    }
}

// =============================================================================
// Response parsing
// =============================================================================

/// Turn a Binance error body into the matching `SourceError`.
fn map_error_body(status: u16, body: &serde_json::Value, path: &str) -> SourceError {
    let code = body["code"].as_i64();
    let msg = body["msg"].as_str().unwrap_or("");

    if code == Some(INVALID_SYMBOL_CODE) || msg.eq_ignore_ascii_case("invalid symbol.") {
        return SourceError::SymbolUnknown(msg.to_string());
    }
    SourceError::Unavailable(format!("Binance GET {path} returned {status}: {body}"))
}

/// Parse the klines array-of-arrays response.
///
/// Array indices:
///   [0] openTime, [1] open, [2] high, [3] low, [4] close, [5] volume, ...
fn parse_klines(body: &serde_json::Value) -> Result<Vec<PriceBar>> {
    let raw = body.as_array().context("klines response is not an array")?;

    let mut bars = Vec::with_capacity(raw.len());
    for entry in raw {
        let arr = entry.as_array().context("kline entry is not an array")?;

        if arr.len() < 5 {
            warn!("skipping malformed kline entry with {} elements", arr.len());
            continue;
        }

        let high = parse_str_f64(&arr[2])?;
        let low = parse_str_f64(&arr[3])?;
        let close = parse_str_f64(&arr[4])?;
        bars.push(PriceBar::new(high, low, close));
    }

    Ok(bars)
}

/// Extract `symbol` of every entry that is `TRADING` against `quote_asset`.
fn parse_tradable_symbols(body: &serde_json::Value, quote_asset: &str) -> Result<Vec<String>> {
    let entries = body["symbols"]
        .as_array()
        .context("exchangeInfo response missing 'symbols' array")?;

    Ok(entries
        .iter()
        .filter(|s| s["status"].as_str() == Some("TRADING"))
        .filter(|s| quote_asset.is_empty() || s["quoteAsset"].as_str() == Some(quote_asset))
        .filter_map(|s| s["symbol"].as_str().map(str::to_string))
        .collect())
}

/// Parse a JSON value that may be either a string or a number into `f64`.
fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
    if let Some(s) = val.as_str() {
        s.parse::<f64>()
            .with_context(|| format!("failed to parse '{s}' as f64"))
    } else if let Some(n) = val.as_f64() {
        Ok(n)
    } else {
        anyhow::bail!("expected string or number, got: {val}")
    }
}

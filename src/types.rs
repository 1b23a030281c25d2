// =============================================================================
// Shared types used across the indicator service
// =============================================================================

use serde::{Deserialize, Serialize};

/// A single price bar as consumed by the indicator engine (oldest first).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl PriceBar {
    pub fn new(high: f64, low: f64, close: f64) -> Self {
        Self { high, low, close }
    }
}

/// RSI zone. Both thresholds are inclusive on the extreme side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RsiCategory {
    Oversold,
    Neutral,
    Overbought,
}

impl std::fmt::Display for RsiCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Oversold => write!(f, "Oversold"),
            Self::Neutral => write!(f, "Neutral"),
            Self::Overbought => write!(f, "Overbought"),
        }
    }
}

/// How the RSI category moved relative to the previous reading for a symbol.
///
/// Serialised as `"Unknown"`, `"NoChange"` or
/// `{"Transition": ["Oversold", "Neutral"]}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Unknown,
    NoChange,
    Transition(RsiCategory, RsiCategory),
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown => write!(f, "Unknown"),
            Self::NoChange => write!(f, "No Change"),
            Self::Transition(from, to) => write!(f, "{from} -> {to}"),
        }
    }
}

/// Output of the RSI computation: rounded value plus direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RsiResult {
    pub value: f64,
    pub direction: Direction,
}

/// Successful per-symbol reading inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorReading {
    pub symbol: String,
    pub rsi: f64,
    pub atr: f64,
    pub direction: Direction,
    pub interval: String,
}

/// Per-symbol failure inside a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolFailure {
    pub symbol: String,
    pub error: String,
}

/// One row of a snapshot. Serialised without a tag so clients see either
/// `{symbol, rsi, atr, direction, interval}` or `{symbol, error}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnapshotEntry {
    Reading(IndicatorReading),
    Failure(SymbolFailure),
}

impl SnapshotEntry {
    pub fn symbol(&self) -> &str {
        match self {
            Self::Reading(r) => &r.symbol,
            Self::Failure(f) => &f.symbol,
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Reading(_))
    }
}

/// One completed pass over the symbol universe, in symbol-list order.
pub type IndicatorSnapshot = Vec<SnapshotEntry>;

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

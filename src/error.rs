// =============================================================================
// Error taxonomy
// =============================================================================
//
// Indicator and per-symbol source errors never escape a scan: the scanner turns
// them into error entries. Only a failure to list the symbol universe fails a
// whole scan (`ScanError`).
// =============================================================================

use thiserror::Error;

/// Failures of the pure indicator computations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IndicatorError {
    #[error("insufficient data: need {required} points, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("computation produced a non-finite value")]
    NonFinite,
}

/// Failures reported by a market-data provider.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("market data source unavailable: {0}")]
    Unavailable(String),

    #[error("unknown symbol: {0}")]
    SymbolUnknown(String),
}

/// Anything that can go wrong while computing one symbol's entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SymbolError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Indicator(#[from] IndicatorError),
}

/// Whole-scan failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScanError {
    #[error("failed to list tradable symbols: {0}")]
    Source(#[from] SourceError),
}

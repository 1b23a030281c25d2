// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Pure, side-effect-free RSI and ATR. Every public function returns a
// `Result<_, IndicatorError>` so callers must handle insufficient-data and
// numerical-edge-case scenarios; the previous RSI needed for direction is
// passed in by the caller rather than stored here.

pub mod atr;
pub mod rsi;

pub use atr::compute_atr;
pub use rsi::compute_rsi;

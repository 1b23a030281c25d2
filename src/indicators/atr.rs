// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range (TR) for each bar after the first:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The reported value is rounded to two decimals.
// =============================================================================

use crate::error::IndicatorError;
use crate::types::{round2, PriceBar};

/// Look-back window used by the service.
pub const ATR_PERIOD: usize = 14;

/// Compute the latest ATR from `bars` (oldest first) with the service period.
pub fn compute_atr(bars: &[PriceBar]) -> Result<f64, IndicatorError> {
    wilder_atr(bars, ATR_PERIOD)
}

/// Wilder ATR over `bars`, rounded to two decimals.
///
/// # Errors
/// - [`IndicatorError::InsufficientData`] with fewer than `period + 1` bars
///   (each TR needs a previous close).
/// - [`IndicatorError::NonFinite`] if any intermediate value is non-finite.
pub fn wilder_atr(bars: &[PriceBar], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 || bars.len() < period + 1 {
        return Err(IndicatorError::InsufficientData {
            required: period + 1,
            actual: bars.len(),
        });
    }

    // f64::max drops NaN operands, so reject them before they vanish into TR.
    if bars
        .iter()
        .any(|b| !(b.high.is_finite() && b.low.is_finite() && b.close.is_finite()))
    {
        return Err(IndicatorError::NonFinite);
    }

    let tr_values: Vec<f64> = bars
        .windows(2)
        .map(|w| true_range(&w[1], w[0].close))
        .collect();

    let period_f = period as f64;
    let mut atr = tr_values[..period].iter().sum::<f64>() / period_f;
    if !atr.is_finite() {
        return Err(IndicatorError::NonFinite);
    }

    for &tr in &tr_values[period..] {
        atr = (atr * (period_f - 1.0) + tr) / period_f;
        if !atr.is_finite() {
            return Err(IndicatorError::NonFinite);
        }
    }

    Ok(round2(atr))
}

/// True range of `bar` given the previous bar's close.
pub fn true_range(bar: &PriceBar, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

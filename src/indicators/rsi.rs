// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// Step 1 — Compute price changes (deltas) from consecutive closes.
// Step 2 — Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3 — Apply Wilder's smoothing to every remaining delta. The side that did
//          not move this step still decays:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4 — RS  = avg_gain / avg_loss   (0 when avg_loss is 0)
//          RSI = 100 - 100 / (1 + RS)
//
// NOTE: the zero-loss fallback means an all-gain window reports RSI 0, not the
// textbook 100. Downstream consumers depend on this value; keep it.
//
// Zones:  RSI >= 70 => Overbought,  RSI <= 30 => Oversold.
// =============================================================================

use crate::error::IndicatorError;
use crate::types::{round2, Direction, RsiCategory, RsiResult};

/// Look-back window used by the service.
pub const RSI_PERIOD: usize = 14;

pub const OVERSOLD_THRESHOLD: f64 = 30.0;
pub const OVERBOUGHT_THRESHOLD: f64 = 70.0;

/// Compute the latest RSI for `closes` (oldest first) and classify its
/// direction against `previous`, the last RSI reported for the same symbol.
///
/// # Errors
/// - [`IndicatorError::InsufficientData`] when fewer than `RSI_PERIOD + 1`
///   closes are supplied.
/// - [`IndicatorError::NonFinite`] when the input contains NaN / infinity.
pub fn compute_rsi(closes: &[f64], previous: Option<f64>) -> Result<RsiResult, IndicatorError> {
    let value = wilder_rsi(closes, RSI_PERIOD)?;
    let direction = classify_direction(previous, value);
    Ok(RsiResult { value, direction })
}

/// Wilder RSI over `closes`, rounded to two decimals.
pub fn wilder_rsi(closes: &[f64], period: usize) -> Result<f64, IndicatorError> {
    if period == 0 || closes.len() < period + 1 {
        return Err(IndicatorError::InsufficientData {
            required: period + 1,
            actual: closes.len(),
        });
    }

    let deltas: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();

    let (sum_gain, sum_loss) = deltas[..period].iter().fold((0.0_f64, 0.0_f64), |(g, l), &d| {
        if d > 0.0 {
            (g + d, l)
        } else {
            (g, l + d.abs())
        }
    });

    let period_f = period as f64;
    let mut avg_gain = sum_gain / period_f;
    let mut avg_loss = sum_loss / period_f;

    for &delta in &deltas[period..] {
        let gain = if delta > 0.0 { delta } else { 0.0 };
        let loss = if delta < 0.0 { delta.abs() } else { 0.0 };

        avg_gain = (avg_gain * (period_f - 1.0) + gain) / period_f;
        avg_loss = (avg_loss * (period_f - 1.0) + loss) / period_f;
    }

    let rs = if avg_loss == 0.0 { 0.0 } else { avg_gain / avg_loss };
    let rsi = 100.0 - 100.0 / (1.0 + rs);

    if rsi.is_finite() {
        Ok(round2(rsi))
    } else {
        Err(IndicatorError::NonFinite)
    }
}

/// Map an RSI value onto its zone.
pub fn categorize(rsi: f64) -> RsiCategory {
    if rsi <= OVERSOLD_THRESHOLD {
        RsiCategory::Oversold
    } else if rsi >= OVERBOUGHT_THRESHOLD {
        RsiCategory::Overbought
    } else {
        RsiCategory::Neutral
    }
}

/// Compare the zone of `previous` and `current`.
pub fn classify_direction(previous: Option<f64>, current: f64) -> Direction {
    let Some(prev) = previous else {
        return Direction::Unknown;
    };

    let from = categorize(prev);
    let to = categorize(current);
    if from == to {
        Direction::NoChange
    } else {
        Direction::Transition(from, to)
    }
}

//! Stochastic oscillator (%K over a high/low window, %D as its SMA)

use crate::data::Bar;

/// Latest (%K, %D). %D is the simple mean of the last `d_period` %K values.
///
/// Returns None when the high/low window is degenerate (division by zero)
/// or the history is too short.
pub fn stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Option<(f64, f64)> {
    if k_period == 0 || d_period == 0 || bars.len() < k_period + d_period - 1 {
        return None;
    }

    let k_at = |end: usize| -> Option<f64> {
        let window = &bars[end + 1 - k_period..=end];
        let high = window.iter().map(|b| b.high).fold(f64::MIN, f64::max);
        let low = window.iter().map(|b| b.low).fold(f64::MAX, f64::min);
        if high == low {
            return None;
        }
        Some(100.0 * (bars[end].close - low) / (high - low))
    };

    let last = bars.len() - 1;
    let mut k_values = Vec::with_capacity(d_period);
    for end in (last + 1 - d_period)..=last {
        k_values.push(k_at(end)?);
    }
    let k = *k_values.last()?;
    let d = k_values.iter().sum::<f64>() / d_period as f64;
    Some((k, d))
}

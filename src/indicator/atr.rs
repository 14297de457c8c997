//! Average True Range (Wilder)

use crate::data::Bar;

/// True range of a bar relative to the previous close
pub fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    let high_low = bar.high - bar.low;
    let high_close = (bar.high - prev_close).abs();
    let low_close = (bar.low - prev_close).abs();
    high_low.max(high_close).max(low_close)
}

/// Latest ATR value: Wilder mean of the true range series
pub fn atr(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let trs: Vec<f64> = bars
        .windows(2)
        .map(|pair| true_range(&pair[1], pair[0].close))
        .collect();

    let mut current = trs[..period].iter().sum::<f64>() / period as f64;
    for &tr in &trs[period..] {
        current = (current * (period - 1) as f64 + tr) / period as f64;
    }
    Some(current)
}

//! Bollinger Bands: SMA midline with population standard deviation bands

use super::ema::sma;

/// Latest (upper, middle, lower) bands over the close series
pub fn bollinger(closes: &[f64], period: usize, k: f64) -> Option<(f64, f64, f64)> {
    if period == 0 || closes.len() < period {
        return None;
    }
    let middle = sma(closes, period)?;
    let window = &closes[closes.len() - period..];
    let variance = window
        .iter()
        .map(|c| {
            let d = c - middle;
            d * d
        })
        .sum::<f64>()
        / period as f64;
    let stddev = variance.sqrt();
    Some((middle + k * stddev, middle, middle - k * stddev))
}

//! Rolling extremes over the bars preceding the current one
//!
//! The current bar is excluded so breakout tests compare today's close
//! against yesterday's channel.

use crate::data::Bar;

/// Highest high over the `window` bars before the latest bar
pub fn rolling_max_high(bars: &[Bar], window: usize) -> Option<f64> {
    prior_window(bars, window)?
        .iter()
        .map(|b| b.high)
        .fold(None, |acc: Option<f64>, h| Some(acc.map_or(h, |a| a.max(h))))
}

/// Lowest low over the `window` bars before the latest bar
pub fn rolling_min_low(bars: &[Bar], window: usize) -> Option<f64> {
    prior_window(bars, window)?
        .iter()
        .map(|b| b.low)
        .fold(None, |acc: Option<f64>, l| Some(acc.map_or(l, |a| a.min(l))))
}

fn prior_window(bars: &[Bar], window: usize) -> Option<&[Bar]> {
    if window == 0 || bars.len() < window + 1 {
        return None;
    }
    let end = bars.len() - 1;
    Some(&bars[end - window..end])
}

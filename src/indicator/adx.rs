//! Average Directional Index (Wilder)
//!
//! +DM/-DM and the true range are smoothed with Wilder's method, DX is
//! derived from the directional indices, and ADX is the Wilder mean of DX.

use super::atr::true_range;
use crate::data::Bar;

/// Latest ADX value. Requires at least 2*period + 1 bars.
pub fn adx(bars: &[Bar], period: usize) -> Option<f64> {
    if period == 0 || bars.len() < 2 * period + 1 {
        return None;
    }

    let n = bars.len() - 1;
    let mut trs = Vec::with_capacity(n);
    let mut plus_dm = Vec::with_capacity(n);
    let mut minus_dm = Vec::with_capacity(n);
    for pair in bars.windows(2) {
        let (prev, cur) = (&pair[0], &pair[1]);
        trs.push(true_range(cur, prev.close));
        let up = cur.high - prev.high;
        let down = prev.low - cur.low;
        plus_dm.push(if up > down && up > 0.0 { up } else { 0.0 });
        minus_dm.push(if down > up && down > 0.0 { down } else { 0.0 });
    }

    // Wilder running sums, then per-step DX
    let mut tr_s = trs[..period].iter().sum::<f64>();
    let mut plus_s = plus_dm[..period].iter().sum::<f64>();
    let mut minus_s = minus_dm[..period].iter().sum::<f64>();
    let mut dx_values = Vec::with_capacity(n - period + 1);
    push_dx(&mut dx_values, plus_s, minus_s, tr_s);
    for i in period..n {
        tr_s = tr_s - tr_s / period as f64 + trs[i];
        plus_s = plus_s - plus_s / period as f64 + plus_dm[i];
        minus_s = minus_s - minus_s / period as f64 + minus_dm[i];
        push_dx(&mut dx_values, plus_s, minus_s, tr_s);
    }

    if dx_values.len() < period {
        return None;
    }
    let mut adx = dx_values[..period].iter().sum::<f64>() / period as f64;
    for &dx in &dx_values[period..] {
        adx = (adx * (period - 1) as f64 + dx) / period as f64;
    }
    if adx.is_finite() {
        Some(adx)
    } else {
        None
    }
}

fn push_dx(dx_values: &mut Vec<f64>, plus_s: f64, minus_s: f64, tr_s: f64) {
    if tr_s == 0.0 {
        dx_values.push(0.0);
        return;
    }
    let plus_di = 100.0 * plus_s / tr_s;
    let minus_di = 100.0 * minus_s / tr_s;
    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        dx_values.push(0.0);
    } else {
        dx_values.push(100.0 * (plus_di - minus_di).abs() / di_sum);
    }
}

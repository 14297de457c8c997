//! Simple and exponential moving averages
//!
//! EMA uses alpha = 2/(n+1), seeded with the SMA of the first n values.

/// Simple moving average of the trailing `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let window = &values[values.len() - period..];
    Some(window.iter().sum::<f64>() / period as f64)
}

/// Exponential moving average of the full series, latest value
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut current = values[..period].iter().sum::<f64>() / period as f64;
    for &value in &values[period..] {
        current = value * alpha + current * (1.0 - alpha);
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sma_basic() {
        assert_eq!(sma(&[1.0, 2.0, 3.0], 3), Some(2.0));
        assert_eq!(sma(&[1.0, 2.0, 3.0, 4.0], 2), Some(3.5));
    }

    #[test]
    fn test_sma_insufficient() {
        assert_eq!(sma(&[1.0], 3), None);
        assert_eq!(sma(&[], 1), None);
        assert_eq!(sma(&[1.0], 0), None);
    }

    #[test]
    fn test_ema_seed_is_sma() {
        let values = [10.0, 20.0, 30.0];
        assert_eq!(ema(&values, 3), Some(20.0));
    }

    #[test]
    fn test_ema_recursion() {
        let values = [10.0, 20.0, 30.0, 40.0, 50.0];
        let k = 2.0 / 4.0;
        let seed = 20.0;
        let step1 = 40.0 * k + seed * (1.0 - k);
        let step2 = 50.0 * k + step1 * (1.0 - k);
        let result = ema(&values, 3).unwrap();
        assert!((result - step2).abs() < 1e-12);
    }

    #[test]
    fn test_ema_flat_series() {
        let values = [100.0; 30];
        assert!((ema(&values, 20).unwrap() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_ema_insufficient() {
        assert_eq!(ema(&[1.0, 2.0], 3), None);
    }
}

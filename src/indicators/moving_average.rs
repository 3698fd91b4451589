/// Calculate Simple Moving Average over the trailing `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let sum: f64 = values.iter().rev().take(period).sum();
    Some(sum / period as f64)
}

/// Calculate Exponential Moving Average.
///
/// Seeded with the first value; smoothing constant k = 2 / (period + 1);
/// the recurrence `e = v*k + e*(1-k)` runs over every subsequent value.
/// Returns the final accumulated value, or None if fewer than `period`
/// values exist.
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }

    let k = 2.0 / (period as f64 + 1.0);
    let mut e = values[0];
    for v in &values[1..] {
        e = v * k + e * (1.0 - k);
    }

    Some(e)
}

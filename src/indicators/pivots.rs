/// Confirmed swing (pivot) detection.
///
/// Index i is a confirmed pivot high when `highs[i]` is strictly greater
/// than every one of the `l` values on each side; symmetric strict-less-than
/// for pivot lows. Confirmation is backward-looking: a pivot can only be
/// seen once `l` candles have closed after it, so the most recent confirmable
/// pivot always lags the stream by at least `l` bars.

/// Index of the most recent confirmed swing high, or None if fewer than
/// `2l + 1` values exist or no index qualifies.
pub fn last_confirmed_swing_high(highs: &[f64], l: usize) -> Option<usize> {
    let n = highs.len();
    if n < 2 * l + 1 {
        return None;
    }

    // scan newest-first so the first hit is the most recent pivot
    for i in (l..n - l).rev() {
        let pivot = highs[i];
        let left = &highs[i - l..i];
        let right = &highs[i + 1..i + 1 + l];
        if left.iter().all(|&x| pivot > x) && right.iter().all(|&x| pivot > x) {
            return Some(i);
        }
    }

    None
}

/// Index of the most recent confirmed swing low.
pub fn last_confirmed_swing_low(lows: &[f64], l: usize) -> Option<usize> {
    let n = lows.len();
    if n < 2 * l + 1 {
        return None;
    }

    for i in (l..n - l).rev() {
        let pivot = lows[i];
        let left = &lows[i - l..i];
        let right = &lows[i + 1..i + 1 + l];
        if left.iter().all(|&x| pivot < x) && right.iter().all(|&x| pivot < x) {
            return Some(i);
        }
    }

    None
}

/// Average True Range (ATR)
///
/// True range at index i is the greatest of:
/// - high - low
/// - |high - previous close|
/// - |low - previous close|
///
/// This is the simple mean of the last `length` true ranges (not
/// Wilder-smoothed), so it needs `length + 1` candles for the previous
/// close of the oldest true range.
use crate::models::Candle;

pub fn atr(candles: &[Candle], length: usize) -> Option<f64> {
    if length == 0 || candles.len() < length + 1 {
        return None;
    }

    let n = candles.len();
    let mut sum = 0.0;
    for i in (n - length)..n {
        let c = &candles[i];
        let prev = &candles[i - 1];
        let tr = (c.high - c.low)
            .max((c.high - prev.close).abs())
            .max((c.low - prev.close).abs());
        sum += tr;
    }

    Some(sum / length as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candles(ohlc: &[(f64, f64, f64, f64)]) -> Vec<Candle> {
        ohlc.iter()
            .enumerate()
            .map(|(i, &(open, high, low, close))| Candle {
                open_time: i as i64 * 300,
                open,
                high,
                low,
                close,
            })
            .collect()
    }

    #[test]
    fn test_atr_simple_mean_of_ranges() {
        // constant 2.0 high-low range, no gaps between closes
        let cs = candles(&[(100.0, 101.0, 99.0, 100.0); 15]);
        let a = atr(&cs, 14).unwrap();
        assert!((a - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_flat_series_is_zero() {
        let cs = candles(&[(100.0, 100.0, 100.0, 100.0); 20]);
        assert_eq!(atr(&cs, 14), Some(0.0));
    }

    #[test]
    fn test_atr_non_negative_with_gaps() {
        let cs = candles(&[
            (100.0, 105.0, 95.0, 102.0),
            (110.0, 112.0, 108.0, 111.0), // gap up
            (90.0, 92.0, 88.0, 91.0),     // gap down
            (91.0, 95.0, 90.0, 94.0),
        ]);
        let a = atr(&cs, 3).unwrap();
        assert!(a > 0.0);
        // gap legs dominate the plain high-low ranges
        assert!(a > 10.0);
    }

    #[test]
    fn test_atr_insufficient_data() {
        let cs = candles(&[(100.0, 101.0, 99.0, 100.0); 14]);
        assert!(atr(&cs, 14).is_none());
    }
}

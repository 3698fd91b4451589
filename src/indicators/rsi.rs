/// Relative Strength Index over the trailing `length` price changes.
///
/// Wilder-style average gain / average loss; a window with zero losses
/// returns 100.
pub fn rsi(closes: &[f64], length: usize) -> Option<f64> {
    if length == 0 || closes.len() < length + 1 {
        return None;
    }

    let n = closes.len();
    let mut gains = 0.0;
    let mut losses = 0.0;

    for i in (n - length)..n {
        let diff = closes[i] - closes[i - 1];
        if diff >= 0.0 {
            gains += diff;
        } else {
            losses += -diff;
        }
    }

    if losses == 0.0 {
        return Some(100.0);
    }

    let rs = gains / losses;
    Some(100.0 - (100.0 / (1.0 + rs)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rsi_in_range() {
        let closes = vec![
            44.0, 44.25, 44.5, 43.75, 44.0, 44.5, 45.0, 45.5, 45.25, 45.5, 46.0, 46.5, 46.25,
            46.0, 46.5,
        ];
        let r = rsi(&closes, 14).unwrap();
        assert!(r > 0.0 && r < 100.0);
        // mostly gains, should read bullish
        assert!(r > 50.0);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let closes = vec![100.0, 101.0, 102.0, 103.0, 104.0, 105.0];
        assert_eq!(rsi(&closes, 5), Some(100.0));
    }

    #[test]
    fn test_rsi_all_losses_is_0() {
        let closes = vec![105.0, 104.0, 103.0, 102.0, 101.0, 100.0];
        assert_eq!(rsi(&closes, 5), Some(0.0));
    }

    #[test]
    fn test_rsi_insufficient_data() {
        let closes = vec![100.0, 102.0, 101.0];
        assert!(rsi(&closes, 14).is_none());
    }
}

use serde::{Deserialize, Serialize};

/// Fixed-interval OHLC candle.
///
/// `open_time` is bucket-aligned epoch seconds (a multiple of the timeframe
/// width). A candle is mutable only while it is a builder's in-progress
/// candle; once a tick lands in the next bucket it is closed and appended to
/// history, after which it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

impl Candle {
    pub fn new(open_time: i64, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold one tick into the candle.
    pub fn absorb(&mut self, price: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }
}

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Long => write!(f, "LONG"),
            Side::Short => write!(f, "SHORT"),
        }
    }
}

/// A confirmed entry plan emitted by the structure engine.
///
/// Geometry invariant (enforced before emission): for Long,
/// `stop < entry < tp1`; mirrored for Short. `r` is the entry-to-stop
/// distance and is strictly positive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TradeSetup {
    pub side: Side,
    pub entry: f64,
    pub stop: f64,
    pub r: f64,
    pub tp1: f64,
    pub tp2: Option<f64>,
}

/// Why a position was fully closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Stop,
    Tp2,
    RunnerStop,
    EmaCross,
    TimeStop,
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitReason::Stop => "stop",
            ExitReason::Tp2 => "tp2",
            ExitReason::RunnerStop => "runner_stop",
            ExitReason::EmaCross => "ema_cross",
            ExitReason::TimeStop => "time_stop",
        };
        write!(f, "{s}")
    }
}

/// Result of one order leg against the broker (entry, partial, or close).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub price: f64,
    pub fee: f64,
}

/// Net outcome of one whole trade (entry through final exit), reported to
/// the risk module exactly once, after the position is fully closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub trade_id: uuid::Uuid,
    pub side: Side,
    pub entry: f64,
    pub exit: f64,
    pub initial_size: f64,
    pub pnl: f64,
    pub fees: f64,
    pub reason: ExitReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_candle_absorb() {
        let mut c = Candle::new(300, 100.0);
        assert_eq!(c.open, 100.0);
        assert_eq!(c.close, 100.0);

        c.absorb(103.0);
        c.absorb(99.0);
        c.absorb(101.0);

        assert_eq!(c.open, 100.0);
        assert_eq!(c.high, 103.0);
        assert_eq!(c.low, 99.0);
        assert_eq!(c.close, 101.0);
    }

    #[test]
    fn test_exit_reason_display() {
        assert_eq!(ExitReason::EmaCross.to_string(), "ema_cross");
        assert_eq!(ExitReason::Stop.to_string(), "stop");
    }
}

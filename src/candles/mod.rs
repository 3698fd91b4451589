use crate::models::Candle;

/// Builds fixed-width candles from a tick stream.
///
/// One builder owns one timeframe. Ticks are assigned to bucket
/// `floor(ts / tf) * tf`; a tick exactly on a boundary belongs to the new
/// bucket. Closed candles are append-only; buckets with no ticks produce no
/// candle, so consumers must not assume fixed-cadence history.
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    tf: i64,
    current: Option<Candle>,
    candles: Vec<Candle>,
}

impl CandleBuilder {
    pub fn new(tf_seconds: i64) -> Self {
        Self {
            tf: tf_seconds,
            current: None,
            candles: Vec::new(),
        }
    }

    pub fn timeframe(&self) -> i64 {
        self.tf
    }

    fn bucket(&self, ts: f64) -> i64 {
        (ts as i64).div_euclid(self.tf) * self.tf
    }

    /// Fold one tick in. Returns the candle that closed as a result, if any.
    ///
    /// Ticks older than the in-progress bucket are dropped (closed history is
    /// append-only; clamping would rewrite a finalized bucket).
    pub fn update(&mut self, ts: f64, price: f64) -> Option<Candle> {
        let b = self.bucket(ts);

        match self.current {
            None => {
                self.current = Some(Candle::new(b, price));
                None
            }
            Some(ref mut cur) if cur.open_time == b => {
                cur.absorb(price);
                None
            }
            Some(cur) if b < cur.open_time => {
                tracing::warn!(
                    bucket = b,
                    current_bucket = cur.open_time,
                    "dropping out-of-order tick"
                );
                None
            }
            Some(cur) => {
                self.candles.push(cur);
                self.current = Some(Candle::new(b, price));
                Some(cur)
            }
        }
    }

    /// Most recently finalized candle, or None if nothing has closed yet.
    pub fn last_closed(&self) -> Option<&Candle> {
        self.candles.last()
    }

    /// All finalized candles, oldest first.
    pub fn closed(&self) -> &[Candle] {
        &self.candles
    }

    pub fn closed_len(&self) -> usize {
        self.candles.len()
    }

    /// Seed from bootstrapped history: all but the last candle are installed
    /// as closed, the last becomes the in-progress candle so live ticks
    /// continue it without a gap or duplicate at the seam.
    pub fn seed_history(&mut self, mut history: Vec<Candle>) {
        if history.is_empty() {
            return;
        }
        let current = history.pop();
        self.candles = history;
        self.current = current;
    }

    /// Fold a closed lower-timeframe candle into this (wider) builder using
    /// its close. `ts` must be past the lower candle's bucket so the close
    /// lands in the right wider bucket. Returns the candle that closed here,
    /// if any.
    pub fn absorb_closed(&mut self, lower: &Candle, lower_tf: i64) -> Option<Candle> {
        self.update((lower.open_time + lower_tf) as f64, lower.close)
    }
}

/// Aggregate candles into a wider timeframe by grouping `group_n` at a time.
///
/// Trailing candles that do not fill a whole group are left out. Used to
/// derive 15m/1h/4h arrays from bootstrapped 5m history.
pub fn resample(candles: &[Candle], group_n: usize) -> Vec<Candle> {
    if group_n == 0 {
        return Vec::new();
    }
    let usable = (candles.len() / group_n) * group_n;

    candles[..usable]
        .chunks(group_n)
        .map(|chunk| Candle {
            open_time: chunk[0].open_time,
            open: chunk[0].open,
            high: chunk.iter().map(|c| c.high).fold(f64::MIN, f64::max),
            low: chunk.iter().map(|c| c.low).fold(f64::MAX, f64::min),
            close: chunk[chunk.len() - 1].close,
        })
        .collect()
}

use serde::{Deserialize, Serialize};

use crate::events::{DiscardReason, EngineEvent};
use crate::models::{Candle, Side, TradeSetup};
use crate::risk::SymbolProfile;

/// How the protective stop is offset from the BOS anchor swing. Both forms
/// appear in live use; this is a strategy parameter, not a constant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum StopOffset {
    /// stop = anchor shifted by `anchor * pct` away from price
    PctOfAnchor(f64),
    /// stop = anchor shifted by `ATR * mult` away from price
    AtrPad(f64),
}

impl StopOffset {
    fn apply(self, anchor: f64, atr: f64, side: Side) -> f64 {
        let offset = match self {
            StopOffset::PctOfAnchor(pct) => anchor * pct,
            StopOffset::AtrPad(mult) => atr * mult,
        };
        match side {
            Side::Long => anchor - offset,
            Side::Short => anchor + offset,
        }
    }
}

/// Points of variation across the strategy lineage, collapsed into one
/// machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureConfig {
    pub retest_buf_atr: f64,
    pub accept_bars: u32,
    pub stop_offset: StopOffset,
    pub tp1_r_mult: f64,
    pub tp2_r_mult: Option<f64>,
    pub profile: SymbolProfile,
}

impl Default for StructureConfig {
    fn default() -> Self {
        Self {
            retest_buf_atr: 0.15,
            accept_bars: 2,
            stop_offset: StopOffset::AtrPad(0.10),
            tp1_r_mult: 1.0,
            tp2_r_mult: Some(2.0),
            profile: SymbolProfile::default(),
        }
    }
}

/// BOS -> Retest -> Accept state, one instance per symbol.
///
/// Invariant: `!waiting_retest` implies `retest_ref == None` and
/// `acceptance_count == 0`. The swing anchors are captured at BOS time so
/// the eventual stop does not drift as new pivots form later.
#[derive(Debug, Clone, Default)]
pub struct StructureState {
    pub direction: Option<Side>,
    pub bos_level: Option<f64>,
    pub waiting_retest: bool,
    pub retest_ref: Option<f64>,
    pub acceptance_count: u32,
    pub bos_swing_low: Option<f64>,
    pub bos_swing_high: Option<f64>,
    pub armed_bar_index: Option<usize>,
}

impl StructureState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Everything the machine needs for one evaluation, computed by the caller
/// from the updated candle history.
#[derive(Debug, Clone, Copy)]
pub struct StructureInputs<'a> {
    pub closed: &'a Candle,
    pub prev_close: f64,
    pub last_swing_high: f64,
    pub last_swing_low: f64,
    pub atr: f64,
    /// Higher-timeframe bias: EMA-fast vs EMA-slow on the bias timeframe.
    pub bias_long: bool,
    pub bias_short: bool,
    /// Execution-timeframe trend filter.
    pub trend_long: bool,
    pub trend_short: bool,
    pub bar_index: usize,
}

impl StructureState {
    /// Advance the machine by one newly closed execution-timeframe candle.
    ///
    /// Transition order matters: invalidation of an armed setup takes
    /// priority over arming a new direction on the same candle. Returns the
    /// confirmed setup, if this close produced one; observability goes to
    /// `events`.
    pub fn evaluate(
        &mut self,
        cfg: &StructureConfig,
        inp: &StructureInputs,
        events: &mut Vec<EngineEvent>,
    ) -> Option<TradeSetup> {
        // 1) If bias/trend flipped while waiting, kill the stale setup.
        if self.waiting_retest {
            let still_supported = match self.direction {
                Some(Side::Long) => inp.bias_long && inp.trend_long,
                Some(Side::Short) => inp.bias_short && inp.trend_short,
                None => false,
            };
            if !still_supported {
                if let Some(side) = self.direction {
                    events.push(EngineEvent::SetupInvalidated { side });
                }
                self.reset();
            }
        }

        // 2) Arm on an actionable break of structure.
        let bos_up = inp.prev_close <= inp.last_swing_high && inp.closed.close > inp.last_swing_high;
        let bos_down = inp.prev_close >= inp.last_swing_low && inp.closed.close < inp.last_swing_low;

        if bos_up && inp.bias_long && inp.trend_long {
            self.reset();
            self.direction = Some(Side::Long);
            self.bos_level = Some(inp.last_swing_high);
            self.waiting_retest = true;
            self.bos_swing_low = Some(inp.last_swing_low);
            self.armed_bar_index = Some(inp.bar_index);
            events.push(EngineEvent::BosArmed {
                side: Side::Long,
                level: inp.last_swing_high,
                anchor: inp.last_swing_low,
            });
        } else if bos_down && inp.bias_short && inp.trend_short {
            self.reset();
            self.direction = Some(Side::Short);
            self.bos_level = Some(inp.last_swing_low);
            self.waiting_retest = true;
            self.bos_swing_high = Some(inp.last_swing_high);
            self.armed_bar_index = Some(inp.bar_index);
            events.push(EngineEvent::BosArmed {
                side: Side::Short,
                level: inp.last_swing_low,
                anchor: inp.last_swing_high,
            });
        }

        // 3) Retest: price returning to the breakout level re-arms the
        // acceptance count.
        if self.waiting_retest {
            if let (Some(side), Some(level)) = (self.direction, self.bos_level) {
                let buf = inp.atr * cfg.retest_buf_atr;
                let retested = match side {
                    Side::Long => inp.closed.low <= level + buf,
                    Side::Short => inp.closed.high >= level - buf,
                };
                if retested {
                    self.retest_ref = Some(level);
                    self.acceptance_count = 0;
                    events.push(EngineEvent::Retest {
                        side,
                        reference: level,
                    });
                }
            }
        }

        // 4) Acceptance counting: strictly consecutive confirming closes.
        if self.waiting_retest {
            if let (Some(side), Some(reference)) = (self.direction, self.retest_ref) {
                let confirming = match side {
                    Side::Long => inp.closed.close > reference,
                    Side::Short => inp.closed.close < reference,
                };
                self.acceptance_count = if confirming {
                    self.acceptance_count + 1
                } else {
                    0
                };
                events.push(EngineEvent::AcceptanceProgress {
                    side,
                    count: self.acceptance_count,
                    required: cfg.accept_bars,
                });
            }
        }

        // 5) Confirmation.
        let accepted = self.waiting_retest
            && self.retest_ref.is_some()
            && self.acceptance_count >= cfg.accept_bars;
        if !accepted {
            return None;
        }

        let side = self.direction?;
        let aligned = match side {
            Side::Long => inp.bias_long && inp.trend_long,
            Side::Short => inp.bias_short && inp.trend_short,
        };
        if !aligned {
            // accepted but bias no longer aligned at the entry close: drop it
            events.push(EngineEvent::SetupDiscarded {
                side,
                reason: DiscardReason::BiasFlipped,
            });
            self.reset();
            return None;
        }

        let anchor = match side {
            Side::Long => self.bos_swing_low,
            Side::Short => self.bos_swing_high,
        };
        let Some(anchor) = anchor else {
            self.reset();
            return None;
        };

        let entry = inp.closed.close;
        let stop = cfg.stop_offset.apply(anchor, inp.atr, side);
        let r = match side {
            Side::Long => entry - stop,
            Side::Short => stop - entry,
        };

        if r <= 0.0 {
            events.push(EngineEvent::SetupDiscarded {
                side,
                reason: DiscardReason::NonPositiveRisk,
            });
            self.reset();
            return None;
        }

        if !cfg.profile.stop_distance_ok(entry, stop) {
            let pct = (entry - stop).abs() / entry;
            let reason = if pct < cfg.profile.min_stop_pct {
                DiscardReason::StopTooTight
            } else {
                DiscardReason::StopTooWide
            };
            events.push(EngineEvent::SetupDiscarded { side, reason });
            self.reset();
            return None;
        }

        let tp1 = match side {
            Side::Long => entry + cfg.tp1_r_mult * r,
            Side::Short => entry - cfg.tp1_r_mult * r,
        };
        let tp2 = cfg.tp2_r_mult.map(|mult| match side {
            Side::Long => entry + mult * r,
            Side::Short => entry - mult * r,
        });

        let setup = TradeSetup {
            side,
            entry,
            stop,
            r,
            tp1,
            tp2,
        };
        events.push(EngineEvent::SetupConfirmed {
            side,
            entry,
            stop,
            r,
            tp1,
            tp2,
        });
        self.reset();

        Some(setup)
    }
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::EngineEvent;
use crate::execution::Broker;
use crate::indicators::{last_confirmed_swing_high, last_confirmed_swing_low};
use crate::models::{Candle, ClosedTrade, ExitReason, Side, TradeSetup};

/// How far past entry the breakeven stop is promoted after TP1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "value", rename_all = "snake_case")]
pub enum BreakevenBuffer {
    PctOfEntry(f64),
    AtrScaled(f64),
}

impl BreakevenBuffer {
    fn amount(self, entry: f64, atr: Option<f64>) -> f64 {
        match self {
            BreakevenBuffer::PctOfEntry(pct) => entry * pct,
            BreakevenBuffer::AtrScaled(mult) => atr.unwrap_or(0.0) * mult,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionConfig {
    pub tp1_r_mult: f64,
    pub tp1_fraction: f64,
    pub tp2_r_mult: Option<f64>,
    pub be_buffer: BreakevenBuffer,
    pub struct_pad_atr: f64,
    pub atr_seatbelt_mult: f64,
    pub runner_time_stop_bars: u32,
    pub pivot_l: usize,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            tp1_r_mult: 1.0,
            tp1_fraction: 0.5,
            tp2_r_mult: None,
            be_buffer: BreakevenBuffer::AtrScaled(0.10),
            struct_pad_atr: 0.10,
            atr_seatbelt_mult: 1.2,
            runner_time_stop_bars: 12,
            pivot_l: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    PreTp1,
    Runner,
}

/// One open position. At most one exists per symbol at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub trade_id: Uuid,
    pub side: Side,
    pub entry: f64,
    pub size: f64,
    pub initial_size: f64,
    pub stop: f64,
    pub tp1_price: f64,
    pub tp1_size: f64,
    pub tp2_price: Option<f64>,
    pub tp1_taken: bool,
    pub phase: Phase,
    /// Gross leg PnL accumulated so far (fees tracked separately).
    pub realized_pnl: f64,
    pub fees_paid: f64,
    // runner tracking, all relative to the TP1 bar
    pub tp1_bar_index: Option<usize>,
    pub highest_since_tp1: f64,
    pub lowest_since_tp1: f64,
    pub struct_stop: Option<f64>,
    pub atr_stop: Option<f64>,
    last_reported_stop: Option<f64>,
}

impl Position {
    fn gross_leg_pnl(&self, exit: f64, size: f64) -> f64 {
        match self.side {
            Side::Long => (exit - self.entry) * size,
            Side::Short => (self.entry - exit) * size,
        }
    }

    pub fn unrealized(&self, price: f64) -> f64 {
        self.gross_leg_pnl(price, self.size)
    }
}

/// Per-candle inputs for managing an open position, computed by the engine
/// from the updated execution-timeframe history. `highs`/`lows` cover the
/// full closed history so pivot indices are comparable with `bar_index`.
#[derive(Debug, Clone, Copy)]
pub struct CandleContext<'a> {
    pub bar_index: usize,
    pub atr: Option<f64>,
    pub highs: &'a [f64],
    pub lows: &'a [f64],
    pub ema_fast: Option<f64>,
    pub ema_slow: Option<f64>,
    pub prev_ema_fast: Option<f64>,
    pub prev_ema_slow: Option<f64>,
}

fn crossed_down(ctx: &CandleContext) -> bool {
    match (
        ctx.prev_ema_fast,
        ctx.prev_ema_slow,
        ctx.ema_fast,
        ctx.ema_slow,
    ) {
        (Some(pf), Some(ps), Some(f), Some(s)) => pf >= ps && f < s,
        _ => false,
    }
}

fn crossed_up(ctx: &CandleContext) -> bool {
    match (
        ctx.prev_ema_fast,
        ctx.prev_ema_slow,
        ctx.ema_fast,
        ctx.ema_slow,
    ) {
        (Some(pf), Some(ps), Some(f), Some(s)) => pf <= ps && f > s,
        _ => false,
    }
}

/// Owns the single open position for a symbol and walks it through the
/// PRE_TP1 -> RUNNER -> closed lifecycle, one closed candle at a time.
pub struct PositionManager {
    broker: Box<dyn Broker>,
    cfg: PositionConfig,
    position: Option<Position>,
}

impl PositionManager {
    pub fn new(broker: Box<dyn Broker>, cfg: PositionConfig) -> Self {
        Self {
            broker,
            cfg,
            position: None,
        }
    }

    pub fn has_open_position(&self) -> bool {
        self.position.is_some()
    }

    pub fn position(&self) -> Option<&Position> {
        self.position.as_ref()
    }

    /// Open a position from a confirmed setup. The single-position invariant
    /// is enforced here unconditionally; an entry-fill failure propagates as
    /// an error and no position is created.
    pub fn open(
        &mut self,
        setup: &TradeSetup,
        size: f64,
        events: &mut Vec<EngineEvent>,
    ) -> anyhow::Result<()> {
        if self.position.is_some() {
            anyhow::bail!("position already open");
        }
        if size <= 0.0 {
            anyhow::bail!("non-positive size");
        }

        let fill = self.broker.place_entry(setup.side, size, setup.entry)?;

        // R and targets are rebuilt from the actual fill, not the reference
        let entry = fill.price;
        let r = match setup.side {
            Side::Long => entry - setup.stop,
            Side::Short => setup.stop - entry,
        };
        if r <= 0.0 {
            anyhow::bail!("entry fill {} crossed the stop {}", entry, setup.stop);
        }

        let direction = match setup.side {
            Side::Long => 1.0,
            Side::Short => -1.0,
        };
        let tp1_price = entry + direction * self.cfg.tp1_r_mult * r;
        let tp2_price = self.cfg.tp2_r_mult.map(|m| entry + direction * m * r);

        let position = Position {
            trade_id: Uuid::new_v4(),
            side: setup.side,
            entry,
            size,
            initial_size: size,
            stop: setup.stop,
            tp1_price,
            tp1_size: size * self.cfg.tp1_fraction,
            tp2_price,
            tp1_taken: false,
            phase: Phase::PreTp1,
            realized_pnl: 0.0,
            fees_paid: fill.fee,
            tp1_bar_index: None,
            highest_since_tp1: f64::MIN,
            lowest_since_tp1: f64::MAX,
            struct_stop: None,
            atr_stop: None,
            last_reported_stop: None,
        };

        events.push(EngineEvent::PositionOpened {
            side: position.side,
            entry,
            size,
            stop: position.stop,
            tp1: tp1_price,
            tp2: tp2_price,
        });
        self.position = Some(position);
        Ok(())
    }

    /// Advance the open position by one closed candle. Returns the fully
    /// closed trade when this candle ended it.
    pub fn on_candle(
        &mut self,
        closed: &Candle,
        ctx: &CandleContext,
        events: &mut Vec<EngineEvent>,
    ) -> Option<ClosedTrade> {
        let phase = self.position.as_ref()?.phase;

        match phase {
            Phase::PreTp1 => self.manage_pre_tp1(closed, ctx, events),
            Phase::Runner => self.manage_runner(closed, ctx, events),
        }
    }

    fn manage_pre_tp1(
        &mut self,
        closed: &Candle,
        ctx: &CandleContext,
        events: &mut Vec<EngineEvent>,
    ) -> Option<ClosedTrade> {
        // stop check comes first: a candle that tags both stop and TP1 is
        // resolved pessimistically
        let (stop, stop_hit) = {
            let pos = self.position.as_ref()?;
            let hit = match pos.side {
                Side::Long => closed.low <= pos.stop,
                Side::Short => closed.high >= pos.stop,
            };
            (pos.stop, hit)
        };
        if stop_hit {
            return self.close_all(stop, ExitReason::Stop, events);
        }

        let tp1_hit = {
            let pos = self.position.as_ref()?;
            !pos.tp1_taken
                && match pos.side {
                    Side::Long => closed.high >= pos.tp1_price,
                    Side::Short => closed.low <= pos.tp1_price,
                }
        };
        if tp1_hit {
            self.take_tp1(closed, ctx, events);
        }

        // TP2 (when configured) closes whatever remains, same candle or later
        let tp2_hit = {
            let pos = self.position.as_ref()?;
            match (pos.tp2_price, pos.side) {
                (Some(tp2), Side::Long) => closed.high >= tp2,
                (Some(tp2), Side::Short) => closed.low <= tp2,
                (None, _) => false,
            }
        };
        if tp2_hit {
            let tp2 = self.position.as_ref()?.tp2_price?;
            return self.close_all(tp2, ExitReason::Tp2, events);
        }

        self.mark_to_market(closed, events);
        None
    }

    fn take_tp1(&mut self, closed: &Candle, ctx: &CandleContext, events: &mut Vec<EngineEvent>) {
        let (side, tp1_price, tp1_size) = {
            let pos = match self.position.as_ref() {
                Some(p) => p,
                None => return,
            };
            (pos.side, pos.tp1_price, pos.tp1_size)
        };

        let fill = match self.broker.place_partial(side, tp1_size, tp1_price) {
            Ok(fill) => fill,
            Err(e) => {
                events.push(EngineEvent::PositionDesync {
                    detail: format!("TP1 order failed: {e}"),
                });
                return;
            }
        };

        let be_buffer = self.cfg.be_buffer;
        let pos = match self.position.as_mut() {
            Some(p) => p,
            None => return,
        };

        let gross = match side {
            Side::Long => (fill.price - pos.entry) * tp1_size,
            Side::Short => (pos.entry - fill.price) * tp1_size,
        };
        pos.realized_pnl += gross;
        pos.fees_paid += fill.fee;
        pos.size -= tp1_size;
        pos.tp1_taken = true;
        pos.phase = Phase::Runner;
        pos.tp1_bar_index = Some(ctx.bar_index);
        pos.highest_since_tp1 = closed.high;
        pos.lowest_since_tp1 = closed.low;

        // promote the stop to breakeven-plus-buffer, but never loosen it
        let buf = be_buffer.amount(pos.entry, ctx.atr);
        let new_stop = match side {
            Side::Long => pos.entry + buf,
            Side::Short => pos.entry - buf,
        };
        let tighter = match side {
            Side::Long => new_stop > pos.stop,
            Side::Short => new_stop < pos.stop,
        };
        if tighter {
            pos.stop = new_stop;
        }

        events.push(EngineEvent::Tp1Taken {
            side,
            fill: fill.price,
            pnl: gross - fill.fee,
            new_stop: pos.stop,
        });
    }

    fn manage_runner(
        &mut self,
        closed: &Candle,
        ctx: &CandleContext,
        events: &mut Vec<EngineEvent>,
    ) -> Option<ClosedTrade> {
        let cfg = self.cfg.clone();

        let (side, effective_stop, tp2_price, tp1_bar) = {
            let pos = self.position.as_mut()?;

            pos.highest_since_tp1 = pos.highest_since_tp1.max(closed.high);
            pos.lowest_since_tp1 = pos.lowest_since_tp1.min(closed.low);

            if let Some(atr) = ctx.atr {
                // structure trail: most recent confirmed pivot formed strictly
                // after the TP1 bar, padded by a slice of ATR
                if let Some(tp1_bar) = pos.tp1_bar_index {
                    let pad = atr * cfg.struct_pad_atr;
                    match pos.side {
                        Side::Long => {
                            if let Some(idx) = last_confirmed_swing_low(ctx.lows, cfg.pivot_l) {
                                if idx > tp1_bar {
                                    let candidate = ctx.lows[idx] - pad;
                                    pos.struct_stop = Some(
                                        pos.struct_stop.map_or(candidate, |s| s.max(candidate)),
                                    );
                                }
                            }
                        }
                        Side::Short => {
                            if let Some(idx) = last_confirmed_swing_high(ctx.highs, cfg.pivot_l) {
                                if idx > tp1_bar {
                                    let candidate = ctx.highs[idx] + pad;
                                    pos.struct_stop = Some(
                                        pos.struct_stop.map_or(candidate, |s| s.min(candidate)),
                                    );
                                }
                            }
                        }
                    }
                }

                // ATR seatbelt trail off the extrema since TP1
                let seatbelt = atr * cfg.atr_seatbelt_mult;
                let candidate = match pos.side {
                    Side::Long => pos.highest_since_tp1 - seatbelt,
                    Side::Short => pos.lowest_since_tp1 + seatbelt,
                };
                pos.atr_stop = Some(match (pos.atr_stop, pos.side) {
                    (Some(s), Side::Long) => s.max(candidate),
                    (Some(s), Side::Short) => s.min(candidate),
                    (None, _) => candidate,
                });
            }

            // effective stop = most favorable of breakeven / structure / ATR
            let mut effective = pos.stop;
            for candidate in [pos.struct_stop, pos.atr_stop].into_iter().flatten() {
                effective = match pos.side {
                    Side::Long => effective.max(candidate),
                    Side::Short => effective.min(candidate),
                };
            }

            if pos.last_reported_stop != Some(effective) {
                pos.last_reported_stop = Some(effective);
                events.push(EngineEvent::RunnerStopUpdated {
                    side: pos.side,
                    stop: effective,
                });
            }

            (pos.side, effective, pos.tp2_price, pos.tp1_bar_index)
        };

        // exit triggers, in priority order
        let stop_hit = match side {
            Side::Long => closed.low <= effective_stop,
            Side::Short => closed.high >= effective_stop,
        };
        if stop_hit {
            return self.close_all(effective_stop, ExitReason::RunnerStop, events);
        }

        if let Some(tp2) = tp2_price {
            let tp2_hit = match side {
                Side::Long => closed.high >= tp2,
                Side::Short => closed.low <= tp2,
            };
            if tp2_hit {
                return self.close_all(tp2, ExitReason::Tp2, events);
            }
        }

        let ema_exit = match side {
            Side::Long => crossed_down(ctx),
            Side::Short => crossed_up(ctx),
        };
        if ema_exit {
            return self.close_all(closed.close, ExitReason::EmaCross, events);
        }

        let time_exit = tp1_bar
            .map(|bar| ctx.bar_index.saturating_sub(bar) >= cfg.runner_time_stop_bars as usize)
            .unwrap_or(false);
        if time_exit {
            return self.close_all(closed.close, ExitReason::TimeStop, events);
        }

        self.mark_to_market(closed, events);
        None
    }

    /// Close the full remaining size at `reference`. On an exit-fill failure
    /// the position is kept (core state only reflects confirmed fills) and a
    /// desync event is raised for manual reconciliation.
    fn close_all(
        &mut self,
        reference: f64,
        reason: ExitReason,
        events: &mut Vec<EngineEvent>,
    ) -> Option<ClosedTrade> {
        let (side, size) = {
            let pos = self.position.as_ref()?;
            (pos.side, pos.size)
        };

        let fill = match self.broker.close_position(side, size, reference, reason) {
            Ok(fill) => fill,
            Err(e) => {
                events.push(EngineEvent::PositionDesync {
                    detail: format!("exit order ({reason}) failed: {e}"),
                });
                return None;
            }
        };

        let mut pos = self.position.take()?;
        pos.realized_pnl += pos.gross_leg_pnl(fill.price, size);
        pos.fees_paid += fill.fee;

        let trade = ClosedTrade {
            trade_id: pos.trade_id,
            side: pos.side,
            entry: pos.entry,
            exit: fill.price,
            initial_size: pos.initial_size,
            pnl: pos.realized_pnl - pos.fees_paid,
            fees: pos.fees_paid,
            reason,
        };

        events.push(EngineEvent::PositionClosed {
            side: trade.side,
            exit: trade.exit,
            pnl: trade.pnl,
            fees: trade.fees,
            reason,
        });

        Some(trade)
    }

    fn mark_to_market(&self, closed: &Candle, events: &mut Vec<EngineEvent>) {
        if let Some(pos) = self.position.as_ref() {
            events.push(EngineEvent::MarkToMarket {
                side: pos.side,
                unrealized: pos.unrealized(closed.close),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{FeeModel, PaperBroker};
    use crate::models::Fill;

    fn setup_long() -> TradeSetup {
        TradeSetup {
            side: Side::Long,
            entry: 100.0,
            stop: 95.0,
            r: 5.0,
            tp1: 105.0,
            tp2: None,
        }
    }

    fn candle(low: f64, high: f64, close: f64) -> Candle {
        Candle {
            open_time: 0,
            open: close,
            high,
            low,
            close,
        }
    }

    fn ctx<'a>(bar_index: usize, highs: &'a [f64], lows: &'a [f64]) -> CandleContext<'a> {
        CandleContext {
            bar_index,
            atr: Some(2.0),
            highs,
            lows,
            ema_fast: Some(10.0),
            ema_slow: Some(9.0),
            prev_ema_fast: Some(10.0),
            prev_ema_slow: Some(9.0),
        }
    }

    /// 0.01% TP slip, no entry slip, no fees: keeps the TP1 arithmetic
    /// readable in assertions.
    fn frictionless_entry_fees() -> FeeModel {
        FeeModel {
            taker_fee_pct: 0.0,
            entry_slippage_pct: 0.0,
            tp_slippage_pct: 0.0001,
            stop_slippage_pct: 0.0005,
        }
    }

    fn manager(cfg: PositionConfig) -> PositionManager {
        PositionManager::new(Box::new(PaperBroker::new(frictionless_entry_fees())), cfg)
    }

    fn be_pct_config() -> PositionConfig {
        PositionConfig {
            be_buffer: BreakevenBuffer::PctOfEntry(0.0001),
            ..PositionConfig::default()
        }
    }

    #[test]
    fn test_single_open_position_invariant() {
        let mut pm = manager(PositionConfig::default());
        let mut events = Vec::new();

        pm.open(&setup_long(), 10.0, &mut events).unwrap();
        let err = pm.open(&setup_long(), 10.0, &mut events).unwrap_err();
        assert!(err.to_string().contains("already open"));
    }

    #[test]
    fn test_open_rejects_zero_size() {
        let mut pm = manager(PositionConfig::default());
        let mut events = Vec::new();
        assert!(pm.open(&setup_long(), 0.0, &mut events).is_err());
        assert!(!pm.has_open_position());
    }

    #[test]
    fn test_tp1_partial_close_and_breakeven_promotion() {
        // entry 100, stop 95, TP1 at 1R = 105, fraction 0.5, size 10:
        // 5 units close at ~104.99, stop promotes to ~100.01
        let mut pm = manager(be_pct_config());
        let mut events = Vec::new();
        pm.open(&setup_long(), 10.0, &mut events).unwrap();

        let c = candle(103.0, 105.5, 104.0);
        let highs = vec![105.5];
        let lows = vec![103.0];
        let closed = pm.on_candle(&c, &ctx(0, &highs, &lows), &mut events);
        assert!(closed.is_none());

        let pos = pm.position().unwrap();
        assert_eq!(pos.phase, Phase::Runner);
        assert!(pos.tp1_taken);
        assert_eq!(pos.size, 5.0);
        assert_eq!(pos.initial_size, 10.0);
        assert!((pos.stop - 100.01).abs() < 1e-9);
        assert_eq!(pos.tp1_bar_index, Some(0));

        let tp1 = events
            .iter()
            .find_map(|e| match e {
                EngineEvent::Tp1Taken { fill, .. } => Some(*fill),
                _ => None,
            })
            .expect("tp1 event");
        assert!((tp1 - 104.9895).abs() < 1e-9);
    }

    #[test]
    fn test_stop_hit_books_loss_with_slippage_and_fees() {
        let fees = FeeModel {
            taker_fee_pct: 0.0004,
            entry_slippage_pct: 0.0,
            tp_slippage_pct: 0.0001,
            stop_slippage_pct: 0.0005,
        };
        let mut pm = PositionManager::new(
            Box::new(PaperBroker::new(fees)),
            PositionConfig::default(),
        );
        let mut events = Vec::new();
        pm.open(&setup_long(), 1.0, &mut events).unwrap();

        let c = candle(94.5, 100.5, 94.8);
        let trade = pm
            .on_candle(&c, &ctx(0, &[100.5], &[94.5]), &mut events)
            .expect("trade should close");

        assert_eq!(trade.reason, ExitReason::Stop);
        let exit = 95.0 * 0.9995;
        assert!((trade.exit - exit).abs() < 1e-9);
        let expected_fees = 100.0 * 0.0004 + exit * 0.0004;
        assert!((trade.fees - expected_fees).abs() < 1e-9);
        assert!((trade.pnl - ((exit - 100.0) - expected_fees)).abs() < 1e-9);
        assert!(!pm.has_open_position());
    }

    #[test]
    fn test_stop_beats_tp1_on_the_same_candle() {
        let mut pm = manager(PositionConfig::default());
        let mut events = Vec::new();
        pm.open(&setup_long(), 10.0, &mut events).unwrap();

        // candle sweeps both levels; the pessimistic resolution is the stop
        let c = candle(94.0, 106.0, 100.0);
        let trade = pm
            .on_candle(&c, &ctx(0, &[106.0], &[94.0]), &mut events)
            .unwrap();
        assert_eq!(trade.reason, ExitReason::Stop);
    }

    #[test]
    fn test_tp2_closes_everything() {
        let cfg = PositionConfig {
            tp2_r_mult: Some(2.0),
            be_buffer: BreakevenBuffer::PctOfEntry(0.0001),
            ..PositionConfig::default()
        };
        let mut pm = manager(cfg);
        let mut events = Vec::new();
        pm.open(&setup_long(), 10.0, &mut events).unwrap();

        // one candle through TP1 (105) and TP2 (110): partial then full close
        let c = candle(104.0, 111.0, 110.5);
        let trade = pm
            .on_candle(&c, &ctx(0, &[111.0], &[104.0]), &mut events)
            .expect("tp2 close");

        assert_eq!(trade.reason, ExitReason::Tp2);
        assert!(!pm.has_open_position());
        // both legs profitable
        assert!(trade.pnl > 0.0);
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::Tp1Taken { .. })));
    }

    fn enter_runner(pm: &mut PositionManager, events: &mut Vec<EngineEvent>) {
        pm.open(&setup_long(), 10.0, events).unwrap();
        let c = candle(103.0, 105.5, 104.0);
        pm.on_candle(&c, &ctx(0, &[105.5], &[103.0]), events);
        assert_eq!(pm.position().unwrap().phase, Phase::Runner);
    }

    #[test]
    fn test_runner_atr_stop_tightens_monotonically() {
        let mut pm = manager(be_pct_config());
        let mut events = Vec::new();
        enter_runner(&mut pm, &mut events);

        // rising highs pull the seatbelt up (ATR 2.0 * 1.2 = 2.4 distance)
        let c1 = candle(106.0, 108.0, 107.5);
        pm.on_candle(&c1, &ctx(1, &[105.5, 108.0], &[103.0, 106.0]), &mut events);
        let stop1 = pm.position().unwrap().atr_stop.unwrap();
        assert!((stop1 - (108.0 - 2.4)).abs() < 1e-9);

        let c2 = candle(108.0, 110.0, 109.5);
        pm.on_candle(
            &c2,
            &ctx(2, &[105.5, 108.0, 110.0], &[103.0, 106.0, 108.0]),
            &mut events,
        );
        let stop2 = pm.position().unwrap().atr_stop.unwrap();
        assert!(stop2 > stop1);

        // a pullback must not loosen the seatbelt
        let c3 = candle(108.0, 109.0, 108.5);
        pm.on_candle(
            &c3,
            &ctx(
                3,
                &[105.5, 108.0, 110.0, 109.0],
                &[103.0, 106.0, 108.0, 108.0],
            ),
            &mut events,
        );
        let stop3 = pm.position().unwrap().atr_stop.unwrap();
        assert_eq!(stop3, stop2);
    }

    #[test]
    fn test_runner_struct_stop_requires_pivot_after_tp1_bar() {
        let mut pm = manager(be_pct_config());
        let mut events = Vec::new();
        enter_runner(&mut pm, &mut events);
        // TP1 happened at bar 0; a pivot low confirmed at index 2 (> 0)
        // becomes the structure trail once it exists
        let lows = [104.0, 106.0, 103.5, 106.0, 107.5];
        let highs = [105.5, 108.0, 108.5, 109.0, 109.5];
        let c = candle(107.5, 109.5, 109.0);
        pm.on_candle(&c, &ctx(4, &highs, &lows), &mut events);

        let pos = pm.position().unwrap();
        // pivot low at index 2 (103.5), pad = 2.0 * 0.10
        assert_eq!(pos.struct_stop, Some(103.5 - 0.2));
    }

    #[test]
    fn test_runner_stop_hit_closes_remaining() {
        let mut pm = manager(be_pct_config());
        let mut events = Vec::new();
        enter_runner(&mut pm, &mut events);

        // effective stop is at least breakeven+buffer (~100.01); a drop
        // through it closes the runner half
        let c = candle(99.0, 104.0, 99.5);
        let trade = pm
            .on_candle(&c, &ctx(1, &[105.5, 104.0], &[103.0, 99.0]), &mut events)
            .expect("runner close");

        assert_eq!(trade.reason, ExitReason::RunnerStop);
        assert_eq!(trade.initial_size, 10.0);
        assert!(!pm.has_open_position());
    }

    #[test]
    fn test_runner_ema_cross_exit() {
        let mut pm = manager(be_pct_config());
        let mut events = Vec::new();
        enter_runner(&mut pm, &mut events);

        let c = candle(104.0, 106.0, 105.0);
        let mut ctx = ctx(1, &[105.5, 106.0], &[103.0, 104.0]);
        ctx.prev_ema_fast = Some(10.0);
        ctx.prev_ema_slow = Some(9.8);
        ctx.ema_fast = Some(9.5);
        ctx.ema_slow = Some(9.8);

        let trade = pm.on_candle(&c, &ctx, &mut events).expect("ema exit");
        assert_eq!(trade.reason, ExitReason::EmaCross);
        // closed at the candle close (market-style, entry slippage = 0 here)
        assert!((trade.exit - 105.0).abs() < 1e-9);
    }

    #[test]
    fn test_runner_time_stop() {
        let cfg = PositionConfig {
            runner_time_stop_bars: 3,
            be_buffer: BreakevenBuffer::PctOfEntry(0.0001),
            ..PositionConfig::default()
        };
        let mut pm = manager(cfg);
        let mut events = Vec::new();
        enter_runner(&mut pm, &mut events);

        // bars 1 and 2 after TP1: still holding
        for bar in 1..3 {
            let c = candle(104.0, 106.0, 105.0);
            let highs = vec![106.0; bar + 1];
            let lows = vec![104.0; bar + 1];
            assert!(pm
                .on_candle(&c, &ctx(bar, &highs, &lows), &mut events)
                .is_none());
        }

        // bar 3: time stop fires
        let c = candle(104.0, 106.0, 105.0);
        let trade = pm
            .on_candle(&c, &ctx(3, &[106.0; 4], &[104.0; 4]), &mut events)
            .expect("time stop");
        assert_eq!(trade.reason, ExitReason::TimeStop);
    }

    struct FailingBroker;

    impl Broker for FailingBroker {
        fn place_entry(&mut self, _: Side, _: f64, _: f64) -> anyhow::Result<Fill> {
            anyhow::bail!("exchange down")
        }
        fn place_partial(&mut self, _: Side, _: f64, _: f64) -> anyhow::Result<Fill> {
            anyhow::bail!("exchange down")
        }
        fn close_position(
            &mut self,
            _: Side,
            _: f64,
            _: f64,
            _: ExitReason,
        ) -> anyhow::Result<Fill> {
            anyhow::bail!("exchange down")
        }
    }

    #[test]
    fn test_entry_failure_creates_no_position() {
        let mut pm = PositionManager::new(Box::new(FailingBroker), PositionConfig::default());
        let mut events = Vec::new();

        assert!(pm.open(&setup_long(), 10.0, &mut events).is_err());
        assert!(!pm.has_open_position());
        assert!(events.is_empty());
    }

    struct EntryOnlyBroker;

    impl Broker for EntryOnlyBroker {
        fn place_entry(&mut self, _: Side, size: f64, reference: f64) -> anyhow::Result<Fill> {
            let _ = size;
            Ok(Fill {
                price: reference,
                fee: 0.0,
            })
        }
        fn place_partial(&mut self, _: Side, _: f64, _: f64) -> anyhow::Result<Fill> {
            anyhow::bail!("exchange down")
        }
        fn close_position(
            &mut self,
            _: Side,
            _: f64,
            _: f64,
            _: ExitReason,
        ) -> anyhow::Result<Fill> {
            anyhow::bail!("exchange down")
        }
    }

    #[test]
    fn test_exit_failure_keeps_position_and_raises_desync() {
        let mut pm = PositionManager::new(Box::new(EntryOnlyBroker), PositionConfig::default());
        let mut events = Vec::new();
        pm.open(&setup_long(), 10.0, &mut events).unwrap();

        let c = candle(94.0, 100.5, 94.5);
        let trade = pm.on_candle(&c, &ctx(0, &[100.5], &[94.0]), &mut events);

        assert!(trade.is_none());
        assert!(pm.has_open_position());
        assert!(events
            .iter()
            .any(|e| matches!(e, EngineEvent::PositionDesync { .. })));
    }
}

use chrono::Utc;

use crate::candles::CandleBuilder;
use crate::config::BotConfig;
use crate::events::{DiscardReason, EngineEvent, Envelope, EventSink, RiskBreaker};
use crate::execution::{Broker, CandleContext, PositionManager};
use crate::indicators::{atr, ema, last_confirmed_swing_high, last_confirmed_swing_low};
use crate::models::{Candle, Side, TradeSetup};
use crate::risk::{size_from_risk, BreakerTrip, RiskLimits, RiskState};
use crate::structure::{StructureConfig, StructureInputs, StructureState};

const HEARTBEAT_SECS: i64 = 3600;
/// EMA seed window, in multiples of the period.
const EMA_WINDOW_MULT: usize = 4;
/// How many execution closes to replay into the bias builder when seeding.
const BIAS_SEED_CANDLES: usize = 240;

/// Per-symbol trading engine.
///
/// Owns every piece of per-symbol state and advances all of it synchronously
/// per tick; nothing here blocks, and nothing here is shared across symbols.
/// Evaluation order per closed execution candle: manage the open position
/// first, then risk gating, then the structure machine - entries only while
/// flat.
pub struct Engine {
    cfg: BotConfig,
    structure_cfg: StructureConfig,
    risk_limits: RiskLimits,
    exec: CandleBuilder,
    bias: CandleBuilder,
    structure: StructureState,
    position_manager: PositionManager,
    risk: RiskState,
    sink: Box<dyn EventSink>,
    prev_ema_fast: Option<f64>,
    prev_ema_slow: Option<f64>,
    engaged_breaker: Option<BreakerTrip>,
    last_heartbeat: i64,
}

impl Engine {
    pub fn new(cfg: BotConfig, broker: Box<dyn Broker>, sink: Box<dyn EventSink>) -> Self {
        let structure_cfg = cfg.structure_config();
        let risk_limits = cfg.risk_limits();
        let position_manager = PositionManager::new(broker, cfg.position_config());
        let exec = CandleBuilder::new(cfg.tf_seconds);
        let bias = CandleBuilder::new(cfg.bias_tf_seconds);

        Self {
            cfg,
            structure_cfg,
            risk_limits,
            exec,
            bias,
            structure: StructureState::new(),
            position_manager,
            risk: RiskState::new(),
            sink,
            prev_ema_fast: None,
            prev_ema_slow: None,
            engaged_breaker: None,
            last_heartbeat: 0,
        }
    }

    pub fn has_open_position(&self) -> bool {
        self.position_manager.has_open_position()
    }

    pub fn risk_state(&self) -> &RiskState {
        &self.risk
    }

    pub fn exec_candles(&self) -> &[Candle] {
        self.exec.closed()
    }

    /// Seed the execution history from a bootstrap fetch and rebuild the
    /// bias timeframe from the seeded closes, so live ticks continue the
    /// stream without a gap or duplicate at the seam.
    pub fn seed_history(&mut self, history: Vec<Candle>) {
        self.exec.seed_history(history);

        let closed = self.exec.closed().to_vec();
        let start = closed.len().saturating_sub(BIAS_SEED_CANDLES);
        for candle in &closed[start..] {
            self.bias.absorb_closed(candle, self.cfg.tf_seconds);
        }

        if let Some(last) = self.exec.last_closed() {
            self.last_heartbeat = last.open_time;
        }

        let event = EngineEvent::Bootstrapped {
            exec_candles: self.exec.closed_len(),
            bias_candles: self.bias.closed_len(),
        };
        self.dispatch(vec![event]);
    }

    /// Feed one live tick. All aggregation and evaluation happens here,
    /// synchronously, in reaction to candle closes.
    pub fn on_tick(&mut self, ts: f64, price: f64) {
        if let Some(closed) = self.exec.update(ts, price) {
            self.on_close(closed);
        }
    }

    fn on_close(&mut self, closed: Candle) {
        let mut events = Vec::new();
        events.push(EngineEvent::CandleClosed {
            timeframe: self.cfg.tf_seconds,
            open_time: closed.open_time,
            close: closed.close,
        });

        if let Some(bias_closed) = self.bias.absorb_closed(&closed, self.cfg.tf_seconds) {
            events.push(EngineEvent::CandleClosed {
                timeframe: self.cfg.bias_tf_seconds,
                open_time: bias_closed.open_time,
                close: bias_closed.close,
            });
        }

        if self.last_heartbeat == 0 {
            self.last_heartbeat = closed.open_time;
        } else if closed.open_time - self.last_heartbeat >= HEARTBEAT_SECS {
            self.last_heartbeat = closed.open_time;
            events.push(EngineEvent::Heartbeat);
        }

        // indicator context over the updated execution history
        let exec_candles = self.exec.closed();
        let bar_index = exec_candles.len() - 1;
        let closes: Vec<f64> = exec_candles.iter().map(|c| c.close).collect();
        let highs: Vec<f64> = exec_candles.iter().map(|c| c.high).collect();
        let lows: Vec<f64> = exec_candles.iter().map(|c| c.low).collect();

        let ema_fast = ema(tail(&closes, self.cfg.ema_fast * EMA_WINDOW_MULT), self.cfg.ema_fast);
        let ema_slow = ema(tail(&closes, self.cfg.ema_slow * EMA_WINDOW_MULT), self.cfg.ema_slow);
        let current_atr = atr(exec_candles, self.cfg.atr_len);

        // 1) manage the open position; structure is suspended while one exists
        if self.position_manager.has_open_position() {
            let ctx = CandleContext {
                bar_index,
                atr: current_atr,
                highs: &highs,
                lows: &lows,
                ema_fast,
                ema_slow,
                prev_ema_fast: self.prev_ema_fast,
                prev_ema_slow: self.prev_ema_slow,
            };
            if let Some(trade) = self.position_manager.on_candle(&closed, &ctx, &mut events) {
                self.risk
                    .register_trade(trade.pnl, &self.risk_limits, Utc::now());
            }

            self.prev_ema_fast = ema_fast;
            self.prev_ema_slow = ema_slow;
            self.dispatch(events);
            return;
        }

        self.prev_ema_fast = ema_fast;
        self.prev_ema_slow = ema_slow;

        // 2) risk circuit breakers gate everything below
        match self.risk.entry_allowed(&self.risk_limits, Utc::now()) {
            Err(trip) => {
                if self.engaged_breaker != Some(trip) {
                    self.engaged_breaker = Some(trip);
                    events.push(EngineEvent::RiskBreakerEngaged {
                        breaker: breaker_kind(trip),
                    });
                }
                self.dispatch(events);
                return;
            }
            Ok(()) => {
                if let Some(trip) = self.engaged_breaker.take() {
                    events.push(EngineEvent::RiskBreakerCleared {
                        breaker: breaker_kind(trip),
                    });
                }
            }
        }

        // 3) structure evaluation, skipped while data is insufficient
        if exec_candles.len() < self.cfg.warmup_exec_candles
            || self.bias.closed_len() < self.cfg.warmup_bias_candles
        {
            self.dispatch(events);
            return;
        }

        let bias_closes: Vec<f64> = self.bias.closed().iter().map(|c| c.close).collect();
        let bias_fast = ema(
            tail(&bias_closes, self.cfg.ema_fast * EMA_WINDOW_MULT),
            self.cfg.ema_fast,
        );
        let bias_slow = ema(
            tail(&bias_closes, self.cfg.ema_slow * EMA_WINDOW_MULT),
            self.cfg.ema_slow,
        );

        let (Some(ema_fast), Some(ema_slow), Some(bias_fast), Some(bias_slow)) =
            (ema_fast, ema_slow, bias_fast, bias_slow)
        else {
            self.dispatch(events);
            return;
        };
        let Some(current_atr) = current_atr else {
            self.dispatch(events);
            return;
        };

        let (Some(idx_hi), Some(idx_lo)) = (
            last_confirmed_swing_high(&highs, self.cfg.pivot_l),
            last_confirmed_swing_low(&lows, self.cfg.pivot_l),
        ) else {
            self.dispatch(events);
            return;
        };

        if bar_index < 1 {
            self.dispatch(events);
            return;
        }
        let prev_close = exec_candles[bar_index - 1].close;

        let inputs = StructureInputs {
            closed: &closed,
            prev_close,
            last_swing_high: highs[idx_hi],
            last_swing_low: lows[idx_lo],
            atr: current_atr,
            bias_long: bias_fast > bias_slow,
            bias_short: bias_fast < bias_slow,
            trend_long: ema_fast > ema_slow,
            trend_short: ema_fast < ema_slow,
            bar_index,
        };

        if let Some(setup) = self.structure.evaluate(&self.structure_cfg, &inputs, &mut events) {
            self.try_enter(&setup, &mut events);
        }

        self.dispatch(events);
    }

    fn try_enter(&mut self, setup: &TradeSetup, events: &mut Vec<EngineEvent>) {
        let size = match setup.side {
            Side::Long => size_from_risk(self.risk_limits.risk_per_trade, setup.entry, setup.stop),
            Side::Short => size_from_risk(self.risk_limits.risk_per_trade, setup.stop, setup.entry),
        };
        if size <= 0.0 {
            events.push(EngineEvent::SetupDiscarded {
                side: setup.side,
                reason: DiscardReason::ZeroSize,
            });
            return;
        }

        // an entry-fill failure leaves us flat: the setup is gone but no
        // position state was created
        if let Err(e) = self.position_manager.open(setup, size, events) {
            tracing::warn!(symbol = %self.cfg.symbol, error = %e, "entry rejected");
        }
    }

    fn dispatch(&mut self, events: Vec<EngineEvent>) {
        let ts_utc = Utc::now();
        for event in events {
            let envelope = Envelope {
                ts_utc,
                symbol: self.cfg.symbol.clone(),
                event,
            };
            self.sink.emit(&envelope);
        }
    }
}

fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

fn breaker_kind(trip: BreakerTrip) -> RiskBreaker {
    match trip {
        BreakerTrip::DailyLoss => RiskBreaker::DailyLoss,
        BreakerTrip::Cooldown => RiskBreaker::Cooldown,
    }
}

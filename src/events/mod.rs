use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::{ExitReason, Side};

/// Why a confirmed-looking setup was thrown away instead of traded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    NonPositiveRisk,
    StopTooTight,
    StopTooWide,
    BiasFlipped,
    ZeroSize,
}

/// Which circuit breaker is blocking new entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBreaker {
    DailyLoss,
    Cooldown,
}

/// Everything the engine reports to the outside world, as a closed set of
/// tagged variants with fixed field schemas. External journaling, alerting
/// and log formatting all consume this one type; the engine never depends on
/// any of them succeeding.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    Bootstrapped {
        exec_candles: usize,
        bias_candles: usize,
    },
    CandleClosed {
        timeframe: i64,
        open_time: i64,
        close: f64,
    },
    BosArmed {
        side: Side,
        level: f64,
        anchor: f64,
    },
    Retest {
        side: Side,
        reference: f64,
    },
    AcceptanceProgress {
        side: Side,
        count: u32,
        required: u32,
    },
    SetupInvalidated {
        side: Side,
    },
    SetupConfirmed {
        side: Side,
        entry: f64,
        stop: f64,
        r: f64,
        tp1: f64,
        tp2: Option<f64>,
    },
    SetupDiscarded {
        side: Side,
        reason: DiscardReason,
    },
    PositionOpened {
        side: Side,
        entry: f64,
        size: f64,
        stop: f64,
        tp1: f64,
        tp2: Option<f64>,
    },
    Tp1Taken {
        side: Side,
        fill: f64,
        pnl: f64,
        new_stop: f64,
    },
    RunnerStopUpdated {
        side: Side,
        stop: f64,
    },
    MarkToMarket {
        side: Side,
        unrealized: f64,
    },
    PositionClosed {
        side: Side,
        exit: f64,
        pnl: f64,
        fees: f64,
        reason: ExitReason,
    },
    /// Core and exchange disagree about position state. The most severe
    /// failure mode in this design; demands manual reconciliation.
    PositionDesync {
        detail: String,
    },
    RiskBreakerEngaged {
        breaker: RiskBreaker,
    },
    RiskBreakerCleared {
        breaker: RiskBreaker,
    },
    Heartbeat,
}

/// An event stamped with its symbol and emission time.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub ts_utc: DateTime<Utc>,
    pub symbol: String,
    #[serde(flatten)]
    pub event: EngineEvent,
}

/// Where engine events go. Implementations must not block and must not fail
/// the caller; delivery is best-effort by contract.
pub trait EventSink: Send {
    fn emit(&mut self, envelope: &Envelope);
}

/// Logs every event through `tracing`, mapping severity: desync is an error,
/// discarded setups and skipped evaluations are low-severity.
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&mut self, envelope: &Envelope) {
        let symbol = envelope.symbol.as_str();
        match &envelope.event {
            EngineEvent::PositionDesync { detail } => {
                tracing::error!(symbol, detail = %detail, "position desync - manual reconciliation required");
            }
            EngineEvent::CandleClosed {
                timeframe,
                open_time,
                close,
            } => {
                tracing::debug!(symbol, timeframe, open_time, close, "candle closed");
            }
            EngineEvent::SetupDiscarded { side, reason } => {
                tracing::debug!(symbol, side = %side, ?reason, "setup discarded");
            }
            EngineEvent::AcceptanceProgress {
                side,
                count,
                required,
            } => {
                tracing::debug!(symbol, side = %side, count, required, "acceptance progress");
            }
            EngineEvent::MarkToMarket { side, unrealized } => {
                tracing::debug!(symbol, side = %side, unrealized, "mark to market");
            }
            event => {
                if let Ok(json) = serde_json::to_string(event) {
                    tracing::info!(symbol, event = %json, "engine event");
                }
            }
        }
    }
}

/// Forwards envelopes to a bounded tokio channel without ever blocking the
/// hot tick path; if the receiver lags, events are dropped and counted.
pub struct ChannelSink {
    tx: tokio::sync::mpsc::Sender<Envelope>,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: tokio::sync::mpsc::Sender<Envelope>) -> Self {
        Self { tx, dropped: 0 }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl EventSink for ChannelSink {
    fn emit(&mut self, envelope: &Envelope) {
        if self.tx.try_send(envelope.clone()).is_err() {
            self.dropped += 1;
            if self.dropped % 100 == 1 {
                tracing::warn!(dropped = self.dropped, "event sink lagging, dropping events");
            }
        }
    }
}

/// Collects envelopes in memory. Used by tests and by callers that want to
/// inspect a run after the fact.
#[derive(Default)]
pub struct MemorySink {
    pub events: Vec<Envelope>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EventSink for MemorySink {
    fn emit(&mut self, envelope: &Envelope) {
        self.events.push(envelope.clone());
    }
}

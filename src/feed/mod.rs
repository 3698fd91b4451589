use std::time::Duration;

use thiserror::Error;

use crate::api::HyperliquidClient;
use crate::engine::Engine;
use crate::models::Candle;

/// Feed failures, classified so the reconnect loop can tell a blip from a
/// configuration problem. Transient failures are retried with a fixed
/// backoff; fatal ones terminate the run.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("transient feed failure: {0}")]
    Transient(anyhow::Error),
    #[error("fatal feed failure: {0}")]
    Fatal(anyhow::Error),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tick {
    pub ts: f64,
    pub price: f64,
}

/// A lazy, infinite stream of (timestamp, price) pairs in non-decreasing
/// timestamp order. Delivery order defines candle-close order.
#[allow(async_fn_in_trait)]
pub trait TickSource: Send {
    async fn next_tick(&mut self) -> Result<Tick, FeedError>;

    /// Re-establish the underlying connection after a transient failure.
    async fn reconnect(&mut self) -> Result<(), FeedError> {
        Ok(())
    }
}

/// One-shot bootstrap fetch of closed candles for a symbol/timeframe pair.
#[allow(async_fn_in_trait)]
pub trait HistoryProvider {
    async fn history(
        &self,
        coin: &str,
        tf_seconds: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError>;
}

impl HistoryProvider for HyperliquidClient {
    async fn history(
        &self,
        coin: &str,
        tf_seconds: i64,
        limit: usize,
    ) -> Result<Vec<Candle>, FeedError> {
        self.candle_snapshot(coin, tf_seconds, limit)
            .await
            .map_err(FeedError::Transient)
    }
}

/// Tick source that polls the info API's mid-price map on a fixed interval.
pub struct PollSource {
    client: HyperliquidClient,
    symbol: String,
    interval: Duration,
}

impl PollSource {
    pub fn new(client: HyperliquidClient, symbol: impl Into<String>, interval: Duration) -> Self {
        Self {
            client,
            symbol: symbol.into(),
            interval,
        }
    }
}

impl TickSource for PollSource {
    async fn next_tick(&mut self) -> Result<Tick, FeedError> {
        tokio::time::sleep(self.interval).await;

        let mids = self.client.all_mids().await.map_err(FeedError::Transient)?;
        let price = mids.get(&self.symbol).copied().ok_or_else(|| {
            FeedError::Fatal(anyhow::anyhow!("symbol {} not listed", self.symbol))
        })?;

        let ts = chrono::Utc::now().timestamp_millis() as f64 / 1000.0;
        Ok(Tick { ts, price })
    }
}

/// Consume the tick source forever, feeding the engine. Transient failures
/// are logged and retried after `backoff`; the engine's in-memory state
/// (candle history, structure state, open position) survives the reconnect
/// unchanged. Returns only on a fatal feed error.
pub async fn run_with_reconnect<S: TickSource>(
    engine: &mut Engine,
    source: &mut S,
    backoff: Duration,
) -> anyhow::Result<()> {
    loop {
        match source.next_tick().await {
            Ok(tick) => engine.on_tick(tick.ts, tick.price),
            Err(FeedError::Transient(e)) => {
                tracing::warn!(
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "feed disrupted, reconnecting"
                );
                tokio::time::sleep(backoff).await;
                match source.reconnect().await {
                    Ok(()) => {}
                    Err(FeedError::Fatal(e)) => return Err(e),
                    Err(FeedError::Transient(e)) => {
                        tracing::warn!(error = %e, "reconnect failed, will retry");
                    }
                }
            }
            Err(FeedError::Fatal(e)) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BotConfig;
    use crate::events::{Envelope, EventSink};
    use crate::execution::PaperBroker;

    struct NullSink;

    impl EventSink for NullSink {
        fn emit(&mut self, _: &Envelope) {}
    }

    /// Replays a script of tick results, then fails fatally to stop the loop.
    struct ScriptedSource {
        script: Vec<Result<Tick, FeedError>>,
        reconnects: usize,
    }

    impl TickSource for ScriptedSource {
        async fn next_tick(&mut self) -> Result<Tick, FeedError> {
            if self.script.is_empty() {
                return Err(FeedError::Fatal(anyhow::anyhow!("script exhausted")));
            }
            self.script.remove(0)
        }

        async fn reconnect(&mut self) -> Result<(), FeedError> {
            self.reconnects += 1;
            Ok(())
        }
    }

    fn tick(ts: f64, price: f64) -> Result<Tick, FeedError> {
        Ok(Tick { ts, price })
    }

    #[tokio::test]
    async fn test_state_survives_transient_failure() {
        let cfg = BotConfig::defaults("BTC");
        let mut engine = Engine::new(cfg, Box::new(PaperBroker::default()), Box::new(NullSink));

        let mut source = ScriptedSource {
            script: vec![
                tick(0.0, 100.0),
                tick(100.0, 101.0),
                Err(FeedError::Transient(anyhow::anyhow!("ws dropped"))),
                // resumes in a later bucket: the first candle closes
                tick(700.0, 102.0),
            ],
            reconnects: 0,
        };

        let err = run_with_reconnect(&mut engine, &mut source, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("script exhausted"));

        assert_eq!(source.reconnects, 1);
        // candle built across the disruption: open from before, close after
        assert_eq!(engine.exec_candles().len(), 1);
        assert_eq!(engine.exec_candles()[0].open, 100.0);
        assert_eq!(engine.exec_candles()[0].close, 101.0);
    }

    #[tokio::test]
    async fn test_fatal_error_terminates() {
        let cfg = BotConfig::defaults("BTC");
        let mut engine = Engine::new(cfg, Box::new(PaperBroker::default()), Box::new(NullSink));

        let mut source = ScriptedSource {
            script: vec![Err(FeedError::Fatal(anyhow::anyhow!("bad subscription")))],
            reconnects: 0,
        };

        let err = run_with_reconnect(&mut engine, &mut source, Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad subscription"));
        assert_eq!(source.reconnects, 0);
    }
}

use clap::Parser;
use std::time::Duration;

use swingbot::api::HyperliquidClient;
use swingbot::config::BotConfig;
use swingbot::engine::Engine;
use swingbot::events::{ChannelSink, Envelope, EventSink, TracingSink};
use swingbot::execution::PaperBroker;
use swingbot::feed::{run_with_reconnect, HistoryProvider, PollSource};
use swingbot::Result;

/// BOS -> Retest -> Accept swing bot: 5m execution, 1h bias, TP1 + runner.
#[derive(Parser, Debug)]
#[command(name = "swingbot", version)]
struct Args {
    /// Symbol to trade (overrides the SYMBOL environment variable)
    #[arg(long)]
    symbol: Option<String>,

    /// Log filter (overrides RUST_LOG)
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();
    setup_logging(args.log.as_deref());

    let symbol = args
        .symbol
        .or_else(|| std::env::var("SYMBOL").ok())
        .unwrap_or_else(|| "BTC".to_string());

    // malformed configuration fails fast, before any tick is processed
    let cfg = BotConfig::from_env(&symbol)?;

    tracing::info!(
        symbol = %cfg.symbol,
        tf = cfg.tf_seconds,
        bias_tf = cfg.bias_tf_seconds,
        accept_bars = cfg.accept_bars,
        "swingbot starting (paper mode)"
    );
    tracing::info!(
        risk_per_trade = cfg.risk_per_trade,
        daily_max_loss = cfg.daily_max_loss,
        max_consec_losses = cfg.max_consecutive_losses,
        "risk limits"
    );

    let client = HyperliquidClient::new()?;

    // events leave the hot path through a bounded channel; a slow consumer
    // drops events rather than stalling tick processing
    let (tx, mut rx) = tokio::sync::mpsc::channel::<Envelope>(1024);
    let sink_task = tokio::spawn(async move {
        let mut logger = TracingSink;
        while let Some(envelope) = rx.recv().await {
            logger.emit(&envelope);
        }
    });

    let broker = PaperBroker::new(cfg.fee_model());
    let mut engine = Engine::new(cfg.clone(), Box::new(broker), Box::new(ChannelSink::new(tx)));

    // bootstrap: a failed fetch degrades to an empty history accumulated live
    match client
        .history(&cfg.symbol, cfg.tf_seconds, cfg.bootstrap_limit)
        .await
    {
        Ok(history) => {
            tracing::info!(candles = history.len(), "bootstrapped history");
            engine.seed_history(history);
        }
        Err(e) => {
            tracing::warn!(error = %e, "bootstrap failed, starting with empty history");
        }
    }

    let mut source = PollSource::new(
        client,
        cfg.symbol.clone(),
        Duration::from_secs(cfg.poll_interval_secs),
    );
    let backoff = Duration::from_secs(cfg.reconnect_backoff_secs);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received ctrl-c, shutting down");
        }
        result = run_with_reconnect(&mut engine, &mut source, backoff) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "feed loop exited");
            }
        }
    }

    drop(engine);
    sink_task.abort();
    tracing::info!("swingbot stopped");
    Ok(())
}

fn setup_logging(filter: Option<&str>) {
    let filter = filter
        .map(str::to_string)
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "swingbot=info,swingbot::structure=debug".to_string());

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

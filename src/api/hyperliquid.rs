use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;

use crate::models::Candle;

const MAINNET_API_BASE: &str = "https://api.hyperliquid.xyz";
const MAX_RETRIES: u32 = 3;

/// Hyperliquid info-API client: one-shot candle snapshots for bootstrap and
/// the mid-price map for the polling tick source.
#[derive(Clone)]
pub struct HyperliquidClient {
    client: Client,
    base_url: String,
}

/// Raw candle from the info API: millisecond open time, OHLC as strings.
#[derive(Debug, Deserialize)]
struct RawCandle {
    t: i64,
    o: String,
    h: String,
    l: String,
    c: String,
}

#[derive(Debug, Deserialize)]
struct AllMidsResponse {
    #[serde(flatten)]
    mids: HashMap<String, String>,
}

impl HyperliquidClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(MAINNET_API_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn post_info(&self, payload: serde_json::Value) -> Result<reqwest::Response> {
        let url = format!("{}/info", self.base_url);

        let mut last_err = None;
        for attempt in 1..=MAX_RETRIES {
            match self.client.post(&url).json(&payload).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    last_err = Some(anyhow::anyhow!("HTTP {}", response.status()));
                }
                Err(e) => last_err = Some(e.into()),
            }
            if attempt < MAX_RETRIES {
                tokio::time::sleep(std::time::Duration::from_millis(500 * attempt as u64)).await;
            }
        }
        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("request failed")))
    }

    /// Fetch up to `limit` closed candles of width `tf_seconds` for `coin`,
    /// oldest first, with bucket-aligned epoch-second open times.
    pub async fn candle_snapshot(
        &self,
        coin: &str,
        tf_seconds: i64,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let start_ms = now_ms - (limit as i64) * tf_seconds * 1000;

        let payload = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": coin,
                "interval": interval_name(tf_seconds),
                "startTime": start_ms,
                "endTime": now_ms,
            }
        });

        let response = self.post_info(payload).await?;
        let raw: Vec<RawCandle> = response
            .json()
            .await
            .context("Failed to decode candle snapshot")?;

        let mut out = Vec::with_capacity(raw.len());
        for c in raw {
            let t = c.t / 1000;
            out.push(Candle {
                open_time: t - t.rem_euclid(tf_seconds),
                open: parse_px(&c.o)?,
                high: parse_px(&c.h)?,
                low: parse_px(&c.l)?,
                close: parse_px(&c.c)?,
            });
        }
        Ok(out)
    }

    /// Current mid price for every listed coin.
    pub async fn all_mids(&self) -> Result<HashMap<String, f64>> {
        let response = self.post_info(json!({ "type": "allMids" })).await?;
        let raw: AllMidsResponse = response.json().await.context("Failed to decode mids")?;

        let mut mids = HashMap::with_capacity(raw.mids.len());
        for (coin, px) in raw.mids {
            mids.insert(coin, parse_px(&px)?);
        }
        Ok(mids)
    }
}

fn parse_px(raw: &str) -> Result<f64> {
    raw.parse::<f64>()
        .with_context(|| format!("bad price field: {raw:?}"))
}

fn interval_name(tf_seconds: i64) -> String {
    match tf_seconds {
        900 => "15m".to_string(),
        3600 => "1h".to_string(),
        14400 => "4h".to_string(),
        86400 => "1d".to_string(),
        s => format!("{}m", s / 60),
    }
}

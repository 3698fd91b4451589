use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::execution::{BreakevenBuffer, FeeModel, PositionConfig};
use crate::risk::{RiskLimits, SymbolProfile};
use crate::structure::{StopOffset, StructureConfig};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
    #[error("cannot parse {name}={value}")]
    Parse { name: &'static str, value: String },
}

/// Full runtime configuration for one bot instance. Loaded from the
/// environment once at startup and validated before any tick is processed;
/// a malformed configuration is fatal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub symbol: String,

    // timeframes
    pub tf_seconds: i64,
    pub bias_tf_seconds: i64,

    // indicators
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub pivot_l: usize,
    pub atr_len: usize,

    // structure
    pub retest_buf_atr: f64,
    pub accept_bars: u32,
    pub stop_offset: StopOffset,

    // position lifecycle
    pub tp1_r_mult: f64,
    pub tp1_fraction: f64,
    pub tp2_r_mult: Option<f64>,
    pub be_buffer: BreakevenBuffer,
    pub struct_pad_atr: f64,
    pub atr_seatbelt_mult: f64,
    pub runner_time_stop_bars: u32,

    // risk
    pub risk_per_trade: f64,
    pub daily_max_loss: f64,
    pub max_consecutive_losses: u32,
    pub cooldown_seconds: i64,
    pub profile: SymbolProfile,

    // paper fills
    pub taker_fee_pct: f64,
    pub entry_slippage_pct: f64,
    pub tp_slippage_pct: f64,
    pub stop_slippage_pct: f64,

    // data readiness
    pub warmup_exec_candles: usize,
    pub warmup_bias_candles: usize,
    pub bootstrap_limit: usize,

    // feed
    pub poll_interval_secs: u64,
    pub reconnect_backoff_secs: u64,
}

impl BotConfig {
    pub fn defaults(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_string(),
            tf_seconds: 300,
            bias_tf_seconds: 3600,
            ema_fast: 9,
            ema_slow: 21,
            pivot_l: 2,
            atr_len: 14,
            retest_buf_atr: 0.15,
            accept_bars: 2,
            stop_offset: StopOffset::AtrPad(0.10),
            tp1_r_mult: 1.0,
            tp1_fraction: 0.5,
            tp2_r_mult: Some(2.0),
            be_buffer: BreakevenBuffer::PctOfEntry(0.01 / 100.0),
            struct_pad_atr: 0.10,
            atr_seatbelt_mult: 1.2,
            runner_time_stop_bars: 12,
            risk_per_trade: 5.0,
            daily_max_loss: 20.0,
            max_consecutive_losses: 1,
            cooldown_seconds: 3 * 60 * 60,
            profile: SymbolProfile::for_symbol(symbol),
            taker_fee_pct: 0.04 / 100.0,
            entry_slippage_pct: 0.02 / 100.0,
            tp_slippage_pct: 0.01 / 100.0,
            stop_slippage_pct: 0.05 / 100.0,
            warmup_exec_candles: 120,
            warmup_bias_candles: 40,
            bootstrap_limit: 300,
            poll_interval_secs: 2,
            reconnect_backoff_secs: 5,
        }
    }

    /// Build the config from environment variables on top of the defaults
    /// for `symbol`, then validate.
    pub fn from_env(symbol: &str) -> Result<Self, ConfigError> {
        let mut cfg = Self::defaults(symbol);

        cfg.tf_seconds = env_parse("TF_SECONDS", cfg.tf_seconds)?;
        cfg.bias_tf_seconds = env_parse("BIAS_TF_SECONDS", cfg.bias_tf_seconds)?;
        cfg.ema_fast = env_parse("EMA_FAST", cfg.ema_fast)?;
        cfg.ema_slow = env_parse("EMA_SLOW", cfg.ema_slow)?;
        cfg.pivot_l = env_parse("PIVOT_L", cfg.pivot_l)?;
        cfg.atr_len = env_parse("ATR_LEN", cfg.atr_len)?;
        cfg.retest_buf_atr = env_parse("RETEST_BUF_ATR", cfg.retest_buf_atr)?;
        cfg.accept_bars = env_parse("ACCEPT_BARS", cfg.accept_bars)?;
        cfg.tp1_r_mult = env_parse("TP1_R_MULT", cfg.tp1_r_mult)?;
        cfg.tp1_fraction = env_parse("TP1_FRACTION", cfg.tp1_fraction)?;
        cfg.tp2_r_mult = env_parse_opt("TP2_R_MULT", cfg.tp2_r_mult)?;
        cfg.struct_pad_atr = env_parse("STRUCT_PAD_ATR", cfg.struct_pad_atr)?;
        cfg.atr_seatbelt_mult = env_parse("ATR_SEATBELT_MULT", cfg.atr_seatbelt_mult)?;
        cfg.runner_time_stop_bars = env_parse("RUNNER_TIME_STOP_BARS", cfg.runner_time_stop_bars)?;
        cfg.risk_per_trade = env_parse("RISK_USDT_PER_TRADE", cfg.risk_per_trade)?;
        cfg.daily_max_loss = env_parse("DAILY_MAX_LOSS_USDT", cfg.daily_max_loss)?;
        cfg.max_consecutive_losses = env_parse("MAX_CONSEC_LOSSES", cfg.max_consecutive_losses)?;
        cfg.cooldown_seconds = env_parse("COOLDOWN_SECONDS", cfg.cooldown_seconds)?;
        cfg.taker_fee_pct = env_parse("TAKER_FEE_PCT", cfg.taker_fee_pct)?;
        cfg.entry_slippage_pct = env_parse("ENTRY_SLIPPAGE_PCT", cfg.entry_slippage_pct)?;
        cfg.tp_slippage_pct = env_parse("TP_SLIPPAGE_PCT", cfg.tp_slippage_pct)?;
        cfg.stop_slippage_pct = env_parse("STOP_SLIPPAGE_PCT", cfg.stop_slippage_pct)?;
        cfg.warmup_exec_candles = env_parse("WARMUP_EXEC_CANDLES", cfg.warmup_exec_candles)?;
        cfg.warmup_bias_candles = env_parse("WARMUP_BIAS_CANDLES", cfg.warmup_bias_candles)?;
        cfg.bootstrap_limit = env_parse("BOOTSTRAP_LIMIT", cfg.bootstrap_limit)?;
        cfg.poll_interval_secs = env_parse("POLL_INTERVAL_SECONDS", cfg.poll_interval_secs)?;
        cfg.reconnect_backoff_secs =
            env_parse("RECONNECT_BACKOFF_SECONDS", cfg.reconnect_backoff_secs)?;

        if let Ok(raw) = std::env::var("STOP_OFFSET") {
            cfg.stop_offset = parse_stop_offset(&raw, &cfg.profile)?;
        }
        if let Ok(raw) = std::env::var("BE_BUFFER") {
            cfg.be_buffer = parse_be_buffer(&raw)?;
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                name,
                reason: reason.into(),
            }
        }

        if self.tf_seconds <= 0 {
            return Err(invalid("tf_seconds", "must be positive"));
        }
        if self.bias_tf_seconds <= self.tf_seconds {
            return Err(invalid(
                "bias_tf_seconds",
                "must be wider than the execution timeframe",
            ));
        }
        if self.ema_fast == 0 || self.ema_slow == 0 || self.ema_fast >= self.ema_slow {
            return Err(invalid("ema_fast/ema_slow", "need 0 < fast < slow"));
        }
        if self.pivot_l == 0 {
            return Err(invalid("pivot_l", "must be at least 1"));
        }
        if self.atr_len == 0 {
            return Err(invalid("atr_len", "must be at least 1"));
        }
        if self.accept_bars == 0 {
            return Err(invalid("accept_bars", "must be at least 1"));
        }
        if self.tp1_r_mult <= 0.0 {
            return Err(invalid("tp1_r_mult", "must be positive"));
        }
        if !(self.tp1_fraction > 0.0 && self.tp1_fraction <= 1.0) {
            return Err(invalid("tp1_fraction", "must be in (0, 1]"));
        }
        if let Some(tp2) = self.tp2_r_mult {
            if tp2 <= self.tp1_r_mult {
                return Err(invalid("tp2_r_mult", "must be beyond tp1_r_mult"));
            }
        }
        if self.runner_time_stop_bars == 0 {
            return Err(invalid("runner_time_stop_bars", "must be at least 1"));
        }
        if self.risk_per_trade <= 0.0 {
            return Err(invalid("risk_per_trade", "must be positive"));
        }
        if self.daily_max_loss <= 0.0 {
            return Err(invalid("daily_max_loss", "must be positive"));
        }
        if self.cooldown_seconds < 0 {
            return Err(invalid("cooldown_seconds", "must not be negative"));
        }
        if self.profile.min_stop_pct >= self.profile.max_stop_pct {
            return Err(invalid("profile", "min_stop_pct must be below max_stop_pct"));
        }
        for (name, value) in [
            ("taker_fee_pct", self.taker_fee_pct),
            ("entry_slippage_pct", self.entry_slippage_pct),
            ("tp_slippage_pct", self.tp_slippage_pct),
            ("stop_slippage_pct", self.stop_slippage_pct),
        ] {
            if value < 0.0 {
                return Err(ConfigError::Invalid {
                    name: "fees",
                    reason: format!("{name} must not be negative (got {value})"),
                });
            }
        }
        if self.warmup_exec_candles < self.ema_slow || self.warmup_bias_candles < self.ema_slow {
            return Err(invalid(
                "warmup",
                "warmup windows must cover the slow EMA period",
            ));
        }
        Ok(())
    }

    pub fn structure_config(&self) -> StructureConfig {
        StructureConfig {
            retest_buf_atr: self.retest_buf_atr,
            accept_bars: self.accept_bars,
            stop_offset: self.stop_offset,
            tp1_r_mult: self.tp1_r_mult,
            tp2_r_mult: self.tp2_r_mult,
            profile: self.profile,
        }
    }

    pub fn position_config(&self) -> PositionConfig {
        PositionConfig {
            tp1_r_mult: self.tp1_r_mult,
            tp1_fraction: self.tp1_fraction,
            tp2_r_mult: self.tp2_r_mult,
            be_buffer: self.be_buffer,
            struct_pad_atr: self.struct_pad_atr,
            atr_seatbelt_mult: self.atr_seatbelt_mult,
            runner_time_stop_bars: self.runner_time_stop_bars,
            pivot_l: self.pivot_l,
        }
    }

    pub fn fee_model(&self) -> FeeModel {
        FeeModel {
            taker_fee_pct: self.taker_fee_pct,
            entry_slippage_pct: self.entry_slippage_pct,
            tp_slippage_pct: self.tp_slippage_pct,
            stop_slippage_pct: self.stop_slippage_pct,
        }
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            risk_per_trade: self.risk_per_trade,
            daily_max_loss: self.daily_max_loss,
            max_consecutive_losses: self.max_consecutive_losses,
            cooldown_seconds: self.cooldown_seconds,
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Parse { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// Like `env_parse`, but an empty value clears the option entirely.
fn env_parse_opt<T: std::str::FromStr>(
    name: &'static str,
    default: Option<T>,
) -> Result<Option<T>, ConfigError> {
    match std::env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Parse { name, value: raw }),
        Err(_) => Ok(default),
    }
}

/// `"atr:0.10"`, `"pct:0.0005"`, or bare `"pct"` to use the symbol
/// profile's stop buffer.
fn parse_stop_offset(raw: &str, profile: &SymbolProfile) -> Result<StopOffset, ConfigError> {
    let parse_err = || ConfigError::Parse {
        name: "STOP_OFFSET",
        value: raw.to_string(),
    };
    if raw.trim() == "pct" {
        return Ok(StopOffset::PctOfAnchor(profile.stop_buffer_pct));
    }
    let (method, value) = raw.split_once(':').ok_or_else(parse_err)?;
    let value: f64 = value.trim().parse().map_err(|_| parse_err())?;
    match method.trim() {
        "atr" => Ok(StopOffset::AtrPad(value)),
        "pct" => Ok(StopOffset::PctOfAnchor(value)),
        _ => Err(parse_err()),
    }
}

/// `"atr:0.10"` or `"pct:0.0001"`.
fn parse_be_buffer(raw: &str) -> Result<BreakevenBuffer, ConfigError> {
    let parse_err = || ConfigError::Parse {
        name: "BE_BUFFER",
        value: raw.to_string(),
    };
    let (method, value) = raw.split_once(':').ok_or_else(parse_err)?;
    let value: f64 = value.trim().parse().map_err(|_| parse_err())?;
    match method.trim() {
        "atr" => Ok(BreakevenBuffer::AtrScaled(value)),
        "pct" => Ok(BreakevenBuffer::PctOfEntry(value)),
        _ => Err(parse_err()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        BotConfig::defaults("BTC").validate().unwrap();
        BotConfig::defaults("UNKNOWN").validate().unwrap();
    }

    #[test]
    fn test_non_positive_timeframe_is_fatal() {
        let mut cfg = BotConfig::defaults("BTC");
        cfg.tf_seconds = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_inverted_guardrails_are_fatal() {
        let mut cfg = BotConfig::defaults("BTC");
        cfg.profile.min_stop_pct = 0.05;
        cfg.profile.max_stop_pct = 0.01;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_ema_ordering_enforced() {
        let mut cfg = BotConfig::defaults("BTC");
        cfg.ema_fast = 21;
        cfg.ema_slow = 9;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_tp2_must_be_beyond_tp1() {
        let mut cfg = BotConfig::defaults("BTC");
        cfg.tp2_r_mult = Some(0.5);
        assert!(cfg.validate().is_err());

        cfg.tp2_r_mult = None;
        cfg.validate().unwrap();
    }

    #[test]
    fn test_parse_stop_offset_variants() {
        let profile = SymbolProfile::for_symbol("BTC");
        assert_eq!(
            parse_stop_offset("atr:0.10", &profile).unwrap(),
            StopOffset::AtrPad(0.10)
        );
        assert_eq!(
            parse_stop_offset("pct:0.0005", &profile).unwrap(),
            StopOffset::PctOfAnchor(0.0005)
        );
        // bare "pct" picks up the per-symbol stop buffer
        assert_eq!(
            parse_stop_offset("pct", &profile).unwrap(),
            StopOffset::PctOfAnchor(profile.stop_buffer_pct)
        );
        assert!(parse_stop_offset("fib:0.618", &profile).is_err());
        assert!(parse_stop_offset("atr", &profile).is_err());
    }

    #[test]
    fn test_parse_be_buffer_variants() {
        assert_eq!(
            parse_be_buffer("pct:0.0001").unwrap(),
            BreakevenBuffer::PctOfEntry(0.0001)
        );
        assert_eq!(
            parse_be_buffer("atr:0.1").unwrap(),
            BreakevenBuffer::AtrScaled(0.1)
        );
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session risk limits, applied per symbol.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RiskLimits {
    pub risk_per_trade: f64,
    pub daily_max_loss: f64,
    pub max_consecutive_losses: u32,
    pub cooldown_seconds: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            risk_per_trade: 5.0,
            daily_max_loss: 20.0,
            max_consecutive_losses: 1,
            cooldown_seconds: 3 * 60 * 60, // 3 hours
        }
    }
}

/// Which breaker blocked an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    DailyLoss,
    Cooldown,
}

/// Tracks session/day risk constraints for one symbol.
///
/// - `daily_pnl` and `consecutive_losses` reset exactly once when the
///   observed UTC calendar day changes
/// - `cooldown_until` is set when consecutive losses reach the limit, and is
///   deliberately NOT cleared by the day rollover: a cooldown spanning
///   midnight remains in effect
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskState {
    daily_pnl: f64,
    consecutive_losses: u32,
    cooldown_until: i64, // epoch seconds; 0 = no cooldown
    day_key: Option<String>,
}

impl RiskState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn daily_pnl(&self) -> f64 {
        self.daily_pnl
    }

    pub fn consecutive_losses(&self) -> u32 {
        self.consecutive_losses
    }

    pub fn cooldown_until(&self) -> i64 {
        self.cooldown_until
    }

    fn day_key_for(now: DateTime<Utc>) -> String {
        now.format("%Y-%m-%d").to_string()
    }

    /// Reset daily stats if the UTC date changed since the last observation.
    pub fn roll_day(&mut self, now: DateTime<Utc>) {
        let day = Self::day_key_for(now);
        match &self.day_key {
            None => self.day_key = Some(day),
            Some(prev) if *prev != day => {
                self.day_key = Some(day);
                self.daily_pnl = 0.0;
                self.consecutive_losses = 0;
                // cooldown_until survives the rollover on purpose
            }
            Some(_) => {}
        }
    }

    pub fn in_cooldown(&mut self, now: DateTime<Utc>) -> bool {
        self.roll_day(now);
        now.timestamp() < self.cooldown_until
    }

    /// Gate for new entries. `Err` carries the breaker that tripped.
    pub fn entry_allowed(
        &mut self,
        limits: &RiskLimits,
        now: DateTime<Utc>,
    ) -> Result<(), BreakerTrip> {
        self.roll_day(now);

        if self.daily_pnl <= -limits.daily_max_loss {
            return Err(BreakerTrip::DailyLoss);
        }
        if self.in_cooldown(now) {
            return Err(BreakerTrip::Cooldown);
        }
        Ok(())
    }

    /// Book a fully-closed trade's net PnL and apply the circuit breakers.
    /// PnL >= 0 counts as a non-loss and clears the consecutive-loss streak.
    pub fn register_trade(&mut self, pnl: f64, limits: &RiskLimits, now: DateTime<Utc>) {
        self.roll_day(now);

        self.daily_pnl += pnl;

        if pnl < 0.0 {
            self.consecutive_losses += 1;
        } else {
            self.consecutive_losses = 0;
        }

        if self.consecutive_losses >= limits.max_consecutive_losses {
            self.cooldown_until = now.timestamp() + limits.cooldown_seconds;
        }
    }
}

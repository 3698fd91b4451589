// Risk management: position sizing, per-symbol stop guardrails, and
// session-scoped circuit breakers.
pub mod state;

pub use state::{BreakerTrip, RiskLimits, RiskState};

use serde::{Deserialize, Serialize};

/// Position size (in units of the coin) such that
/// `(entry - stop) * size ~= risk_budget`.
///
/// Assumes long-style ordering: pass `entry > stop`, or swap the arguments
/// for the short-symmetric distance. Returns 0 (never a negative size, never
/// a division by zero) when the budget or the distance is non-positive.
pub fn size_from_risk(risk_budget: f64, entry: f64, stop: f64) -> f64 {
    let dist = entry - stop;
    if risk_budget <= 0.0 || dist <= 0.0 {
        return 0.0;
    }
    risk_budget / dist
}

/// Per-symbol stop-distance guardrails, as fractions of the entry price.
///
/// A computed stop closer than `min_stop_pct` is noise-level and would get
/// wicked out; one wider than `max_stop_pct` makes the risk-based size too
/// small to be worth the fees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SymbolProfile {
    pub min_stop_pct: f64,
    pub max_stop_pct: f64,
    pub stop_buffer_pct: f64,
}

impl Default for SymbolProfile {
    fn default() -> Self {
        Self {
            min_stop_pct: 0.30 / 100.0,
            max_stop_pct: 2.00 / 100.0,
            stop_buffer_pct: 0.05 / 100.0,
        }
    }
}

impl SymbolProfile {
    /// Built-in profile table; unknown symbols get the default fallback.
    pub fn for_symbol(symbol: &str) -> Self {
        match symbol {
            // Majors
            "BTC" => Self {
                min_stop_pct: 0.30 / 100.0,
                max_stop_pct: 1.50 / 100.0,
                stop_buffer_pct: 0.05 / 100.0,
            },
            "ETH" => Self {
                min_stop_pct: 0.35 / 100.0,
                max_stop_pct: 1.80 / 100.0,
                stop_buffer_pct: 0.06 / 100.0,
            },
            "SOL" => Self {
                min_stop_pct: 0.45 / 100.0,
                max_stop_pct: 2.20 / 100.0,
                stop_buffer_pct: 0.08 / 100.0,
            },
            // Higher volatility / more noise
            "JUP" | "COIN" => Self {
                min_stop_pct: 0.60 / 100.0,
                max_stop_pct: 3.00 / 100.0,
                stop_buffer_pct: 0.10 / 100.0,
            },
            // Metals (steadier, but can spike around macro)
            "GOLD" => Self {
                min_stop_pct: 0.20 / 100.0,
                max_stop_pct: 1.00 / 100.0,
                stop_buffer_pct: 0.03 / 100.0,
            },
            "SILVER" => Self {
                min_stop_pct: 0.30 / 100.0,
                max_stop_pct: 1.40 / 100.0,
                stop_buffer_pct: 0.04 / 100.0,
            },
            _ => Self::default(),
        }
    }

    /// True when the stop distance, as a fraction of entry, sits inside the
    /// `[min, max]` band.
    pub fn stop_distance_ok(&self, entry: f64, stop: f64) -> bool {
        if entry <= 0.0 {
            return false;
        }
        let pct = (entry - stop).abs() / entry;
        pct >= self.min_stop_pct && pct <= self.max_stop_pct
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_from_risk() {
        // entry 100, stop 95, budget 5 -> 1 unit
        assert_eq!(size_from_risk(5.0, 100.0, 95.0), 1.0);
    }

    #[test]
    fn test_size_from_risk_degenerate_inputs() {
        assert_eq!(size_from_risk(0.0, 100.0, 95.0), 0.0);
        assert_eq!(size_from_risk(-5.0, 100.0, 95.0), 0.0);
        assert_eq!(size_from_risk(5.0, 100.0, 100.0), 0.0);
        assert_eq!(size_from_risk(5.0, 95.0, 100.0), 0.0);
    }

    #[test]
    fn test_profile_lookup_and_fallback() {
        let btc = SymbolProfile::for_symbol("BTC");
        assert_eq!(btc.max_stop_pct, 0.015);

        let unknown = SymbolProfile::for_symbol("DOGE");
        assert_eq!(unknown, SymbolProfile::default());
    }

    #[test]
    fn test_stop_distance_guardrails() {
        let p = SymbolProfile::for_symbol("BTC"); // 0.30%..1.50%

        // 1% distance: fine
        assert!(p.stop_distance_ok(100.0, 99.0));
        // 0.1% distance: too tight
        assert!(!p.stop_distance_ok(100.0, 99.9));
        // 3% distance: too wide
        assert!(!p.stop_distance_ok(100.0, 97.0));
        // symmetric for a short-side stop above entry
        assert!(p.stop_distance_ok(100.0, 101.0));
    }
}

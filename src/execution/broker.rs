use serde::{Deserialize, Serialize};

use crate::models::{ExitReason, Fill, Side};

/// Order submission seam. The engine only ever needs "submit entry" and
/// "submit exit" with a fill price and fee back; live exchange adapters and
/// the paper simulator both sit behind this.
///
/// An `Err` from `place_entry` means no position exists; an `Err` from an
/// exit leg means the position is in an unknown state and the caller must
/// escalate (desync is the most severe failure mode in this design).
pub trait Broker: Send {
    fn place_entry(&mut self, side: Side, size: f64, reference: f64) -> anyhow::Result<Fill>;

    /// Partial exit (take-profit leg).
    fn place_partial(&mut self, side: Side, size: f64, reference: f64) -> anyhow::Result<Fill>;

    /// Full exit of the remaining size.
    fn close_position(
        &mut self,
        side: Side,
        size: f64,
        reference: f64,
        reason: ExitReason,
    ) -> anyhow::Result<Fill>;
}

/// Fee and slippage assumptions, as fractions of notional/price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeeModel {
    pub taker_fee_pct: f64,
    pub entry_slippage_pct: f64,
    pub tp_slippage_pct: f64,
    pub stop_slippage_pct: f64,
}

impl Default for FeeModel {
    fn default() -> Self {
        Self {
            taker_fee_pct: 0.04 / 100.0,
            entry_slippage_pct: 0.02 / 100.0,
            tp_slippage_pct: 0.01 / 100.0,
            stop_slippage_pct: 0.05 / 100.0,
        }
    }
}

impl FeeModel {
    fn fee(&self, size: f64, price: f64) -> f64 {
        size.abs() * price * self.taker_fee_pct
    }
}

/// Deterministic paper fills: the touched price is shifted unfavorably by
/// the configured slippage before it becomes the fill price, and a taker
/// fee is charged on the leg's notional.
#[derive(Debug, Clone, Default)]
pub struct PaperBroker {
    fees: FeeModel,
}

impl PaperBroker {
    pub fn new(fees: FeeModel) -> Self {
        Self { fees }
    }

    fn slip_entry(&self, side: Side, price: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 + self.fees.entry_slippage_pct),
            Side::Short => price * (1.0 - self.fees.entry_slippage_pct),
        }
    }

    fn slip_exit(&self, side: Side, price: f64, pct: f64) -> f64 {
        match side {
            Side::Long => price * (1.0 - pct),
            Side::Short => price * (1.0 + pct),
        }
    }
}

impl Broker for PaperBroker {
    fn place_entry(&mut self, side: Side, size: f64, reference: f64) -> anyhow::Result<Fill> {
        let price = self.slip_entry(side, reference);
        Ok(Fill {
            price,
            fee: self.fees.fee(size, price),
        })
    }

    fn place_partial(&mut self, side: Side, size: f64, reference: f64) -> anyhow::Result<Fill> {
        let price = self.slip_exit(side, reference, self.fees.tp_slippage_pct);
        Ok(Fill {
            price,
            fee: self.fees.fee(size, price),
        })
    }

    fn close_position(
        &mut self,
        side: Side,
        size: f64,
        reference: f64,
        reason: ExitReason,
    ) -> anyhow::Result<Fill> {
        let pct = match reason {
            ExitReason::Stop | ExitReason::RunnerStop => self.fees.stop_slippage_pct,
            ExitReason::Tp2 => self.fees.tp_slippage_pct,
            // market-style closes at the candle close
            ExitReason::EmaCross | ExitReason::TimeStop => self.fees.entry_slippage_pct,
        };
        let price = self.slip_exit(side, reference, pct);
        Ok(Fill {
            price,
            fee: self.fees.fee(size, price),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fees() -> FeeModel {
        FeeModel {
            taker_fee_pct: 0.0004,
            entry_slippage_pct: 0.0002,
            tp_slippage_pct: 0.0001,
            stop_slippage_pct: 0.0005,
        }
    }

    #[test]
    fn test_entry_slips_against_the_taker() {
        let mut broker = PaperBroker::new(fees());

        let long = broker.place_entry(Side::Long, 1.0, 100.0).unwrap();
        assert!((long.price - 100.02).abs() < 1e-9);

        let short = broker.place_entry(Side::Short, 1.0, 100.0).unwrap();
        assert!((short.price - 99.98).abs() < 1e-9);
    }

    #[test]
    fn test_exit_slips_against_the_position() {
        let mut broker = PaperBroker::new(fees());

        // long exits fill low, short exits fill high
        let tp = broker.place_partial(Side::Long, 5.0, 105.0).unwrap();
        assert!((tp.price - 105.0 * 0.9999).abs() < 1e-9);

        let stop = broker
            .close_position(Side::Short, 1.0, 110.0, ExitReason::Stop)
            .unwrap();
        assert!((stop.price - 110.0 * 1.0005).abs() < 1e-9);
    }

    #[test]
    fn test_fee_is_pct_of_notional() {
        let mut broker = PaperBroker::new(fees());
        let fill = broker.place_entry(Side::Long, 2.0, 100.0).unwrap();
        assert!((fill.fee - 2.0 * fill.price * 0.0004).abs() < 1e-9);
    }
}

//! Rolling tick volatility and inventory-skewed reservation pricing.
//!
//! NORMAL-mode quotes start from an Avellaneda-style reservation price
//! `r = bid - q * gamma * sigma^2 * T` where `q` is the signed
//! inventory skew, `gamma` the risk aversion, `sigma` the tick-to-tick
//! volatility over a rolling window, and `T` the fraction of the
//! market window remaining. Statistics stay in f64; only the final
//! price is converted back to money.

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::VecDeque;

/// Rolling window of mid prices producing a tick-to-tick volatility.
#[derive(Debug)]
pub struct VolTracker {
    window: usize,
    ticks: VecDeque<f64>,
}

impl VolTracker {
    #[must_use]
    pub fn new(window: usize) -> Self {
        Self { window: window.max(2), ticks: VecDeque::new() }
    }

    /// Records a new mid price.
    pub fn record(&mut self, mid: Decimal) {
        if let Some(v) = mid.to_f64() {
            if self.ticks.len() == self.window {
                self.ticks.pop_front();
            }
            self.ticks.push_back(v);
        }
    }

    /// Standard deviation of tick-to-tick changes over the window;
    /// zero until at least two ticks are seen.
    #[must_use]
    pub fn sigma(&self) -> f64 {
        if self.ticks.len() < 2 {
            return 0.0;
        }
        let diffs: Vec<f64> = self
            .ticks
            .iter()
            .zip(self.ticks.iter().skip(1))
            .map(|(a, b)| b - a)
            .collect();
        let mean = diffs.iter().sum::<f64>() / diffs.len() as f64;
        let var = diffs.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / diffs.len() as f64;
        var.sqrt()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }

    pub fn clear(&mut self) {
        self.ticks.clear();
    }
}

/// Signed inventory skew `(qty_side - qty_other) / (qty_side + qty_other)`,
/// zero for an empty position.
#[must_use]
pub fn inventory_skew(qty_side: Decimal, qty_other: Decimal) -> f64 {
    let total = qty_side + qty_other;
    if total <= Decimal::ZERO {
        return 0.0;
    }
    ((qty_side - qty_other) / total).to_f64().unwrap_or(0.0)
}

/// Reservation price for one side: `bid - q * gamma * sigma^2 * T`.
///
/// A side we are long quotes below its bid (q > 0 shifts down); a side
/// we are short of quotes at or above it.
#[must_use]
pub fn reservation_price(
    bid: Decimal,
    q: f64,
    gamma: f64,
    sigma: f64,
    window_fraction_remaining: f64,
) -> Decimal {
    let shift = q * gamma * sigma * sigma * window_fraction_remaining;
    let r = bid.to_f64().unwrap_or(0.0) - shift;
    Decimal::from_f64(r).unwrap_or(bid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn sigma_zero_until_two_ticks() {
        let mut vol = VolTracker::new(10);
        assert_eq!(vol.sigma(), 0.0);
        vol.record(dec!(0.50));
        assert_eq!(vol.sigma(), 0.0);
        vol.record(dec!(0.52));
        assert!(vol.sigma() >= 0.0);
    }

    #[test]
    fn sigma_reflects_dispersion() {
        let mut flat = VolTracker::new(10);
        let mut choppy = VolTracker::new(10);
        for i in 0..10 {
            flat.record(dec!(0.50));
            choppy.record(if i % 2 == 0 { dec!(0.45) } else { dec!(0.55) });
        }
        assert!(flat.sigma() < 1e-12);
        assert!(choppy.sigma() > 0.05);
    }

    #[test]
    fn window_is_bounded() {
        let mut vol = VolTracker::new(5);
        for i in 0..50 {
            vol.record(Decimal::new(40 + i, 2));
        }
        assert_eq!(vol.len(), 5);
    }

    #[test]
    fn skew_sign_and_range() {
        assert_eq!(inventory_skew(dec!(0), dec!(0)), 0.0);
        assert!(inventory_skew(dec!(300), dec!(100)) > 0.0);
        assert!(inventory_skew(dec!(100), dec!(300)) < 0.0);
        assert_eq!(inventory_skew(dec!(100), dec!(0)), 1.0);
    }

    #[test]
    fn reservation_shifts_against_inventory() {
        let bid = dec!(0.50);
        // Long this side: quote below bid.
        let long = reservation_price(bid, 0.5, 1.0, 0.1, 1.0);
        assert!(long < bid);
        // Short this side: quote at or above bid.
        let short = reservation_price(bid, -0.5, 1.0, 0.1, 1.0);
        assert!(short > bid);
        // No volatility: no shift.
        assert_eq!(reservation_price(bid, 0.5, 1.0, 0.0, 1.0), bid);
    }
}

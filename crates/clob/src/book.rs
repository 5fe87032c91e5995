//! L2 order book with incremental update support.
//!
//! Maintains sorted price levels for bids (descending) and asks
//! (ascending). Supports both full snapshots and incremental delta
//! updates, applied strictly in arrival order.

use rust_decimal::Decimal;
use splitflip_core::types::OrderSide;
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// L2 order book for a single outcome token.
#[derive(Debug, Clone)]
pub struct L2OrderBook {
    /// Token ID this order book represents.
    pub token_id: String,
    /// Bid levels: price -> size (sorted descending by price).
    pub bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Ask levels: price -> size (sorted ascending by price).
    pub asks: BTreeMap<Decimal, Decimal>,
    /// Timestamp of last update in milliseconds.
    pub last_update_ms: Option<i64>,
}

impl L2OrderBook {
    /// Creates a new empty order book for the given token.
    #[must_use]
    pub fn new(token_id: String) -> Self {
        Self {
            token_id,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_ms: None,
        }
    }

    /// Best (highest) bid price; zero when unknown.
    #[must_use]
    pub fn best_bid(&self) -> Decimal {
        self.bids.keys().next().map(|r| r.0).unwrap_or(Decimal::ZERO)
    }

    /// Best (lowest) ask price; zero when unknown.
    #[must_use]
    pub fn best_ask(&self) -> Decimal {
        self.asks.keys().next().copied().unwrap_or(Decimal::ZERO)
    }

    /// Mid price, if both sides have liquidity.
    #[must_use]
    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.bids.keys().next(), self.asks.keys().next()) {
            (Some(bid), Some(ask)) => Some((bid.0 + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Applies a full snapshot, replacing all existing levels.
    pub fn apply_snapshot(&mut self, bids: Vec<(Decimal, Decimal)>, asks: Vec<(Decimal, Decimal)>) {
        self.bids.clear();
        self.asks.clear();
        for (price, size) in bids {
            if size > Decimal::ZERO {
                self.bids.insert(Reverse(price), size);
            }
        }
        for (price, size) in asks {
            if size > Decimal::ZERO {
                self.asks.insert(price, size);
            }
        }
    }

    /// Applies a delta update to a single price level.
    ///
    /// A zero or negative size removes the level. `side` is the side of
    /// the resting orders: `Buy` updates bids, `Sell` updates asks.
    pub fn apply_delta(&mut self, side: OrderSide, price: Decimal, size: Decimal) {
        match side {
            OrderSide::Buy => {
                if size <= Decimal::ZERO {
                    self.bids.remove(&Reverse(price));
                } else {
                    self.bids.insert(Reverse(price), size);
                }
            }
            OrderSide::Sell => {
                if size <= Decimal::ZERO {
                    self.asks.remove(&price);
                } else {
                    self.asks.insert(price, size);
                }
            }
        }
    }

    /// Cumulative depth up to and including `price` on the requested
    /// side: for `Sell`, the shares offered at asks <= price; for
    /// `Buy`, the shares bid at prices >= price.
    #[must_use]
    pub fn available_quantity_at_price(&self, price: Decimal, side: OrderSide) -> Decimal {
        match side {
            OrderSide::Sell => self
                .asks
                .range(..=price)
                .map(|(_, size)| *size)
                .sum(),
            OrderSide::Buy => self
                .bids
                .range(..=Reverse(price))
                .map(|(_, size)| *size)
                .sum(),
        }
    }

    /// Total bid depth in shares.
    #[must_use]
    pub fn total_bid_depth(&self) -> Decimal {
        self.bids.values().copied().sum()
    }

    /// Total ask depth in shares.
    #[must_use]
    pub fn total_ask_depth(&self) -> Decimal {
        self.asks.values().copied().sum()
    }

    /// Checks if the order book has any liquidity.
    #[must_use]
    pub fn has_liquidity(&self) -> bool {
        !self.bids.is_empty() || !self.asks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn create_test_book() -> L2OrderBook {
        let mut book = L2OrderBook::new("test-token".to_string());
        book.apply_snapshot(
            vec![(dec!(0.48), dec!(100)), (dec!(0.47), dec!(200))],
            vec![(dec!(0.50), dec!(150)), (dec!(0.51), dec!(250)), (dec!(0.55), dec!(75))],
        );
        book
    }

    #[test]
    fn best_prices() {
        let book = create_test_book();
        assert_eq!(book.best_bid(), dec!(0.48));
        assert_eq!(book.best_ask(), dec!(0.50));
    }

    #[test]
    fn empty_book_reports_zero() {
        let book = L2OrderBook::new("empty".to_string());
        assert_eq!(book.best_bid(), Decimal::ZERO);
        assert_eq!(book.best_ask(), Decimal::ZERO);
        assert!(book.mid_price().is_none());
        assert!(!book.has_liquidity());
    }

    #[test]
    fn delta_add_and_remove() {
        let mut book = create_test_book();
        book.apply_delta(OrderSide::Buy, dec!(0.49), dec!(50));
        assert_eq!(book.best_bid(), dec!(0.49));
        book.apply_delta(OrderSide::Buy, dec!(0.49), Decimal::ZERO);
        assert_eq!(book.best_bid(), dec!(0.48));
        book.apply_delta(OrderSide::Sell, dec!(0.50), dec!(-1));
        assert_eq!(book.best_ask(), dec!(0.51));
    }

    #[test]
    fn snapshot_replaces_levels_and_filters_zero() {
        let mut book = create_test_book();
        book.apply_snapshot(
            vec![(dec!(0.40), dec!(10)), (dec!(0.41), Decimal::ZERO)],
            vec![(dec!(0.60), dec!(20))],
        );
        assert_eq!(book.bids.len(), 1);
        assert_eq!(book.asks.len(), 1);
        assert_eq!(book.best_bid(), dec!(0.40));
    }

    #[test]
    fn available_quantity_sell_side_cumulative() {
        let book = create_test_book();
        // asks: 150 @ 0.50, 250 @ 0.51, 75 @ 0.55
        assert_eq!(book.available_quantity_at_price(dec!(0.49), OrderSide::Sell), Decimal::ZERO);
        assert_eq!(book.available_quantity_at_price(dec!(0.50), OrderSide::Sell), dec!(150));
        assert_eq!(book.available_quantity_at_price(dec!(0.51), OrderSide::Sell), dec!(400));
        assert_eq!(book.available_quantity_at_price(dec!(0.99), OrderSide::Sell), dec!(475));
    }

    #[test]
    fn available_quantity_buy_side_cumulative() {
        let book = create_test_book();
        // bids: 100 @ 0.48, 200 @ 0.47
        assert_eq!(book.available_quantity_at_price(dec!(0.48), OrderSide::Buy), dec!(100));
        assert_eq!(book.available_quantity_at_price(dec!(0.47), OrderSide::Buy), dec!(300));
        assert_eq!(book.available_quantity_at_price(dec!(0.49), OrderSide::Buy), Decimal::ZERO);
    }

    #[test]
    fn total_depths() {
        let book = create_test_book();
        assert_eq!(book.total_bid_depth(), dec!(300));
        assert_eq!(book.total_ask_depth(), dec!(475));
    }
}

//! NORMAL mode: multi-level bilateral accumulation quotes.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use splitflip_core::types::{cents, clamp_to_book, round_to_tick};

use crate::sizing::{level_size, max_price_for_side};

/// Number of resting levels per side.
const LEVELS: u32 = 3;

/// One resting bid to place. `size` is in USDC; the engine converts
/// to shares at the quote price when placing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub price: Decimal,
    pub size: Decimal,
}

/// Builds the NORMAL-mode bid ladder for one side.
///
/// Levels start at the reservation price and step down 1c apiece.
/// Every candidate is filtered through `max_price_for_side` so a fill
/// can never push the pair cost to $0.99, and level sizes grow with
/// distance below the side's average entry.
#[must_use]
pub fn accumulation_quotes(
    reservation: Decimal,
    avg_side: Decimal,
    avg_other: Decimal,
    base_size: Decimal,
    tick: Decimal,
) -> Vec<Quote> {
    if base_size <= Decimal::ZERO {
        return Vec::new();
    }
    let cap = max_price_for_side(avg_other);

    let mut quotes = Vec::new();
    for level in 0..LEVELS {
        let raw = reservation - cents(level as i64);
        let price = clamp_to_book(round_to_tick(raw.min(cap), tick), tick);
        if price <= Decimal::ZERO || price > cap {
            continue;
        }
        // Ladder below the average gets bigger as it gets cheaper.
        let cents_below = if avg_side > price && avg_side > Decimal::ZERO {
            ((avg_side - price) * Decimal::from(100u32))
                .floor()
                .to_u32()
                .unwrap_or(0)
        } else {
            0
        };
        let size = level_size(base_size, cents_below);
        // Keep levels distinct after rounding.
        if quotes.iter().any(|q: &Quote| q.price == price) {
            continue;
        }
        quotes.push(Quote { price, size });
    }
    quotes
}

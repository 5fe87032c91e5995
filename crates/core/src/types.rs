//! Domain types shared by every crate in the workspace.
//!
//! Binary markets have an ordered two-outcome set. For the 15-minute
//! arithmetic markets the outcomes are Up/Down; for sports moneylines
//! they are the two teams. [`MarketSide`] indexes into that ordered set
//! so strategy code never cares which product line it is running on.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outcome slot in a binary market's ordered outcome set.
///
/// `Up` is outcome index 0, `Down` is index 1. Sports markets map the
/// home/first-listed team to `Up`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketSide {
    Up,
    Down,
}

impl MarketSide {
    /// Outcome index within the market's ordered outcome set.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Up => 0,
            Self::Down => 1,
        }
    }

    /// The complementary outcome.
    #[must_use]
    pub const fn opposite(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }

    /// Both sides, in outcome order.
    #[must_use]
    pub const fn both() -> [Self; 2] {
        [Self::Up, Self::Down]
    }
}

impl std::fmt::Display for MarketSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "UP"),
            Self::Down => write!(f, "DOWN"),
        }
    }
}

/// Side of an order (buy or sell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type determining fill behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderType {
    /// Good-til-cancelled: rests on the book until filled or cancelled.
    Gtc,
    /// Good-til-date: rests until the attached expiration timestamp.
    Gtd,
    /// Fill-or-kill: fills entirely or fails.
    Fok,
    /// Fill-and-kill (immediate-or-cancel): fills what is available,
    /// drops the rest.
    Fak,
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gtc => write!(f, "GTC"),
            Self::Gtd => write!(f, "GTD"),
            Self::Fok => write!(f, "FOK"),
            Self::Fak => write!(f, "FAK"),
        }
    }
}

/// Why a strategy placed an order. Carried on the pending-order entry so
/// fills can be routed back to the right piece of strategy state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderRole {
    /// Passive bid on the deficit side during balancing.
    Trigger,
    /// Proportional bid on the surplus side spawned by a trigger fill.
    Hedge,
    /// Normal-mode bilateral accumulation level.
    Accumulation,
    /// Laddered exit sell (shock-fade).
    Ladder,
    /// Profit-lock taker buy.
    Lock,
    /// Balance-completing hedge placed after all triggers fill.
    FinalHedge,
    /// Replacement for a chased order that was cancelled.
    CancelReplace,
}

impl std::fmt::Display for OrderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Trigger => "trigger",
            Self::Hedge => "hedge",
            Self::Accumulation => "accumulation",
            Self::Ladder => "ladder",
            Self::Lock => "lock",
            Self::FinalHedge => "final-hedge",
            Self::CancelReplace => "cancel-replace",
        };
        write!(f, "{s}")
    }
}

/// One outcome of a market: its display name and its outcome token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    /// ERC-1155 outcome token ID (large numeric string).
    pub token_id: String,
    /// Outcome name ("Up", "Down", team name, ...).
    pub name: String,
}

/// A binary predictive market.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Market {
    /// On-chain condition ID (0x-prefixed, 64 hex chars).
    pub condition_id: String,
    /// Catalog slug, e.g. `btc-updown-15m-1736452800`.
    pub slug: String,
    /// Human-readable question.
    pub question: String,
    /// Ordered outcome set. Index 0 is [`MarketSide::Up`].
    pub outcomes: Vec<Outcome>,
    /// Whether the market settles through the neg-risk adapter.
    pub neg_risk: bool,
    /// Settlement deadline.
    pub end_date: Option<DateTime<Utc>>,
    /// Minimum price increment.
    pub tick_size: Decimal,
    /// Last known outcome-prices snapshot, in outcome order.
    pub outcome_prices: Vec<Decimal>,
}

impl Market {
    /// Token ID of the given side, if the outcome set has it.
    #[must_use]
    pub fn token_id(&self, side: MarketSide) -> Option<&str> {
        self.outcomes.get(side.index()).map(|o| o.token_id.as_str())
    }

    /// Which side a token ID belongs to.
    #[must_use]
    pub fn side_of(&self, token_id: &str) -> Option<MarketSide> {
        self.outcomes.iter().position(|o| o.token_id == token_id).and_then(|i| match i {
            0 => Some(MarketSide::Up),
            1 => Some(MarketSide::Down),
            _ => None,
        })
    }

    /// True for a well-formed two-outcome market.
    #[must_use]
    pub fn is_binary(&self) -> bool {
        self.outcomes.len() == 2
    }
}

/// An order we placed that the venue has not yet fully resolved.
///
/// Order IDs are stored lowercased; the venue is inconsistent about hex
/// casing between the REST response and the user channel, and lookups
/// must not miss on that. `filled` always starts at zero regardless of
/// what the create response claimed: the user channel reports every
/// fill, including immediate ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
    pub role: OrderRole,
    pub filled: Decimal,
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    #[must_use]
    pub fn new(
        order_id: &str,
        token_id: &str,
        side: OrderSide,
        price: Decimal,
        size: Decimal,
        order_type: OrderType,
        role: OrderRole,
    ) -> Self {
        Self {
            order_id: order_id.to_lowercase(),
            token_id: token_id.to_string(),
            side,
            price,
            size,
            order_type,
            role,
            filled: Decimal::ZERO,
            created_at: Utc::now(),
        }
    }

    /// Unfilled remainder.
    #[must_use]
    pub fn remaining(&self) -> Decimal {
        (self.size - self.filled).max(Decimal::ZERO)
    }

    /// True once cumulative fills reach 90% of the original size; the
    /// pending map evicts at that point.
    #[must_use]
    pub fn is_substantially_filled(&self) -> bool {
        self.size > Decimal::ZERO && self.filled >= self.size * Decimal::new(9, 1)
    }
}

/// Converts integer cents to a price.
#[must_use]
pub fn cents(n: i64) -> Decimal {
    Decimal::new(n, 2)
}

/// Rounds a price to the market's tick (half-up).
#[must_use]
pub fn round_to_tick(price: Decimal, tick: Decimal) -> Decimal {
    if tick <= Decimal::ZERO {
        return price;
    }
    (price / tick).round() * tick
}

/// Clamps a price into the venue's valid band `[tick, 1 - tick]`.
#[must_use]
pub fn clamp_to_book(price: Decimal, tick: Decimal) -> Decimal {
    price.max(tick).min(Decimal::ONE - tick)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_market() -> Market {
        Market {
            condition_id: "0xabc".to_string(),
            slug: "btc-updown-15m-1736452800".to_string(),
            question: "BTC Up or Down?".to_string(),
            outcomes: vec![
                Outcome { token_id: "111".to_string(), name: "Up".to_string() },
                Outcome { token_id: "222".to_string(), name: "Down".to_string() },
            ],
            neg_risk: false,
            end_date: None,
            tick_size: dec!(0.01),
            outcome_prices: vec![dec!(0.5), dec!(0.5)],
        }
    }

    #[test]
    fn side_index_and_opposite() {
        assert_eq!(MarketSide::Up.index(), 0);
        assert_eq!(MarketSide::Down.index(), 1);
        assert_eq!(MarketSide::Up.opposite(), MarketSide::Down);
        assert_eq!(MarketSide::Down.opposite(), MarketSide::Up);
    }

    #[test]
    fn market_token_lookup() {
        let m = make_market();
        assert_eq!(m.token_id(MarketSide::Up), Some("111"));
        assert_eq!(m.token_id(MarketSide::Down), Some("222"));
        assert_eq!(m.side_of("222"), Some(MarketSide::Down));
        assert_eq!(m.side_of("333"), None);
        assert!(m.is_binary());
    }

    #[test]
    fn pending_order_lowercases_id_and_zeroes_fill() {
        let o = PendingOrder::new(
            "0xABCDEF",
            "111",
            OrderSide::Buy,
            dec!(0.48),
            dec!(100),
            OrderType::Gtc,
            OrderRole::Accumulation,
        );
        assert_eq!(o.order_id, "0xabcdef");
        assert_eq!(o.filled, Decimal::ZERO);
        assert_eq!(o.remaining(), dec!(100));
    }

    #[test]
    fn pending_order_substantial_fill_at_ninety_pct() {
        let mut o = PendingOrder::new(
            "0xA",
            "111",
            OrderSide::Buy,
            dec!(0.48),
            dec!(100),
            OrderType::Gtc,
            OrderRole::Trigger,
        );
        o.filled = dec!(89.9);
        assert!(!o.is_substantially_filled());
        o.filled = dec!(90);
        assert!(o.is_substantially_filled());
    }

    #[test]
    fn tick_rounding_and_clamping() {
        assert_eq!(round_to_tick(dec!(0.487), dec!(0.01)), dec!(0.49));
        assert_eq!(round_to_tick(dec!(0.484), dec!(0.01)), dec!(0.48));
        assert_eq!(clamp_to_book(dec!(0.001), dec!(0.01)), dec!(0.01));
        assert_eq!(clamp_to_book(dec!(1.20), dec!(0.01)), dec!(0.99));
        assert_eq!(clamp_to_book(dec!(0.55), dec!(0.01)), dec!(0.55));
    }

    #[test]
    fn cents_helper() {
        assert_eq!(cents(3), dec!(0.03));
        assert_eq!(cents(99), dec!(0.99));
    }
}

//! Events drained by the strategy cores.
//!
//! Each strategy process runs a single logical task over one FIFO
//! queue. The two WebSocket feeds and the heartbeat timer are the only
//! producers; ordering within the queue is arrival order and mode
//! transitions are not commutative, so nothing may reorder or drop
//! entries. In particular a taker order matched against several makers
//! arrives as one user-channel event per maker, and dropping any one of
//! them loses shares.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Order lifecycle status as reported on the user channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderStatus {
    Live,
    Matched,
    Cancelled,
    Expired,
}

impl OrderStatus {
    /// Parses the venue's status strings; unknown strings map to `Live`
    /// so an unrecognized intermediate status never evicts an order.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "MATCHED" | "MINED" | "CONFIRMED" => Self::Matched,
            "CANCELLED" | "CANCELED" | "CANCELLATION" => Self::Cancelled,
            "EXPIRED" => Self::Expired,
            _ => Self::Live,
        }
    }

    /// True for states after which the order can never fill again.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Expired)
    }
}

/// Which user-channel message produced an event.
///
/// Only `Trade` events are authoritative for fill sizes; `Order`
/// events carry unreliable `size_matched` values for non-GTC orders
/// and are used solely to observe CANCELLED/EXPIRED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserEventKind {
    Trade,
    Order,
}

/// Normalized user-channel event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserEvent {
    pub kind: UserEventKind,
    /// Always lowercased; the venue mixes hex casings across channels.
    pub order_id: String,
    pub token_id: String,
    pub side: crate::types::OrderSide,
    /// Shares actually filled by this event. For trade events this is
    /// the sum of `matched_amount` over the maker orders, never the
    /// top-level `size` field (which is the requested amount).
    pub size: Decimal,
    pub price: Decimal,
    pub status: OrderStatus,
    pub timestamp: DateTime<Utc>,
}

/// One entry in a strategy core's FIFO queue.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// The order book for a token changed.
    PriceUpdate { token_id: String },
    /// A trade printed on the market channel (anyone's, not ours).
    /// Persisted for monitoring; the book change arrives separately.
    MarketTrade { token_id: String, price: Decimal, size: Decimal },
    /// A normalized fill/status event from the user channel.
    User(UserEvent),
    /// The market feed has seen nothing for a token past the silence
    /// threshold. The last known book stays available; nothing is
    /// synthesized.
    BookStale { token_id: String, silent_secs: u64 },
    /// A feed disconnected; it reconnects on its own.
    FeedDown { reason: String },
    /// Wall-clock tick driving timeouts and mode re-evaluation.
    Heartbeat { at: DateTime<Utc> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parse_matched_variants() {
        assert_eq!(OrderStatus::parse("MATCHED"), OrderStatus::Matched);
        assert_eq!(OrderStatus::parse("mined"), OrderStatus::Matched);
        assert_eq!(OrderStatus::parse("CONFIRMED"), OrderStatus::Matched);
    }

    #[test]
    fn status_parse_terminal_variants() {
        assert_eq!(OrderStatus::parse("CANCELLED"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::parse("CANCELED"), OrderStatus::Cancelled);
        assert_eq!(OrderStatus::parse("EXPIRED"), OrderStatus::Expired);
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Expired.is_terminal());
        assert!(!OrderStatus::Matched.is_terminal());
    }

    #[test]
    fn status_parse_unknown_is_live() {
        assert_eq!(OrderStatus::parse("DELAYED"), OrderStatus::Live);
        assert_eq!(OrderStatus::parse(""), OrderStatus::Live);
        assert!(!OrderStatus::Live.is_terminal());
    }
}

//! User-channel WebSocket feed (authenticated fills and order status).
//!
//! Subscribes to the user channel with derived API credentials and
//! converts the venue's payloads into normalized [`UserEvent`]s.
//!
//! Two rules here are load-bearing and were both learned from lost
//! shares:
//!
//! - **Every event is queued, never dropped.** When a taker order
//!   crosses several makers the venue sends one rapid event per maker;
//!   a non-reentrant "already processing" guard loses fills.
//! - **Only `trade` events carry fill sizes.** The per-event fill for
//!   the taker order is the sum of `maker_orders[*].matched_amount`;
//!   the top-level `size` field is the requested amount. `order`
//!   events are used solely to observe CANCELLED/EXPIRED.
//!
//! Fills that occur while the socket is down are reconciled by the
//! strategy's periodic REST open-orders poll, not by replay.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use splitflip_core::events::{EngineEvent, OrderStatus, UserEvent, UserEventKind};
use splitflip_core::types::OrderSide;

use crate::auth::ApiCreds;

/// Default user-channel WebSocket URL.
pub const USER_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/user";

const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Errors from the user feed.
#[derive(Debug, Error)]
pub enum UserWsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the user feed.
#[derive(Debug, Clone)]
pub struct UserWsConfig {
    pub url: String,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
}

impl Default for UserWsConfig {
    fn default() -> Self {
        Self {
            url: USER_WS_URL.to_string(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
        }
    }
}

/// Handle to the user feed.
pub struct UserFillFeed {
    shutdown_tx: mpsc::Sender<()>,
}

impl UserFillFeed {
    /// Connects and subscribes. An empty `markets` list means "all my
    /// markets". Normalized events are posted to `event_tx` in arrival
    /// order.
    pub fn connect(
        creds: ApiCreds,
        markets: Vec<String>,
        config: UserWsConfig,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        tokio::spawn(run_connection_loop(config, creds, markets, event_tx, shutdown_rx));
        Self { shutdown_tx }
    }

    /// Gracefully shuts down the connection task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Deserialize)]
struct RawUserMessage {
    event_type: String,
    #[serde(flatten)]
    data: serde_json::Value,
}

/// Trade event: authoritative for fill sizes.
#[derive(Debug, Deserialize)]
struct UserTradeMessage {
    asset_id: String,
    #[serde(default)]
    maker_orders: Vec<MakerOrder>,
    price: String,
    side: String,
    #[serde(default)]
    status: String,
    taker_order_id: String,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MakerOrder {
    asset_id: String,
    matched_amount: String,
    order_id: String,
    price: String,
}

/// Order event: used only to observe terminal states.
#[derive(Debug, Deserialize)]
struct UserOrderMessage {
    asset_id: String,
    id: String,
    price: String,
    side: String,
    #[serde(default)]
    status: String,
    #[serde(default, rename = "type")]
    msg_type: String,
    #[serde(default)]
    timestamp: Option<String>,
}

// =============================================================================
// Connection loop
// =============================================================================

async fn run_connection_loop(
    config: UserWsConfig,
    creds: ApiCreds,
    markets: Vec<String>,
    event_tx: mpsc::Sender<EngineEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("user feed shutdown requested");
            break;
        }

        info!(url = %config.url, markets = markets.len(), "connecting to user channel");

        match connect_and_run(&config, &creds, &markets, &event_tx, &mut shutdown_rx).await {
            Ok(()) => {
                info!("user channel closed cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "user channel connection failed");
                let _ = event_tx
                    .send(EngineEvent::FeedDown { reason: format!("user channel: {e}") })
                    .await;
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
        }
    }
}

async fn connect_and_run(
    config: &UserWsConfig,
    creds: &ApiCreds,
    markets: &[String],
    event_tx: &mpsc::Sender<EngineEvent>,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<(), UserWsError> {
    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .map_err(|e| UserWsError::ConnectionFailed(e.to_string()))?;

    info!("user channel connected");

    let (mut write, mut read) = ws_stream.split();

    let sub = serde_json::json!({
        "type": "user",
        "markets": markets,
        "auth": {
            "apiKey": creds.api_key,
            "secret": creds.api_secret,
            "passphrase": creds.passphrase,
        }
    });
    write.send(Message::Text(sub.to_string())).await?;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, closing user channel");
                let _ = write.close().await;
                return Ok(());
            }

            _ = ping_interval.tick() => {
                if let Err(e) = write.send(Message::Text("PING".to_string())).await {
                    warn!(error = %e, "user channel keepalive failed");
                    return Err(UserWsError::WebSocket(e));
                }
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "PONG" {
                            continue;
                        }
                        for event in normalize_frame(&text) {
                            // Queue unconditionally; the engine drains FIFO.
                            let _ = event_tx.send(EngineEvent::User(event)).await;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "user channel close frame");
                        return Err(UserWsError::ConnectionFailed(
                            frame.map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "connection closed".to_string()),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "user channel error");
                        return Err(UserWsError::WebSocket(e));
                    }
                    None => {
                        return Err(UserWsError::ConnectionFailed("stream ended".to_string()));
                    }
                }
            }
        }
    }
}

// =============================================================================
// Normalization
// =============================================================================

/// Normalizes one user-channel frame into zero or more events, in
/// payload order. Unparseable frames are logged and skipped; they must
/// not kill the connection.
fn normalize_frame(text: &str) -> Vec<UserEvent> {
    let messages: Vec<RawUserMessage> = if text.trim_start().starts_with('[') {
        match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "unparseable user frame");
                return Vec::new();
            }
        }
    } else {
        match serde_json::from_str::<RawUserMessage>(text) {
            Ok(m) => vec![m],
            Err(e) => {
                warn!(error = %e, "unparseable user frame");
                return Vec::new();
            }
        }
    };

    let mut events = Vec::new();
    for msg in messages {
        match msg.event_type.as_str() {
            "trade" => match serde_json::from_value::<UserTradeMessage>(msg.data) {
                Ok(trade) => normalize_trade(&trade, &mut events),
                Err(e) => warn!(error = %e, "unparseable trade event"),
            },
            "order" => match serde_json::from_value::<UserOrderMessage>(msg.data) {
                Ok(order) => events.push(normalize_order(&order)),
                Err(e) => warn!(error = %e, "unparseable order event"),
            },
            other => debug!(event_type = %other, "unknown user event type"),
        }
    }
    events
}

/// Expands a trade message into per-order events.
///
/// The taker order gets one event sized as the sum of maker matched
/// amounts. Each maker order gets its own event sized as its own
/// matched amount. The engine drops events for order IDs it does not
/// know; emitting both sides here keeps the feed ignorant of which
/// side of the trade was ours.
fn normalize_trade(trade: &UserTradeMessage, out: &mut Vec<UserEvent>) {
    let timestamp = parse_ms_timestamp(trade.timestamp.as_deref());
    let side = parse_side(&trade.side);
    let status = OrderStatus::parse(&trade.status);
    let price = parse_decimal(&trade.price);

    let taker_fill: Decimal = trade
        .maker_orders
        .iter()
        .map(|m| parse_decimal(&m.matched_amount))
        .sum();

    if taker_fill > Decimal::ZERO {
        out.push(UserEvent {
            kind: UserEventKind::Trade,
            order_id: trade.taker_order_id.to_lowercase(),
            token_id: trade.asset_id.clone(),
            side,
            size: taker_fill,
            price,
            status,
            timestamp,
        });
    }

    for maker in &trade.maker_orders {
        let size = parse_decimal(&maker.matched_amount);
        if size <= Decimal::ZERO {
            continue;
        }
        out.push(UserEvent {
            kind: UserEventKind::Trade,
            order_id: maker.order_id.to_lowercase(),
            token_id: maker.asset_id.clone(),
            // A maker order matched by a taker traded opposite to the
            // taker's side.
            side: opposite(side),
            size,
            price: parse_decimal(&maker.price),
            status,
            timestamp,
        });
    }
}

fn normalize_order(order: &UserOrderMessage) -> UserEvent {
    // CANCELLATION arrives in `type`; EXPIRED in `status`. Either way
    // the normalized status is the only thing the engine looks at.
    let status = match order.msg_type.as_str() {
        "CANCELLATION" => OrderStatus::Cancelled,
        _ => OrderStatus::parse(&order.status),
    };
    UserEvent {
        kind: UserEventKind::Order,
        order_id: order.id.to_lowercase(),
        token_id: order.asset_id.clone(),
        side: parse_side(&order.side),
        // Order events never carry a trustworthy fill size.
        size: Decimal::ZERO,
        price: parse_decimal(&order.price),
        status,
        timestamp: parse_ms_timestamp(order.timestamp.as_deref()),
    }
}

fn parse_side(s: &str) -> OrderSide {
    if s.eq_ignore_ascii_case("SELL") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    }
}

fn opposite(side: OrderSide) -> OrderSide {
    match side {
        OrderSide::Buy => OrderSide::Sell,
        OrderSide::Sell => OrderSide::Buy,
    }
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

fn parse_ms_timestamp(s: Option<&str>) -> DateTime<Utc> {
    s.and_then(|t| t.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade_frame() -> String {
        serde_json::json!({
            "event_type": "trade",
            "asset_id": "tok-taker",
            "id": "trade-1",
            "maker_orders": [
                {"asset_id": "tok-maker", "matched_amount": "10", "order_id": "0xMAKER1", "outcome": "Up", "owner": "o1", "price": "0.48"},
                {"asset_id": "tok-maker", "matched_amount": "11", "order_id": "0xMAKER2", "outcome": "Up", "owner": "o2", "price": "0.49"},
                {"asset_id": "tok-maker", "matched_amount": "10", "order_id": "0xMAKER3", "outcome": "Up", "owner": "o3", "price": "0.49"}
            ],
            "market": "0xcond",
            "price": "0.49",
            "side": "BUY",
            "size": "100",
            "status": "MATCHED",
            "taker_order_id": "0xTAKER",
            "timestamp": "1736452800000"
        })
        .to_string()
    }

    #[test]
    fn trade_taker_fill_is_sum_of_matched_amounts_not_size() {
        let events = normalize_frame(&trade_frame());
        let taker = events.iter().find(|e| e.order_id == "0xtaker").unwrap();
        // 10 + 11 + 10, never the requested 100.
        assert_eq!(taker.size, dec!(31));
        assert_eq!(taker.kind, UserEventKind::Trade);
        assert_eq!(taker.side, OrderSide::Buy);
        assert_eq!(taker.status, OrderStatus::Matched);
    }

    #[test]
    fn trade_expands_one_event_per_maker() {
        let events = normalize_frame(&trade_frame());
        assert_eq!(events.len(), 4); // taker + 3 makers
        let maker2 = events.iter().find(|e| e.order_id == "0xmaker2").unwrap();
        assert_eq!(maker2.size, dec!(11));
        assert_eq!(maker2.price, dec!(0.49));
        // Makers traded the opposite side of the taker.
        assert_eq!(maker2.side, OrderSide::Sell);
    }

    #[test]
    fn trade_order_ids_are_lowercased() {
        let events = normalize_frame(&trade_frame());
        assert!(events.iter().all(|e| e.order_id == e.order_id.to_lowercase()));
    }

    #[test]
    fn order_event_has_zero_size_and_terminal_status() {
        let frame = serde_json::json!({
            "event_type": "order",
            "asset_id": "tok",
            "id": "0xABC",
            "market": "0xcond",
            "original_size": "100",
            "price": "0.48",
            "side": "BUY",
            "size_matched": "40",
            "status": "CANCELLED",
            "type": "CANCELLATION"
        })
        .to_string();

        let events = normalize_frame(&frame);
        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.kind, UserEventKind::Order);
        assert_eq!(e.order_id, "0xabc");
        // size_matched is unreliable for non-GTC orders and must never
        // reach the ledger from an order event.
        assert_eq!(e.size, Decimal::ZERO);
        assert_eq!(e.status, OrderStatus::Cancelled);
    }

    #[test]
    fn array_frames_preserve_order() {
        let frame = format!(
            "[{},{}]",
            serde_json::json!({
                "event_type": "order",
                "asset_id": "tok",
                "id": "0xfirst",
                "price": "0.5",
                "side": "BUY",
                "status": "LIVE",
                "type": "PLACEMENT"
            }),
            serde_json::json!({
                "event_type": "order",
                "asset_id": "tok",
                "id": "0xsecond",
                "price": "0.5",
                "side": "BUY",
                "status": "CANCELLED",
                "type": "CANCELLATION"
            })
        );
        let events = normalize_frame(&frame);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].order_id, "0xfirst");
        assert_eq!(events[1].order_id, "0xsecond");
    }

    #[test]
    fn unparseable_frames_yield_nothing() {
        assert!(normalize_frame("not json").is_empty());
        assert!(normalize_frame("{\"event_type\": \"trade\"}").is_empty());
    }

    #[test]
    fn trade_with_no_makers_yields_nothing() {
        let frame = serde_json::json!({
            "event_type": "trade",
            "asset_id": "tok",
            "maker_orders": [],
            "price": "0.5",
            "side": "BUY",
            "size": "100",
            "status": "MATCHED",
            "taker_order_id": "0xT"
        })
        .to_string();
        assert!(normalize_frame(&frame).is_empty());
    }
}

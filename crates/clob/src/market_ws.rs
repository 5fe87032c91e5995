//! Market-channel WebSocket feed (the order-book side of the engine).
//!
//! Subscribes to the public market channel for a set of token IDs and
//! maintains the in-memory L2 books. Emits [`EngineEvent::PriceUpdate`]
//! into the strategy queue on every book mutation, in arrival order.
//!
//! Protocol notes, learned the hard way:
//!
//! - the keepalive is the literal text frame `PING` every 10 seconds,
//!   not a protocol ping; a failed send triggers reconnect;
//! - payloads are either full `book` snapshots or `price_change`
//!   deltas with the same level keys, applied strictly in order;
//! - on reconnect the cached books are NOT flushed; "last known"
//!   semantics stay available until a fresh snapshot replaces them;
//! - a silent token past the staleness threshold is reported with
//!   [`EngineEvent::BookStale`] but never synthesized.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use splitflip_core::events::EngineEvent;
use splitflip_core::types::OrderSide;

use crate::book::L2OrderBook;

/// Default market-channel WebSocket URL.
pub const MARKET_WS_URL: &str = "wss://ws-subscriptions-clob.polymarket.com/ws/market";

/// Keepalive cadence required by the venue.
const PING_INTERVAL: Duration = Duration::from_secs(10);

/// Errors from the market feed.
#[derive(Debug, Error)]
pub enum MarketWsError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Configuration for the market feed.
#[derive(Debug, Clone)]
pub struct MarketWsConfig {
    pub url: String,
    pub initial_reconnect_delay: Duration,
    pub max_reconnect_delay: Duration,
    /// Seconds without any message for a token before it is reported
    /// stale.
    pub stale_after: Duration,
}

impl Default for MarketWsConfig {
    fn default() -> Self {
        Self {
            url: MARKET_WS_URL.to_string(),
            initial_reconnect_delay: Duration::from_secs(1),
            max_reconnect_delay: Duration::from_secs(30),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// Handle to the market feed: book accessors plus subscription control.
#[derive(Clone)]
pub struct OrderBookFeed {
    books: Arc<RwLock<HashMap<String, L2OrderBook>>>,
    subscribed: Arc<Mutex<HashSet<String>>>,
    resubscribe_tx: mpsc::Sender<()>,
    shutdown_tx: mpsc::Sender<()>,
}

impl OrderBookFeed {
    /// Connects and subscribes to the given tokens. Book events are
    /// posted to `event_tx` in arrival order.
    pub async fn connect(
        tokens: Vec<String>,
        config: MarketWsConfig,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let books: Arc<RwLock<HashMap<String, L2OrderBook>>> =
            Arc::new(RwLock::new(HashMap::new()));
        {
            let mut guard = books.write();
            for token in &tokens {
                guard.insert(token.clone(), L2OrderBook::new(token.clone()));
            }
        }

        let subscribed = Arc::new(Mutex::new(tokens.into_iter().collect::<HashSet<_>>()));
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (resubscribe_tx, resubscribe_rx) = mpsc::channel(4);

        tokio::spawn(run_connection_loop(
            config,
            Arc::clone(&subscribed),
            Arc::clone(&books),
            event_tx,
            shutdown_rx,
            resubscribe_rx,
        ));

        Self { books, subscribed, resubscribe_tx, shutdown_tx }
    }

    /// Adds tokens to the subscription. Idempotent; already-subscribed
    /// tokens are deduped and cause no traffic.
    pub async fn subscribe(&self, tokens: impl IntoIterator<Item = String>) {
        let mut added = false;
        {
            let mut guard = self.subscribed.lock().await;
            for token in tokens {
                if guard.insert(token.clone()) {
                    self.books
                        .write()
                        .entry(token.clone())
                        .or_insert_with(|| L2OrderBook::new(token));
                    added = true;
                }
            }
        }
        if added {
            let _ = self.resubscribe_tx.send(()).await;
        }
    }

    /// Best bid for a token; zero if unknown.
    #[must_use]
    pub fn best_bid(&self, token_id: &str) -> Decimal {
        self.books.read().get(token_id).map(L2OrderBook::best_bid).unwrap_or(Decimal::ZERO)
    }

    /// Best ask for a token; zero if unknown.
    #[must_use]
    pub fn best_ask(&self, token_id: &str) -> Decimal {
        self.books.read().get(token_id).map(L2OrderBook::best_ask).unwrap_or(Decimal::ZERO)
    }

    /// Cumulative depth up to `price` on the requested side.
    #[must_use]
    pub fn available_quantity_at_price(
        &self,
        token_id: &str,
        price: Decimal,
        side: OrderSide,
    ) -> Decimal {
        self.books
            .read()
            .get(token_id)
            .map(|b| b.available_quantity_at_price(price, side))
            .unwrap_or(Decimal::ZERO)
    }

    /// Snapshot of the current book for a token.
    #[must_use]
    pub fn book(&self, token_id: &str) -> Option<L2OrderBook> {
        self.books.read().get(token_id).cloned()
    }

    /// Gracefully shuts down the connection task.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

// =============================================================================
// Wire types
// =============================================================================

#[derive(Debug, Serialize)]
struct SubscriptionMessage<'a> {
    assets_ids: &'a [String],
    #[serde(rename = "type")]
    msg_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct WsMessage {
    event_type: String,
    #[serde(flatten)]
    data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BookMessage {
    asset_id: String,
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
    #[serde(default)]
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

fn parse_levels(raw: &[RawLevel]) -> Vec<(Decimal, Decimal)> {
    raw.iter()
        .filter_map(|l| {
            let price = l.price.parse::<Decimal>().ok()?;
            let size = l.size.parse::<Decimal>().ok()?;
            Some((price, size))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct PriceChangeMessage {
    #[serde(default)]
    price_changes: Vec<PriceChange>,
    // Single-change format (legacy/alternative).
    #[serde(default)]
    asset_id: Option<String>,
    #[serde(default)]
    price: Option<String>,
    #[serde(default)]
    size: Option<String>,
    #[serde(default)]
    side: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PriceChange {
    asset_id: String,
    price: String,
    size: String,
    side: String,
}

#[derive(Debug, Deserialize)]
struct LastTradeMessage {
    asset_id: String,
    price: String,
    #[serde(default)]
    size: Option<String>,
}

// =============================================================================
// Connection loop
// =============================================================================

async fn run_connection_loop(
    config: MarketWsConfig,
    subscribed: Arc<Mutex<HashSet<String>>>,
    books: Arc<RwLock<HashMap<String, L2OrderBook>>>,
    event_tx: mpsc::Sender<EngineEvent>,
    mut shutdown_rx: mpsc::Receiver<()>,
    mut resubscribe_rx: mpsc::Receiver<()>,
) {
    let mut reconnect_delay = config.initial_reconnect_delay;

    loop {
        if shutdown_rx.try_recv().is_ok() {
            info!("market feed shutdown requested");
            break;
        }

        info!(url = %config.url, "connecting to market channel");

        match connect_and_run(
            &config,
            &subscribed,
            &books,
            &event_tx,
            &mut shutdown_rx,
            &mut resubscribe_rx,
        )
        .await
        {
            Ok(()) => {
                info!("market channel closed cleanly");
                break;
            }
            Err(e) => {
                error!(error = %e, "market channel connection failed");
                let _ = event_tx
                    .send(EngineEvent::FeedDown { reason: e.to_string() })
                    .await;

                info!(delay = ?reconnect_delay, "waiting before reconnect");
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(config.max_reconnect_delay);
            }
        }
    }
}

async fn connect_and_run(
    config: &MarketWsConfig,
    subscribed: &Arc<Mutex<HashSet<String>>>,
    books: &Arc<RwLock<HashMap<String, L2OrderBook>>>,
    event_tx: &mpsc::Sender<EngineEvent>,
    shutdown_rx: &mut mpsc::Receiver<()>,
    resubscribe_rx: &mut mpsc::Receiver<()>,
) -> Result<(), MarketWsError> {
    let (ws_stream, _response) = connect_async(&config.url)
        .await
        .map_err(|e| MarketWsError::ConnectionFailed(e.to_string()))?;

    info!("market channel connected");

    let (mut write, mut read) = ws_stream.split();

    send_subscription(&mut write, subscribed).await?;

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    ping_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Last-seen instants per token drive staleness reporting.
    let mut last_seen: HashMap<String, Instant> = HashMap::new();
    let mut reported_stale: HashSet<String> = HashSet::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("shutdown signal received, closing market channel");
                let _ = write.close().await;
                return Ok(());
            }

            _ = resubscribe_rx.recv() => {
                debug!("subscription set changed, re-sending frame");
                send_subscription(&mut write, subscribed).await?;
            }

            // The venue expects the literal text "PING" every 10 s; a
            // missed cycle means the connection is gone.
            _ = ping_interval.tick() => {
                if let Err(e) = write.send(Message::Text("PING".to_string())).await {
                    warn!(error = %e, "keepalive send failed");
                    return Err(MarketWsError::WebSocket(e));
                }
                report_stale_books(
                    subscribed,
                    &last_seen,
                    &mut reported_stale,
                    config.stale_after,
                    event_tx,
                ).await;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text == "PONG" {
                            continue;
                        }
                        if let Err(e) = process_message(
                            &text, books, event_tx, &mut last_seen, &mut reported_stale,
                        ).await {
                            warn!(error = %e, "failed to process market message");
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        write.send(Message::Pong(data)).await?;
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "received close frame");
                        return Err(MarketWsError::ConnectionFailed(
                            frame.map(|f| f.reason.to_string())
                                .unwrap_or_else(|| "connection closed".to_string()),
                        ));
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        error!(error = %e, "market channel error");
                        return Err(MarketWsError::WebSocket(e));
                    }
                    None => {
                        return Err(MarketWsError::ConnectionFailed("stream ended".to_string()));
                    }
                }
            }
        }
    }
}

async fn send_subscription<S>(
    write: &mut S,
    subscribed: &Arc<Mutex<HashSet<String>>>,
) -> Result<(), MarketWsError>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let tokens: Vec<String> = subscribed.lock().await.iter().cloned().collect();
    let sub_msg = SubscriptionMessage { assets_ids: &tokens, msg_type: "market" };
    let sub_json = serde_json::to_string(&sub_msg)?;
    debug!(tokens = tokens.len(), "sending market subscription");
    write
        .send(Message::Text(sub_json))
        .await
        .map_err(MarketWsError::WebSocket)
}

async fn report_stale_books(
    subscribed: &Arc<Mutex<HashSet<String>>>,
    last_seen: &HashMap<String, Instant>,
    reported_stale: &mut HashSet<String>,
    stale_after: Duration,
    event_tx: &mpsc::Sender<EngineEvent>,
) {
    let tokens: Vec<String> = subscribed.lock().await.iter().cloned().collect();
    for token in tokens {
        let silent = last_seen.get(&token).map(Instant::elapsed);
        let is_stale = silent.map_or(false, |d| d >= stale_after);
        if is_stale && reported_stale.insert(token.clone()) {
            let silent_secs = silent.unwrap_or_default().as_secs();
            warn!(token_id = %token, silent_secs, "book is stale");
            let _ = event_tx
                .send(EngineEvent::BookStale { token_id: token, silent_secs })
                .await;
        }
    }
}

/// Processes one market-channel text frame. Frames may carry a single
/// message or an array; deltas are applied in payload order.
async fn process_message(
    text: &str,
    books: &Arc<RwLock<HashMap<String, L2OrderBook>>>,
    event_tx: &mpsc::Sender<EngineEvent>,
    last_seen: &mut HashMap<String, Instant>,
    reported_stale: &mut HashSet<String>,
) -> Result<(), MarketWsError> {
    let messages: Vec<WsMessage> = if text.trim_start().starts_with('[') {
        serde_json::from_str(text)?
    } else {
        vec![serde_json::from_str(text)?]
    };

    for msg in messages {
        match msg.event_type.as_str() {
            "book" => {
                let book_msg: BookMessage = serde_json::from_value(msg.data)?;
                last_seen.insert(book_msg.asset_id.clone(), Instant::now());
                reported_stale.remove(&book_msg.asset_id);
                apply_snapshot(&book_msg, books);
                let _ = event_tx
                    .send(EngineEvent::PriceUpdate { token_id: book_msg.asset_id })
                    .await;
            }
            "price_change" => {
                let change_msg: PriceChangeMessage = serde_json::from_value(msg.data)?;
                for change in &change_msg.price_changes {
                    last_seen.insert(change.asset_id.clone(), Instant::now());
                    reported_stale.remove(&change.asset_id);
                    apply_delta(&change.asset_id, &change.price, &change.size, &change.side, books);
                    let _ = event_tx
                        .send(EngineEvent::PriceUpdate { token_id: change.asset_id.clone() })
                        .await;
                }
                if let (Some(asset_id), Some(price), Some(size), Some(side)) = (
                    change_msg.asset_id.as_ref(),
                    change_msg.price.as_ref(),
                    change_msg.size.as_ref(),
                    change_msg.side.as_ref(),
                ) {
                    last_seen.insert(asset_id.clone(), Instant::now());
                    reported_stale.remove(asset_id);
                    apply_delta(asset_id, price, size, side, books);
                    let _ = event_tx
                        .send(EngineEvent::PriceUpdate { token_id: asset_id.clone() })
                        .await;
                }
            }
            "last_trade_price" => {
                let trade_msg: LastTradeMessage = serde_json::from_value(msg.data)?;
                last_seen.insert(trade_msg.asset_id.clone(), Instant::now());
                reported_stale.remove(&trade_msg.asset_id);
                let price = trade_msg.price.parse::<Decimal>().unwrap_or(Decimal::ZERO);
                let size = trade_msg
                    .size
                    .as_deref()
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .unwrap_or(Decimal::ZERO);
                let _ = event_tx
                    .send(EngineEvent::MarketTrade {
                        token_id: trade_msg.asset_id,
                        price,
                        size,
                    })
                    .await;
            }
            "tick_size_change" => {
                debug!(event_type = %msg.event_type, "ignoring market event");
            }
            other => {
                debug!(event_type = %other, "unknown market event type");
            }
        }
    }

    Ok(())
}

fn apply_snapshot(msg: &BookMessage, books: &Arc<RwLock<HashMap<String, L2OrderBook>>>) {
    let bids = parse_levels(&msg.bids);
    let asks = parse_levels(&msg.asks);
    let timestamp_ms = msg.timestamp.as_ref().and_then(|t| t.parse::<i64>().ok());

    let mut guard = books.write();
    let book = guard
        .entry(msg.asset_id.clone())
        .or_insert_with(|| L2OrderBook::new(msg.asset_id.clone()));
    book.apply_snapshot(bids, asks);
    book.last_update_ms = timestamp_ms;

    debug!(
        asset_id = %msg.asset_id,
        best_bid = %book.best_bid(),
        best_ask = %book.best_ask(),
        "applied book snapshot"
    );
}

fn apply_delta(
    asset_id: &str,
    price_str: &str,
    size_str: &str,
    side_str: &str,
    books: &Arc<RwLock<HashMap<String, L2OrderBook>>>,
) {
    let price = price_str.parse::<Decimal>().unwrap_or(Decimal::ZERO);
    let size = size_str.parse::<Decimal>().unwrap_or(Decimal::ZERO);
    let side = if side_str.eq_ignore_ascii_case("SELL") {
        OrderSide::Sell
    } else {
        OrderSide::Buy
    };

    let mut guard = books.write();
    let book = guard
        .entry(asset_id.to_string())
        .or_insert_with(|| L2OrderBook::new(asset_id.to_string()));
    book.apply_delta(side, price, size);
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn books_with(token: &str) -> Arc<RwLock<HashMap<String, L2OrderBook>>> {
        let books = Arc::new(RwLock::new(HashMap::new()));
        books.write().insert(token.to_string(), L2OrderBook::new(token.to_string()));
        books
    }

    #[tokio::test]
    async fn snapshot_message_replaces_book_and_emits_update() {
        let books = books_with("tok");
        let (tx, mut rx) = mpsc::channel(16);
        let mut last_seen = HashMap::new();
        let mut reported = HashSet::new();

        let frame = serde_json::json!({
            "event_type": "book",
            "asset_id": "tok",
            "market": "0xcond",
            "bids": [{"price": "0.48", "size": "30"}],
            "asks": [{"price": "0.52", "size": "25"}],
            "timestamp": "1736452800000",
            "hash": "0xh"
        })
        .to_string();

        process_message(&frame, &books, &tx, &mut last_seen, &mut reported)
            .await
            .unwrap();

        let book = books.read().get("tok").cloned().unwrap();
        assert_eq!(book.best_bid(), dec!(0.48));
        assert_eq!(book.best_ask(), dec!(0.52));
        assert_eq!(book.last_update_ms, Some(1736452800000));

        match rx.try_recv().unwrap() {
            EngineEvent::PriceUpdate { token_id } => assert_eq!(token_id, "tok"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn delta_array_applies_in_order() {
        let books = books_with("tok");
        let (tx, mut rx) = mpsc::channel(16);
        let mut last_seen = HashMap::new();
        let mut reported = HashSet::new();

        let snapshot = serde_json::json!({
            "event_type": "book",
            "asset_id": "tok",
            "bids": [{"price": "0.48", "size": "30"}],
            "asks": [{"price": "0.52", "size": "25"}]
        })
        .to_string();
        process_message(&snapshot, &books, &tx, &mut last_seen, &mut reported).await.unwrap();

        // Two deltas in one frame: set then remove the same bid level.
        let deltas = serde_json::json!({
            "event_type": "price_change",
            "market": "0xcond",
            "price_changes": [
                {"asset_id": "tok", "price": "0.49", "size": "10", "side": "BUY"},
                {"asset_id": "tok", "price": "0.49", "size": "0", "side": "BUY"}
            ]
        })
        .to_string();
        process_message(&deltas, &books, &tx, &mut last_seen, &mut reported).await.unwrap();

        let book = books.read().get("tok").cloned().unwrap();
        // Applied in order: the removal wins.
        assert_eq!(book.best_bid(), dec!(0.48));

        // Three price updates total (snapshot + two deltas).
        let mut count = 0;
        while rx.try_recv().is_ok() {
            count += 1;
        }
        assert_eq!(count, 3);
    }

    #[tokio::test]
    async fn last_trade_price_becomes_market_trade() {
        let books = books_with("tok");
        let (tx, mut rx) = mpsc::channel(4);
        let mut last_seen = HashMap::new();
        let mut reported = HashSet::new();

        let frame = serde_json::json!({
            "event_type": "last_trade_price",
            "asset_id": "tok",
            "price": "0.52",
            "size": "40",
            "side": "BUY"
        })
        .to_string();
        process_message(&frame, &books, &tx, &mut last_seen, &mut reported).await.unwrap();

        match rx.try_recv().unwrap() {
            EngineEvent::MarketTrade { token_id, price, size } => {
                assert_eq!(token_id, "tok");
                assert_eq!(price, dec!(0.52));
                assert_eq!(size, dec!(40));
            }
            other => panic!("unexpected event {other:?}"),
        }
        // A trade print counts as feed liveness for the token.
        assert!(last_seen.contains_key("tok"));
    }

    #[tokio::test]
    async fn unknown_event_types_are_ignored() {
        let books = books_with("tok");
        let (tx, mut rx) = mpsc::channel(4);
        let mut last_seen = HashMap::new();
        let mut reported = HashSet::new();

        let frame = serde_json::json!({
            "event_type": "tick_size_change",
            "asset_id": "tok",
            "old_tick_size": "0.01",
            "new_tick_size": "0.001"
        })
        .to_string();
        process_message(&frame, &books, &tx, &mut last_seen, &mut reported).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn feed_accessors_default_to_zero() {
        let (shutdown_tx, _shutdown_rx) = mpsc::channel(1);
        let (resubscribe_tx, _resubscribe_rx) = mpsc::channel(1);
        let feed = OrderBookFeed {
            books: Arc::new(RwLock::new(HashMap::new())),
            subscribed: Arc::new(Mutex::new(HashSet::new())),
            resubscribe_tx,
            shutdown_tx,
        };
        assert_eq!(feed.best_bid("missing"), Decimal::ZERO);
        assert_eq!(feed.best_ask("missing"), Decimal::ZERO);
        assert_eq!(
            feed.available_quantity_at_price("missing", dec!(0.5), OrderSide::Sell),
            Decimal::ZERO
        );
        assert!(feed.book("missing").is_none());
    }
}

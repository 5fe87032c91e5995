//! Signed order placement and cancellation.
//!
//! The executor owns the write path to the venue: it signs orders with
//! EIP-712, attaches L2 HMAC headers, enforces the venue's price/size
//! policy before anything leaves the process, and meters requests
//! through governor token buckets (order create 60/s, cancel 30/s
//! sustained).
//!
//! The venue applies a 500 ms taker-protection delay to incoming
//! marketable orders, so any GTC that rests at least that long cannot
//! be adversarially taken in the same slot; the strategies lean on
//! this when chasing with cancel-replace.
//!
//! A failed placement is never treated as placed: callers get a typed
//! error and decide next tick. The executor never touches the ledger.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use splitflip_core::types::{clamp_to_book, round_to_tick, OrderSide, OrderType};

use crate::auth::ApiCreds;
use crate::eip712::{self, BuildOrderParams, SIDE_BUY, SIDE_SELL};
use crate::wallet::Wallet;

/// Platform minimum order value in USDC.
pub const MIN_ORDER_VALUE: Decimal = Decimal::ONE;

/// Data API base URL (positions, balances).
pub const DATA_API_URL: &str = "https://data-api.polymarket.com";

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum retries for transient errors.
const DEFAULT_MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff.
const BASE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Maximum retry delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(5);

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

// =============================================================================
// Errors
// =============================================================================

/// Errors from CLOB order operations.
#[derive(Debug, Error)]
pub enum ClobError {
    /// HTTP request failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Failed to parse API response.
    #[error("failed to parse response: {0}")]
    Parse(String),

    /// Authentication failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Order was rejected by the exchange.
    #[error("order rejected: {0}")]
    OrderRejected(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// Order value below the platform minimum.
    #[error("order value {value} below platform minimum {MIN_ORDER_VALUE}")]
    BelowMinimum { value: Decimal },

    /// Price outside the valid band after rounding.
    #[error("invalid price {0}")]
    InvalidPrice(Decimal),

    /// Signing failed.
    #[error("signing failed: {0}")]
    Signing(String),
}

impl ClobError {
    /// True if the operation may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClobError::Http(_)
                | ClobError::RateLimited { .. }
                | ClobError::Api { status: 500..=599, .. }
        )
    }
}

// =============================================================================
// Types
// =============================================================================

/// Low-level specification for one signed order.
#[derive(Debug, Clone)]
pub struct OrderSpec {
    pub token_id: String,
    pub side: OrderSide,
    pub price: Decimal,
    pub size: Decimal,
    pub order_type: OrderType,
    /// Expiration for GTD orders, unix seconds. Ignored otherwise.
    pub expiration: Option<u64>,
    pub neg_risk: bool,
    pub fee_rate_bps: u16,
    pub tick_size: Decimal,
}

/// Result of a successful order placement.
#[derive(Debug, Clone)]
pub struct PlacedOrder {
    /// Venue order ID, lowercased for all later lookups.
    pub order_id: String,
    /// Raw status string from the create response ("live", "matched", ...).
    pub status: String,
    /// Price actually submitted after tick rounding.
    pub price: Decimal,
    /// Size actually submitted.
    pub size: Decimal,
}

/// An open order as reported by `GET /orders`.
#[derive(Debug, Clone, Deserialize)]
pub struct OpenOrder {
    pub id: String,
    pub asset_id: String,
    pub side: String,
    pub price: String,
    pub original_size: String,
    #[serde(default)]
    pub size_matched: String,
    #[serde(default)]
    pub market: String,
}

/// A wallet position from the Data API.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletPosition {
    /// Token ID held.
    pub asset: String,
    pub condition_id: String,
    pub size: String,
    pub avg_price: String,
    pub cur_price: String,
    /// True once the market has resolved.
    pub redeemable: bool,
    pub outcome: String,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    #[serde(default)]
    pub slug: String,
}

#[derive(Debug, Deserialize)]
struct CreateOrderResponse {
    #[serde(alias = "orderID", alias = "orderId")]
    order_id: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default, alias = "errorMsg")]
    error_msg: Option<String>,
}

// =============================================================================
// Executor
// =============================================================================

/// Authenticated order executor.
pub struct OrderExecutor {
    http: Client,
    base_url: String,
    wallet: Arc<Wallet>,
    creds: ApiCreds,
    submit_limiter: Arc<DirectLimiter>,
    cancel_limiter: Arc<DirectLimiter>,
    max_retries: u32,
}

impl OrderExecutor {
    /// Creates a new executor.
    ///
    /// Buckets default to the venue's published sustained rates:
    /// 60 order creates and 30 cancels per second.
    ///
    /// # Errors
    ///
    /// Returns `ClobError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: &str, wallet: Arc<Wallet>, creds: ApiCreds) -> Result<Self, ClobError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .tcp_nodelay(true)
            .build()
            .map_err(ClobError::Http)?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet,
            creds,
            submit_limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(60u32)))),
            cancel_limiter: Arc::new(RateLimiter::direct(Quota::per_second(nonzero!(30u32)))),
            max_retries: DEFAULT_MAX_RETRIES,
        })
    }

    /// Returns the funder address orders are placed for.
    #[must_use]
    pub fn funder(&self) -> &str {
        self.wallet.funder()
    }

    // =========================================================================
    // Typed order operations
    // =========================================================================

    /// Posts a good-till-cancelled limit buy.
    pub async fn buy_gtc(
        &self,
        token_id: &str,
        size: Decimal,
        price: Decimal,
        neg_risk: bool,
        tick_size: Decimal,
    ) -> Result<PlacedOrder, ClobError> {
        self.place_with_retry(&OrderSpec {
            token_id: token_id.to_string(),
            side: OrderSide::Buy,
            price,
            size,
            order_type: OrderType::Gtc,
            expiration: None,
            neg_risk,
            fee_rate_bps: 0,
            tick_size,
        })
        .await
    }

    /// Posts a good-till-date limit buy expiring at `expiration` (unix
    /// seconds).
    pub async fn buy_gtd(
        &self,
        token_id: &str,
        size: Decimal,
        price: Decimal,
        expiration: u64,
        neg_risk: bool,
        tick_size: Decimal,
    ) -> Result<PlacedOrder, ClobError> {
        self.place_with_retry(&OrderSpec {
            token_id: token_id.to_string(),
            side: OrderSide::Buy,
            price,
            size,
            order_type: OrderType::Gtd,
            expiration: Some(expiration),
            neg_risk,
            fee_rate_bps: 0,
            tick_size,
        })
        .await
    }

    /// Immediate-or-cancel buy of `amount_usd` worth at up to
    /// `max_price`; any unfilled portion is dropped by the venue.
    ///
    /// On fee-bearing markets the limit price is padded by the taker
    /// fee so the fill is not rejected for crossing it.
    pub async fn buy_fak(
        &self,
        token_id: &str,
        amount_usd: Decimal,
        max_price: Decimal,
        fee_rate_bps: u16,
        neg_risk: bool,
        tick_size: Decimal,
    ) -> Result<PlacedOrder, ClobError> {
        let price = taker_price(max_price, fee_rate_bps, tick_size);
        if price <= Decimal::ZERO {
            return Err(ClobError::InvalidPrice(price));
        }
        let size = amount_usd / price;
        self.place_with_retry(&OrderSpec {
            token_id: token_id.to_string(),
            side: OrderSide::Buy,
            price,
            size,
            order_type: OrderType::Fak,
            expiration: None,
            neg_risk,
            fee_rate_bps,
            tick_size,
        })
        .await
    }

    /// Fill-or-kill buy of `amount_usd` worth at up to `max_price`.
    pub async fn buy_fok(
        &self,
        token_id: &str,
        amount_usd: Decimal,
        max_price: Decimal,
        fee_rate_bps: u16,
        neg_risk: bool,
        tick_size: Decimal,
    ) -> Result<PlacedOrder, ClobError> {
        let price = taker_price(max_price, fee_rate_bps, tick_size);
        if price <= Decimal::ZERO {
            return Err(ClobError::InvalidPrice(price));
        }
        let size = amount_usd / price;
        self.place_with_retry(&OrderSpec {
            token_id: token_id.to_string(),
            side: OrderSide::Buy,
            price,
            size,
            order_type: OrderType::Fok,
            expiration: None,
            neg_risk,
            fee_rate_bps,
            tick_size,
        })
        .await
    }

    /// Posts a good-till-cancelled limit sell. Sellable only when
    /// shares are held; the venue rejects otherwise.
    pub async fn sell_gtc(
        &self,
        token_id: &str,
        size: Decimal,
        price: Decimal,
        neg_risk: bool,
        tick_size: Decimal,
    ) -> Result<PlacedOrder, ClobError> {
        self.place_with_retry(&OrderSpec {
            token_id: token_id.to_string(),
            side: OrderSide::Sell,
            price,
            size,
            order_type: OrderType::Gtc,
            expiration: None,
            neg_risk,
            fee_rate_bps: 0,
            tick_size,
        })
        .await
    }

    // =========================================================================
    // Placement
    // =========================================================================

    /// Places an order, retrying transient failures with exponential
    /// backoff up to the configured retry count.
    pub async fn place_with_retry(&self, spec: &OrderSpec) -> Result<PlacedOrder, ClobError> {
        let mut delay = BASE_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match self.place(spec).await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %e,
                        delay_ms = delay.as_millis(),
                        "order submission failed, retrying"
                    );
                    if let ClobError::RateLimited { retry_after_ms } = &e {
                        delay = delay.max(Duration::from_millis(*retry_after_ms));
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Validates, signs, and submits a single order.
    async fn place(&self, spec: &OrderSpec) -> Result<PlacedOrder, ClobError> {
        let price = clamp_to_book(round_to_tick(spec.price, spec.tick_size), spec.tick_size);
        if price <= Decimal::ZERO || price >= Decimal::ONE {
            return Err(ClobError::InvalidPrice(price));
        }
        let value = spec.size * price;
        if value < MIN_ORDER_VALUE {
            return Err(ClobError::BelowMinimum { value });
        }

        let side_u8 = match spec.side {
            OrderSide::Buy => SIDE_BUY,
            OrderSide::Sell => SIDE_SELL,
        };
        let expiration = match spec.order_type {
            OrderType::Gtd => spec.expiration.unwrap_or_else(|| unix_now() + 60),
            _ => 0,
        };

        let order = eip712::build_order(&BuildOrderParams {
            wallet: &self.wallet,
            token_id: &spec.token_id,
            side: side_u8,
            price,
            size: spec.size,
            expiration_secs: expiration,
            nonce: 0,
            fee_rate_bps: spec.fee_rate_bps,
        })
        .map_err(|e| ClobError::Signing(e.to_string()))?;

        let signature = eip712::sign_order(&order, &self.wallet, spec.neg_risk)
            .map_err(|e| ClobError::Signing(e.to_string()))?;

        // GTD is encoded as GTC plus a signed expiration.
        let order_type_str = match spec.order_type {
            OrderType::Gtc | OrderType::Gtd => "GTC",
            OrderType::Fok => "FOK",
            OrderType::Fak => "FAK",
        };

        let body = serde_json::json!({
            "owner": self.creds.api_key,
            "orderType": order_type_str,
            "order": {
                "salt": order.salt.to_string(),
                "maker": self.wallet.funder(),
                "signer": self.wallet.address(),
                "taker": "0x0000000000000000000000000000000000000000",
                "tokenId": spec.token_id,
                "makerAmount": order.maker_amount.to_string(),
                "takerAmount": order.taker_amount.to_string(),
                "expiration": order.expiration.to_string(),
                "nonce": order.nonce.to_string(),
                "feeRateBps": order.fee_rate_bps.to_string(),
                "side": order.side.to_string(),
                "signatureType": order.signature_type,
                "signature": signature,
            }
        });
        let body_str = body.to_string();

        self.submit_limiter.until_ready().await;

        info!(
            token_id = %spec.token_id,
            side = %spec.side,
            order_type = %spec.order_type,
            %price,
            size = %spec.size,
            "submitting order"
        );

        let response = self
            .post_signed("/order", &body_str)
            .await?;

        let parsed: CreateOrderResponse = serde_json::from_str(&response)
            .map_err(|e| ClobError::Parse(format!("order response: {e} - body: {response}")))?;

        if parsed.success == Some(false) {
            return Err(ClobError::OrderRejected(
                parsed.error_msg.unwrap_or_else(|| "unspecified".to_string()),
            ));
        }

        Ok(PlacedOrder {
            order_id: parsed.order_id.to_lowercase(),
            status: parsed.status,
            price,
            size: spec.size,
        })
    }

    // =========================================================================
    // Cancellation and queries
    // =========================================================================

    /// Cancels a single order by ID.
    pub async fn cancel_order(&self, order_id: &str) -> Result<(), ClobError> {
        self.cancel_limiter.until_ready().await;
        let body = serde_json::json!({ "orderID": order_id }).to_string();
        info!(order_id = %order_id, "cancelling order");
        self.delete_signed("/order", &body).await?;
        Ok(())
    }

    /// Cancels all open orders, optionally scoped to one market.
    /// A duplicate cancel (order already gone) is success.
    pub async fn cancel_all(&self, condition_id: Option<&str>) -> Result<(), ClobError> {
        self.cancel_limiter.until_ready().await;
        match condition_id {
            Some(market) => {
                let body = serde_json::json!({ "market": market }).to_string();
                info!(%market, "cancelling all orders in market");
                self.delete_signed("/cancel-market-orders", &body).await?;
            }
            None => {
                info!("cancelling all open orders");
                self.delete_signed("/cancel-all", "").await?;
            }
        }
        Ok(())
    }

    /// Lists open orders, optionally scoped to one market.
    pub async fn get_open_orders(
        &self,
        condition_id: Option<&str>,
    ) -> Result<Vec<OpenOrder>, ClobError> {
        let path = match condition_id {
            Some(market) => format!("/orders?market={}", urlencoding::encode(market)),
            None => "/orders".to_string(),
        };
        let headers = self
            .creds
            .l2_headers(self.wallet.address(), "GET", &path, "")
            .map_err(|e| ClobError::Auth(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self.http.get(&url);
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        let response = req.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClobError::Api { status: status.as_u16(), message: body });
        }
        let mut orders: Vec<OpenOrder> =
            serde_json::from_str(&body).map_err(|e| ClobError::Parse(e.to_string()))?;
        for order in &mut orders {
            order.id = order.id.to_lowercase();
        }
        Ok(orders)
    }

    // =========================================================================
    // Account queries (Data API)
    // =========================================================================

    /// USDC balance of the funder wallet.
    pub async fn get_balance(&self) -> Result<Decimal, ClobError> {
        let url = format!("{}/value?user={}", DATA_API_URL, self.wallet.funder());
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClobError::Api { status: status.as_u16(), message: body });
        }
        let value: serde_json::Value =
            serde_json::from_str(&body).map_err(|e| ClobError::Parse(e.to_string()))?;
        let raw = value
            .get("value")
            .or_else(|| value.get("usdc"))
            .and_then(|v| v.as_str().map(str::to_string).or_else(|| v.as_f64().map(|f| f.to_string())))
            .unwrap_or_else(|| "0".to_string());
        raw.parse::<Decimal>()
            .map_err(|e| ClobError::Parse(format!("balance {raw}: {e}")))
    }

    /// All wallet positions from the Data API, the source of truth
    /// for held outcome tokens, including resolved redeemable ones.
    pub async fn get_positions(&self) -> Result<Vec<WalletPosition>, ClobError> {
        let url = format!(
            "{}/positions?user={}&sizeThreshold=0",
            DATA_API_URL,
            self.wallet.funder()
        );
        let response = self.http.get(&url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ClobError::Api { status: status.as_u16(), message: body });
        }
        serde_json::from_str(&body).map_err(|e| ClobError::Parse(format!("positions: {e}")))
    }

    // =========================================================================
    // Signed transport helpers
    // =========================================================================

    async fn post_signed(&self, path: &str, body: &str) -> Result<String, ClobError> {
        self.send_signed(reqwest::Method::POST, path, body).await
    }

    async fn delete_signed(&self, path: &str, body: &str) -> Result<String, ClobError> {
        self.send_signed(reqwest::Method::DELETE, path, body).await
    }

    async fn send_signed(
        &self,
        method: reqwest::Method,
        path: &str,
        body: &str,
    ) -> Result<String, ClobError> {
        let headers = self
            .creds
            .l2_headers(self.wallet.address(), method.as_str(), path, body)
            .map_err(|e| ClobError::Auth(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .request(method, &url)
            .header("Content-Type", "application/json");
        for (k, v) in &headers {
            req = req.header(k, v);
        }
        if !body.is_empty() {
            req = req.body(body.to_string());
        }

        let response = req.send().await?;
        let status = response.status();

        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1000);
            return Err(ClobError::RateLimited { retry_after_ms: retry_after });
        }

        let text = response.text().await?;
        if !status.is_success() {
            return Err(ClobError::Api { status: status.as_u16(), message: text });
        }
        debug!(%path, "signed request ok");
        Ok(text)
    }
}

/// Pads a taker limit price by the fee so fee-bearing fills are not
/// rejected, then re-rounds and clamps.
fn taker_price(max_price: Decimal, fee_rate_bps: u16, tick_size: Decimal) -> Decimal {
    if fee_rate_bps == 0 {
        return clamp_to_book(round_to_tick(max_price, tick_size), tick_size);
    }
    let fee = Decimal::from(fee_rate_bps) / Decimal::from(10_000u32);
    let padded = max_price * (Decimal::ONE + fee);
    clamp_to_book(round_to_tick(padded, tick_size), tick_size)
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use splitflip_core::config::WalletSettings;
    use wiremock::matchers::{header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn test_executor(base_url: &str) -> OrderExecutor {
        let wallet = Wallet::from_settings(
            &WalletSettings {
                private_key: TEST_KEY.to_string(),
                ..WalletSettings::default()
            },
            137,
        )
        .unwrap();
        let creds = ApiCreds {
            api_key: "key".to_string(),
            api_secret: base64::engine::general_purpose::URL_SAFE.encode(b"secret"),
            passphrase: "pass".to_string(),
        };
        OrderExecutor::new(base_url, Arc::new(wallet), creds).unwrap()
    }

    use base64::Engine as _;

    #[test]
    fn taker_price_pads_fee_and_rounds() {
        // 1000 bps = 10%; 0.50 * 1.10 = 0.55
        assert_eq!(taker_price(dec!(0.50), 1000, dec!(0.01)), dec!(0.55));
        // zero fee passes through (rounded)
        assert_eq!(taker_price(dec!(0.503), 0, dec!(0.01)), dec!(0.50));
        // padding cannot leave the valid band
        assert_eq!(taker_price(dec!(0.98), 1000, dec!(0.01)), dec!(0.99));
    }

    #[tokio::test]
    async fn below_minimum_is_typed_error_and_no_request() {
        // Server would fail the test if contacted: no mocks mounted.
        let mock_server = MockServer::start().await;
        let executor = test_executor(&mock_server.uri());

        let err = executor
            .buy_gtc("123", dec!(1), dec!(0.50), false, dec!(0.01))
            .await
            .unwrap_err();
        assert!(matches!(err, ClobError::BelowMinimum { value } if value == dec!(0.50)));
    }

    #[tokio::test]
    async fn place_gtc_success_lowercases_order_id() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .and(header_exists("POLY_SIGNATURE"))
            .and(header_exists("POLY_API_KEY"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderID": "0xABCDEF0123",
                "status": "live",
                "success": true
            })))
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        let placed = executor
            .buy_gtc("123", dec!(100), dec!(0.48), false, dec!(0.01))
            .await
            .unwrap();
        assert_eq!(placed.order_id, "0xabcdef0123");
        assert_eq!(placed.status, "live");
        assert_eq!(placed.price, dec!(0.48));
    }

    #[tokio::test]
    async fn rejected_order_is_not_retried() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderID": "",
                "success": false,
                "errorMsg": "not enough balance / allowance"
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        let err = executor
            .buy_gtc("123", dec!(100), dec!(0.48), false, dec!(0.01))
            .await
            .unwrap_err();
        assert!(matches!(err, ClobError::OrderRejected(msg) if msg.contains("allowance")));
    }

    #[tokio::test]
    async fn server_errors_are_retried_then_surface() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .expect(4) // initial + 3 retries
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        let err = executor
            .buy_gtc("123", dec!(100), dec!(0.48), false, dec!(0.01))
            .await
            .unwrap_err();
        assert!(matches!(err, ClobError::Api { status: 503, .. }));
    }

    #[tokio::test]
    async fn fak_sizes_from_usd_amount() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "orderID": "0xok",
                "status": "matched",
                "success": true
            })))
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        let placed = executor
            .buy_fak("123", dec!(50), dec!(0.50), 0, false, dec!(0.01))
            .await
            .unwrap();
        // $50 at 0.50 = 100 shares
        assert_eq!(placed.size, dec!(100));
        assert_eq!(placed.status, "matched");
    }

    #[tokio::test]
    async fn open_orders_scoped_and_lowercased() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/orders"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "id": "0xAA11",
                "asset_id": "123",
                "side": "BUY",
                "price": "0.48",
                "original_size": "100",
                "size_matched": "20",
                "market": "0xcond"
            }])))
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        let orders = executor.get_open_orders(Some("0xcond")).await.unwrap();
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].id, "0xaa11");
    }

    #[tokio::test]
    async fn cancel_order_sends_delete() {
        let mock_server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/order"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "canceled": ["0xaa11"]
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        let executor = test_executor(&mock_server.uri());
        executor.cancel_order("0xaa11").await.unwrap();
    }
}

//! Gas-free relayer client for split / merge / redeem.
//!
//! The relayer signs and submits conditional-token transactions on the
//! signer's behalf, paid for by the venue. Calls are serialized through
//! a 25/min token bucket (the relayer's published rate) and retried
//! with exponential backoff on transient failures.
//!
//! Idempotent outcomes (`ALREADY_REDEEMED`, `ALREADY_MERGED`, and
//! friends) are mapped to success: the shares are already where the
//! caller wanted them.
//!
//! All amounts are six-decimal fixed point ($1.00 = 1_000_000).

use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::auth::ApiCreds;
use crate::wallet::Wallet;

/// USDC.e collateral token on Polygon.
pub const COLLATERAL: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Conditional Tokens Framework contract on Polygon.
pub const CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";

/// Neg Risk adapter contract on Polygon.
pub const NEG_RISK_ADAPTER: &str = "0xd91E80cF2E7be2e162c6513ceD06f1dD0dA35296";

/// Root collection ID (no parent).
pub const PARENT_COLLECTION_ID: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

/// USDC raw-unit scale (6 decimals).
const UNITS: u32 = 1_000_000;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_RETRIES: u32 = 3;
const BASE_RETRY_DELAY: Duration = Duration::from_millis(500);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Errors from relayer operations.
#[derive(Debug, Error)]
pub enum RelayerError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("relayer error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse relayer response: {0}")]
    Parse(String),

    #[error("relayer rate limit, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error("authentication failed: {0}")]
    Auth(String),
}

impl RelayerError {
    /// True if the submission may succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayerError::Http(_)
                | RelayerError::RateLimited { .. }
                | RelayerError::Api { status: 500..=599, .. }
        )
    }
}

/// Result of a relayer submission.
#[derive(Debug, Clone)]
pub struct TxReceipt {
    /// Transaction hash when a new transaction was submitted; absent
    /// when the operation was already done.
    pub tx_hash: Option<String>,
    /// True when the relayer reported the operation as already
    /// performed (mapped to success).
    pub already_done: bool,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default, alias = "transactionHash", alias = "txHash")]
    transaction_hash: Option<String>,
    #[serde(default)]
    state: Option<String>,
    #[serde(default, alias = "errorMsg")]
    error: Option<String>,
}

/// Gas-free relayer client.
pub struct RelayerClient {
    http: Client,
    base_url: String,
    wallet: Arc<Wallet>,
    creds: ApiCreds,
    limiter: Arc<DirectLimiter>,
}

impl RelayerClient {
    /// Creates a relayer client metered at 25 submissions per minute.
    ///
    /// # Errors
    ///
    /// Returns `RelayerError::Http` if the HTTP client cannot be built.
    pub fn new(base_url: &str, wallet: Arc<Wallet>, creds: ApiCreds) -> Result<Self, RelayerError> {
        let http = Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(RelayerError::Http)?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            wallet,
            creds,
            limiter: Arc::new(RateLimiter::direct(Quota::per_minute(nonzero!(25u32)))),
        })
    }

    /// Splits `amount_usdc` into equal shares of every outcome.
    pub async fn split(
        &self,
        condition_id: &str,
        amount_usdc: Decimal,
        neg_risk: bool,
    ) -> Result<TxReceipt, RelayerError> {
        let amount = to_units6(amount_usdc)?;
        let (to, args) = if neg_risk {
            (
                NEG_RISK_ADAPTER,
                serde_json::json!([condition_id, amount.to_string()]),
            )
        } else {
            (
                CTF_ADDRESS,
                serde_json::json!([
                    COLLATERAL,
                    PARENT_COLLECTION_ID,
                    condition_id,
                    [1, 2],
                    amount.to_string()
                ]),
            )
        };
        self.submit("splitPosition", to, args, &format!("split {condition_id}"))
            .await
    }

    /// Merges `shares` pairs of all outcomes back into USDC
    /// ($1 per pair).
    pub async fn merge(
        &self,
        condition_id: &str,
        shares: Decimal,
        neg_risk: bool,
    ) -> Result<TxReceipt, RelayerError> {
        let amount = to_units6(shares)?;
        let (to, args) = if neg_risk {
            (
                NEG_RISK_ADAPTER,
                serde_json::json!([condition_id, amount.to_string()]),
            )
        } else {
            (
                CTF_ADDRESS,
                serde_json::json!([
                    COLLATERAL,
                    PARENT_COLLECTION_ID,
                    condition_id,
                    [1, 2],
                    amount.to_string()
                ]),
            )
        };
        self.submit("mergePositions", to, args, &format!("merge {condition_id}"))
            .await
    }

    /// Claims the settlement payout for an outcome of a resolved
    /// market. `shares` limits the claim on neg-risk markets; standard
    /// markets redeem the full balance of the index set.
    pub async fn redeem(
        &self,
        condition_id: &str,
        outcome_index: usize,
        neg_risk: bool,
        shares: Option<Decimal>,
    ) -> Result<TxReceipt, RelayerError> {
        let (to, args) = if neg_risk {
            // Neg-risk redeem takes per-outcome amounts.
            let amount = match shares {
                Some(s) => to_units6(s)?,
                None => 0,
            };
            let mut amounts = vec!["0".to_string(), "0".to_string()];
            if outcome_index < amounts.len() {
                amounts[outcome_index] = amount.to_string();
            }
            (NEG_RISK_ADAPTER, serde_json::json!([condition_id, amounts]))
        } else {
            let index_set = 1u8 << outcome_index;
            (
                CTF_ADDRESS,
                serde_json::json!([
                    COLLATERAL,
                    PARENT_COLLECTION_ID,
                    condition_id,
                    [index_set]
                ]),
            )
        };
        self.submit(
            "redeemPositions",
            to,
            args,
            &format!("redeem {condition_id} outcome {outcome_index}"),
        )
        .await
    }

    /// Submits one operation through the rate limiter with retries.
    async fn submit(
        &self,
        op: &str,
        to: &str,
        args: serde_json::Value,
        memo: &str,
    ) -> Result<TxReceipt, RelayerError> {
        let body = serde_json::json!({
            "from": self.wallet.funder(),
            "transactions": [{
                "method": op,
                "to": to,
                "args": args,
            }],
            "memo": memo,
        })
        .to_string();

        let mut delay = BASE_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            self.limiter.until_ready().await;
            match self.submit_once(&body, op).await {
                Ok(receipt) => return Ok(receipt),
                Err(e) if e.is_retryable() && attempt < MAX_RETRIES => {
                    attempt += 1;
                    warn!(op, attempt, error = %e, "relayer submission failed, retrying");
                    if let RelayerError::RateLimited { retry_after_ms } = &e {
                        delay = delay.max(Duration::from_millis(*retry_after_ms));
                    }
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_RETRY_DELAY);
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn submit_once(&self, body: &str, op: &str) -> Result<TxReceipt, RelayerError> {
        let path = "/submit";
        let headers = self
            .creds
            .l2_headers(self.wallet.address(), "POST", path, body)
            .map_err(|e| RelayerError::Auth(e.to_string()))?;

        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .http
            .post(&url)
            .header("Content-Type", "application/json")
            .body(body.to_string());
        for (k, v) in &headers {
            req = req.header(k, v);
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
                .unwrap_or(5000);
            return Err(RelayerError::RateLimited { retry_after_ms: retry_after });
        }

        let text = response.text().await?;

        if already_done(&text) {
            info!(op, "relayer reports operation already done");
            return Ok(TxReceipt { tx_hash: None, already_done: true });
        }

        if !status.is_success() {
            return Err(RelayerError::Api { status: status.as_u16(), message: text });
        }

        let parsed: SubmitResponse = serde_json::from_str(&text)
            .map_err(|e| RelayerError::Parse(format!("{e} - body: {text}")))?;

        if let Some(error) = parsed.error {
            if already_done(&error) {
                info!(op, "relayer reports operation already done");
                return Ok(TxReceipt { tx_hash: None, already_done: true });
            }
            return Err(RelayerError::Api { status: status.as_u16(), message: error });
        }

        info!(op, tx_hash = ?parsed.transaction_hash, state = ?parsed.state, "relayer submission accepted");
        Ok(TxReceipt { tx_hash: parsed.transaction_hash, already_done: false })
    }
}

/// Matches the relayer's idempotent-success markers.
fn already_done(text: &str) -> bool {
    let upper = text.to_ascii_uppercase();
    upper.contains("ALREADY_REDEEMED")
        || upper.contains("ALREADY_MERGED")
        || upper.contains("ALREADY_SPLIT")
        || upper.contains("ALREADY REDEEMED")
        || upper.contains("ALREADY MERGED")
}

/// Converts a USDC/share amount to six-decimal raw units.
fn to_units6(amount: Decimal) -> Result<u64, RelayerError> {
    if amount <= Decimal::ZERO {
        return Err(RelayerError::InvalidAmount(amount));
    }
    let scaled = (amount * Decimal::from(UNITS)).floor();
    scaled
        .to_string()
        .split('.')
        .next()
        .and_then(|s| s.parse::<u64>().ok())
        .ok_or(RelayerError::InvalidAmount(amount))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use rust_decimal_macros::dec;
    use splitflip_core::config::WalletSettings;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TEST_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn test_client(base_url: &str) -> RelayerClient {
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
        RelayerClient::new(base_url, Arc::new(wallet), creds).unwrap()
    }

    #[test]
    fn to_units6_floors_to_raw() {
        assert_eq!(to_units6(dec!(1)).unwrap(), 1_000_000);
        assert_eq!(to_units6(dec!(85)).unwrap(), 85_000_000);
        assert_eq!(to_units6(dec!(0.0000019)).unwrap(), 1);
        assert!(to_units6(Decimal::ZERO).is_err());
        assert!(to_units6(dec!(-5)).is_err());
    }

    #[test]
    fn already_done_markers() {
        assert!(already_done("{\"error\":\"ALREADY_REDEEMED\"}"));
        assert!(already_done("already merged"));
        assert!(!already_done("insufficient balance"));
    }

    #[tokio::test]
    async fn split_standard_uses_ctf_contract() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_string_contains("splitPosition"))
            .and(body_string_contains(CTF_ADDRESS))
            .and(body_string_contains("85000000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transactionHash": "0xsplit",
                "state": "STATE_EXECUTED"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let receipt = client.split("0xcond", dec!(85), false).await.unwrap();
        assert_eq!(receipt.tx_hash.as_deref(), Some("0xsplit"));
        assert!(!receipt.already_done);
    }

    #[tokio::test]
    async fn merge_neg_risk_uses_adapter() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_string_contains("mergePositions"))
            .and(body_string_contains(NEG_RISK_ADAPTER))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transactionHash": "0xmerge"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let receipt = client.merge("0xcond", dec!(60), true).await.unwrap();
        assert_eq!(receipt.tx_hash.as_deref(), Some("0xmerge"));
    }

    #[tokio::test]
    async fn redeem_already_done_maps_to_success() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "ALREADY_REDEEMED"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let receipt = client.redeem("0xcond", 0, false, None).await.unwrap();
        assert!(receipt.already_done);
        assert!(receipt.tx_hash.is_none());

        // Idempotent: calling again succeeds again.
        let receipt = client.redeem("0xcond", 0, false, None).await.unwrap();
        assert!(receipt.already_done);
    }

    #[tokio::test]
    async fn redeem_standard_uses_index_set() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .and(body_string_contains("redeemPositions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "transactionHash": "0xredeem"
            })))
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        // outcome 1 -> index set 2
        let receipt = client.redeem("0xcond", 1, false, None).await.unwrap();
        assert_eq!(receipt.tx_hash.as_deref(), Some("0xredeem"));
    }

    #[tokio::test]
    async fn permanent_error_surfaces() {
        let mock_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/submit"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad condition id"))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = test_client(&mock_server.uri());
        let err = client.merge("0xnope", dec!(10), false).await.unwrap_err();
        assert!(matches!(err, RelayerError::Api { status: 400, .. }));
    }
}

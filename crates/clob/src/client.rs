//! Public CLOB REST client with rate limiting.
//!
//! Read-only endpoints that need no authentication: order book
//! snapshots, midpoints, fee rates, tick sizes. Rate limited with the
//! governor crate.

use anyhow::{anyhow, Result};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Default CLOB API base URL.
pub const CLOB_API_URL: &str = "https://clob.polymarket.com";

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Public (unauthenticated) CLOB REST client.
pub struct PublicClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<DirectLimiter>,
}

#[derive(Debug, Deserialize)]
struct BookResponse {
    bids: Vec<RawLevel>,
    asks: Vec<RawLevel>,
}

#[derive(Debug, Deserialize)]
struct RawLevel {
    price: String,
    size: String,
}

#[derive(Debug, Deserialize)]
struct MidpointResponse {
    mid: String,
}

#[derive(Debug, Deserialize)]
struct FeeRateResponse {
    #[serde(alias = "fee_rate_bps")]
    base_fee: u32,
}

#[derive(Debug, Deserialize)]
struct TickSizeResponse {
    minimum_tick_size: Decimal,
}

/// A parsed order book snapshot from REST.
#[derive(Debug, Clone, Default)]
pub struct RestBook {
    /// Bid levels (price, size), best first.
    pub bids: Vec<(Decimal, Decimal)>,
    /// Ask levels (price, size), best first.
    pub asks: Vec<(Decimal, Decimal)>,
}

impl RestBook {
    #[must_use]
    pub fn best_bid(&self) -> Decimal {
        self.bids.first().map(|(p, _)| *p).unwrap_or(Decimal::ZERO)
    }

    #[must_use]
    pub fn best_ask(&self) -> Decimal {
        self.asks.first().map(|(p, _)| *p).unwrap_or(Decimal::ZERO)
    }
}

impl PublicClient {
    /// Creates a new client limited to 90 requests per second (60% of
    /// the venue's published 150/s read limit).
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(nonzero!(90u32))
    }

    /// Creates a new client with a custom per-second read limit.
    #[must_use]
    pub fn with_rate_limit(requests_per_second: NonZeroU32) -> Self {
        let quota = Quota::per_second(requests_per_second);
        Self {
            http: Client::new(),
            base_url: CLOB_API_URL.to_string(),
            rate_limiter: Arc::new(RateLimiter::direct(quota)),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Returns the base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Waits for rate limit and makes a GET request.
    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.rate_limiter.until_ready().await;

        let url = format!("{}{}", self.base_url, path);
        tracing::debug!("GET {}", url);

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("CLOB API error {}: {}", status, text));
        }

        Ok(response.json::<T>().await?)
    }

    /// Gets the order book snapshot for a token.
    pub async fn get_book(&self, token_id: &str) -> Result<RestBook> {
        let path = format!("/book?token_id={}", urlencoding::encode(token_id));
        let raw: BookResponse = self.get(&path).await?;
        Ok(RestBook {
            bids: parse_levels(&raw.bids),
            asks: parse_levels(&raw.asks),
        })
    }

    /// Gets the midpoint price for a token.
    pub async fn get_midpoint(&self, token_id: &str) -> Result<Decimal> {
        let path = format!("/midpoint?token_id={}", urlencoding::encode(token_id));
        let raw: MidpointResponse = self.get(&path).await?;
        raw.mid
            .parse::<Decimal>()
            .map_err(|e| anyhow!("invalid midpoint {}: {}", raw.mid, e))
    }

    /// Gets the fee rate (basis points) for a token.
    pub async fn get_fee_rate(&self, token_id: &str) -> Result<u32> {
        let path = format!("/fee-rate?token_id={}", urlencoding::encode(token_id));
        let raw: FeeRateResponse = self.get(&path).await?;
        Ok(raw.base_fee)
    }

    /// Gets the minimum tick size for a token.
    pub async fn get_tick_size(&self, token_id: &str) -> Result<Decimal> {
        let path = format!("/tick-size?token_id={}", urlencoding::encode(token_id));
        let raw: TickSizeResponse = self.get(&path).await?;
        Ok(raw.minimum_tick_size)
    }
}

impl Default for PublicClient {
    fn default() -> Self {
        Self::new()
    }
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

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn client_defaults() {
        let client = PublicClient::new();
        assert_eq!(client.base_url(), CLOB_API_URL);
    }

    #[tokio::test]
    async fn get_book_parses_levels() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/book"))
            .and(query_param("token_id", "tok-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "bids": [{"price": "0.48", "size": "100"}, {"price": "0.47", "size": "50"}],
                "asks": [{"price": "0.52", "size": "75"}]
            })))
            .mount(&mock_server)
            .await;

        let client = PublicClient::new().with_base_url(mock_server.uri());
        let book = client.get_book("tok-1").await.unwrap();
        assert_eq!(book.best_bid(), dec!(0.48));
        assert_eq!(book.best_ask(), dec!(0.52));
        assert_eq!(book.bids.len(), 2);
    }

    #[tokio::test]
    async fn get_midpoint_parses_decimal() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"mid": "0.565"})),
            )
            .mount(&mock_server)
            .await;

        let client = PublicClient::new().with_base_url(mock_server.uri());
        assert_eq!(client.get_midpoint("tok-1").await.unwrap(), dec!(0.565));
    }

    #[tokio::test]
    async fn get_fee_rate_accepts_both_field_names() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/fee-rate"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"base_fee": 1000})),
            )
            .mount(&mock_server)
            .await;

        let client = PublicClient::new().with_base_url(mock_server.uri());
        assert_eq!(client.get_fee_rate("tok-1").await.unwrap(), 1000);
    }

    #[tokio::test]
    async fn api_error_surfaces_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/midpoint"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        let client = PublicClient::new().with_base_url(mock_server.uri());
        let err = client.get_midpoint("tok-1").await.unwrap_err().to_string();
        assert!(err.contains("500"));
    }
}

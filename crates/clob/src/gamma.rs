//! Gamma catalog client for market discovery.
//!
//! Two discovery paths:
//!
//! - 15-minute Up/Down series, addressed deterministically by slug
//!   (`{coin}-updown-15m-{window_start}` with the window start aligned
//!   to 900-second boundaries);
//! - sports moneyline markets by league tag.
//!
//! The catalog returns `clobTokenIds` and `outcomes` as JSON strings
//! embedded in JSON; both are parsed here so callers only ever see
//! [`Market`] values.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use governor::{Quota, RateLimiter};
use nonzero_ext::nonzero;
use reqwest::Client;
use rust_decimal::Decimal;
use serde::Deserialize;
use splitflip_core::types::{Market, Outcome};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Gamma API base URL.
pub const GAMMA_API_URL: &str = "https://gamma-api.polymarket.com";

/// Seconds per 15-minute window.
pub const WINDOW_SECS: u64 = 900;

type DirectLimiter = RateLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Gamma API client.
pub struct GammaClient {
    http: Client,
    base_url: String,
    rate_limiter: Arc<DirectLimiter>,
}

#[derive(Debug, Deserialize)]
struct GammaEvent {
    #[serde(default)]
    markets: Vec<GammaMarket>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GammaMarket {
    condition_id: String,
    #[serde(default)]
    slug: String,
    question: String,
    /// JSON string: "[\"id1\", \"id2\"]"
    clob_token_ids: String,
    /// JSON string: "[\"Up\", \"Down\"]"
    outcomes: String,
    /// JSON string: "[\"0.52\", \"0.48\"]"
    #[serde(default)]
    outcome_prices: Option<String>,
    #[serde(default)]
    neg_risk: bool,
    #[serde(default)]
    end_date: Option<String>,
}

impl GammaClient {
    /// Creates a new client limited to 30 requests per minute.
    #[must_use]
    pub fn new() -> Self {
        Self::with_rate_limit(nonzero!(30u32))
    }

    /// Creates a new client with a custom per-minute rate limit.
    #[must_use]
    pub fn with_rate_limit(requests_per_minute: NonZeroU32) -> Self {
        let quota = Quota::per_minute(requests_per_minute);
        Self {
            http: Client::new(),
            base_url: GAMMA_API_URL.to_string(),
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
            return Err(anyhow!("Gamma API error {}: {}", status, text));
        }

        Ok(response.json::<T>().await?)
    }

    /// Finds the active 15-minute Up/Down market for a coin and window.
    ///
    /// `window_start` is a unix timestamp; it is floored to the
    /// enclosing 15-minute boundary before the slug lookup.
    pub async fn find_updown_market(&self, coin: &str, window_start: u64) -> Result<Market> {
        let window = (window_start / WINDOW_SECS) * WINDOW_SECS;
        let slug = format!("{}-updown-15m-{}", coin.to_lowercase(), window);
        tracing::debug!(slug = %slug, "looking up 15-minute market");

        let events: Vec<GammaEvent> = self
            .get(&format!("/events?slug={}", urlencoding::encode(&slug)))
            .await?;

        let market = events
            .first()
            .and_then(|e| e.markets.first())
            .with_context(|| format!("no active market for slug {slug}"))?;

        parse_market(market)
    }

    /// Finds active sports markets tagged with a league slug
    /// (e.g. `nhl`, `nba`).
    pub async fn find_sports_markets(&self, league_tag: &str) -> Result<Vec<Market>> {
        let path = format!(
            "/events?tag_slug={}&active=true&closed=false",
            urlencoding::encode(league_tag)
        );
        let events: Vec<GammaEvent> = self.get(&path).await?;

        let mut markets = Vec::new();
        for event in &events {
            for raw in &event.markets {
                match parse_market(raw) {
                    Ok(m) if m.is_binary() => markets.push(m),
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(condition_id = %raw.condition_id, error = %e, "skipping unparseable market");
                    }
                }
            }
        }
        Ok(markets)
    }
}

impl Default for GammaClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Converts a raw catalog market into the domain [`Market`].
fn parse_market(raw: &GammaMarket) -> Result<Market> {
    let token_ids: Vec<String> =
        serde_json::from_str(&raw.clob_token_ids).context("failed to parse clobTokenIds")?;
    let outcome_names: Vec<String> =
        serde_json::from_str(&raw.outcomes).context("failed to parse outcomes")?;
    if token_ids.len() != outcome_names.len() {
        return Err(anyhow!(
            "token/outcome count mismatch: {} vs {}",
            token_ids.len(),
            outcome_names.len()
        ));
    }

    let outcome_prices: Vec<Decimal> = match &raw.outcome_prices {
        Some(s) => {
            let strings: Vec<String> =
                serde_json::from_str(s).context("failed to parse outcomePrices")?;
            strings
                .iter()
                .map(|p| p.parse::<Decimal>().unwrap_or(Decimal::ZERO))
                .collect()
        }
        None => vec![Decimal::ZERO; token_ids.len()],
    };

    let end_date = raw
        .end_date
        .as_ref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc));

    Ok(Market {
        condition_id: raw.condition_id.clone(),
        slug: raw.slug.clone(),
        question: raw.question.clone(),
        outcomes: token_ids
            .into_iter()
            .zip(outcome_names)
            .map(|(token_id, name)| Outcome { token_id, name })
            .collect(),
        neg_risk: raw.neg_risk,
        end_date,
        tick_size: Decimal::new(1, 2),
        outcome_prices,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event_json() -> serde_json::Value {
        serde_json::json!([{
            "markets": [{
                "conditionId": "0xc0ffee",
                "slug": "btc-updown-15m-1736452800",
                "question": "Bitcoin Up or Down - Jan 9, 3:00PM ET",
                "clobTokenIds": "[\"111\", \"222\"]",
                "outcomes": "[\"Up\", \"Down\"]",
                "outcomePrices": "[\"0.52\", \"0.48\"]",
                "negRisk": false,
                "endDate": "2025-01-09T20:15:00Z"
            }]
        }])
    }

    #[tokio::test]
    async fn find_updown_market_floors_window_and_parses() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("slug", "btc-updown-15m-1736452800"))
            .respond_with(ResponseTemplate::new(200).set_body_json(event_json()))
            .mount(&mock_server)
            .await;

        let client = GammaClient::new().with_base_url(mock_server.uri());
        // 1736452800 + 437 is inside the window; the slug must use the floor.
        let market = client.find_updown_market("BTC", 1736452800 + 437).await.unwrap();

        assert_eq!(market.condition_id, "0xc0ffee");
        assert_eq!(market.outcomes.len(), 2);
        assert_eq!(market.outcomes[0].name, "Up");
        assert_eq!(market.outcomes[0].token_id, "111");
        assert!(!market.neg_risk);
        assert!(market.end_date.is_some());
    }

    #[tokio::test]
    async fn find_updown_market_missing_is_error() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&mock_server)
            .await;

        let client = GammaClient::new().with_base_url(mock_server.uri());
        assert!(client.find_updown_market("btc", 0).await.is_err());
    }

    #[tokio::test]
    async fn find_sports_markets_filters_non_binary() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/events"))
            .and(query_param("tag_slug", "nhl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([{
                "markets": [
                    {
                        "conditionId": "0x01",
                        "slug": "nhl-bos-nyr",
                        "question": "Bruins vs. Rangers",
                        "clobTokenIds": "[\"1\", \"2\"]",
                        "outcomes": "[\"Bruins\", \"Rangers\"]",
                        "negRisk": true
                    },
                    {
                        "conditionId": "0x02",
                        "slug": "nhl-three-way",
                        "question": "Three-way market",
                        "clobTokenIds": "[\"3\", \"4\", \"5\"]",
                        "outcomes": "[\"A\", \"B\", \"C\"]"
                    }
                ]
            }])))
            .mount(&mock_server)
            .await;

        let client = GammaClient::new().with_base_url(mock_server.uri());
        let markets = client.find_sports_markets("nhl").await.unwrap();
        assert_eq!(markets.len(), 1);
        assert_eq!(markets[0].condition_id, "0x01");
        assert!(markets[0].neg_risk);
    }

    #[test]
    fn parse_market_rejects_count_mismatch() {
        let raw = GammaMarket {
            condition_id: "0x1".into(),
            slug: String::new(),
            question: "q".into(),
            clob_token_ids: "[\"1\", \"2\"]".into(),
            outcomes: "[\"Up\"]".into(),
            outcome_prices: None,
            neg_risk: false,
            end_date: None,
        };
        assert!(parse_market(&raw).is_err());
    }
}

//! Read-only league API clients.
//!
//! Free endpoints for NHL, NBA, and MLB, with the ESPN scoreboard as
//! the generic fallback (NFL and soccer go through ESPN directly).
//! Everything is normalized into [`GameState`] and [`ScoringEvent`] so
//! the shock classifier never sees league-specific shapes.
//!
//! All clients keep a polite 2-second gap between calls; these are
//! unauthenticated public endpoints and getting blocked mid-game costs
//! far more than the latency.

pub mod espn;
pub mod mlb;
pub mod nba;
pub mod nhl;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use espn::EspnClient;
pub use mlb::MlbClient;
pub use nba::NbaClient;
pub use nhl::NhlClient;

/// Errors from league API clients.
#[derive(Debug, Error)]
pub enum SportsError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("league API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("failed to parse league response: {0}")]
    Parse(String),

    #[error("unknown game: {0}")]
    UnknownGame(String),
}

/// A live (or recently live) game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameState {
    /// League-scoped game identifier.
    pub game_id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    /// True once the game has gone final.
    pub decided: bool,
}

/// A scoring (or otherwise significant) event inside a game.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringEvent {
    pub game_id: String,
    /// Team credited with the event.
    pub team: String,
    /// Event kind in the league's own vocabulary ("goal", "touchdown",
    /// "3pt", ...).
    pub kind: String,
    /// Wall-clock time the event was recorded.
    pub at: DateTime<Utc>,
}

impl ScoringEvent {
    /// True if the event happened within `lookback_secs` of `now`.
    #[must_use]
    pub fn is_recent(&self, now: DateTime<Utc>, lookback_secs: i64) -> bool {
        let age = (now - self.at).num_seconds();
        (0..=lookback_secs).contains(&age)
    }
}

/// Common surface of all league clients.
#[async_trait]
pub trait LeagueClient: Send + Sync {
    /// League slug ("nhl", "nba", ...).
    fn league(&self) -> &str;

    /// Games currently live.
    async fn live_games(&self) -> Result<Vec<GameState>, SportsError>;

    /// Recent events in one game, newest last.
    async fn recent_events(&self, game_id: &str) -> Result<Vec<ScoringEvent>, SportsError>;
}

/// Shared governor limiter enforcing the 2-second polite gap.
pub(crate) fn polite_limiter() -> std::sync::Arc<
    governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
> {
    use governor::Quota;
    use nonzero_ext::nonzero;
    use std::time::Duration;

    // One call per 2 s, no burst.
    let quota = Quota::with_period(Duration::from_secs(2))
        .unwrap_or_else(|| Quota::per_second(nonzero!(1u32)))
        .allow_burst(nonzero!(1u32));
    std::sync::Arc::new(governor::RateLimiter::direct(quota))
}

/// GET helper shared by the league clients.
pub(crate) async fn polite_get<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    limiter: &governor::RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    url: &str,
) -> Result<T, SportsError> {
    limiter.until_ready().await;
    tracing::debug!("GET {}", url);
    let response = http.get(url).send().await?;
    if !response.status().is_success() {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        return Err(SportsError::Api { status, message });
    }
    response
        .json::<T>()
        .await
        .map_err(|e| SportsError::Parse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn scoring_event_recency_window() {
        let now = Utc::now();
        let event = ScoringEvent {
            game_id: "g1".into(),
            team: "BOS".into(),
            kind: "goal".into(),
            at: now - Duration::seconds(90),
        };
        assert!(event.is_recent(now, 120));
        assert!(!event.is_recent(now, 60));
        // Future-dated events are not "recent".
        let future = ScoringEvent { at: now + Duration::seconds(10), ..event };
        assert!(!future.is_recent(now, 120));
    }
}

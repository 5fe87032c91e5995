//! ESPN fallback client: scoreboard + summary endpoints.
//!
//! ESPN covers every league this system trades, so it doubles as the
//! primary path for NFL and soccer and the fallback when a league's
//! own API is down.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{polite_get, polite_limiter, GameState, LeagueClient, ScoringEvent, SportsError};

/// ESPN site API base URL.
pub const ESPN_API_URL: &str = "https://site.api.espn.com";

/// ESPN client for one sport/league pair
/// (e.g. `football`/`nfl`, `soccer`/`eng.1`).
pub struct EspnClient {
    http: Client,
    base_url: String,
    sport: String,
    league: String,
    limiter: std::sync::Arc<
        governor::RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

#[derive(Debug, Deserialize)]
struct ScoreboardResponse {
    #[serde(default)]
    events: Vec<EspnEvent>,
}

#[derive(Debug, Deserialize)]
struct EspnEvent {
    id: String,
    #[serde(default)]
    competitions: Vec<EspnCompetition>,
    status: EspnStatus,
}

#[derive(Debug, Deserialize)]
struct EspnCompetition {
    #[serde(default)]
    competitors: Vec<EspnCompetitor>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EspnCompetitor {
    home_away: String,
    #[serde(default)]
    score: String,
    team: EspnTeam,
}

#[derive(Debug, Deserialize)]
struct EspnTeam {
    abbreviation: String,
}

#[derive(Debug, Deserialize)]
struct EspnStatus {
    #[serde(rename = "type")]
    status_type: EspnStatusType,
}

#[derive(Debug, Deserialize)]
struct EspnStatusType {
    #[serde(default)]
    completed: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SummaryResponse {
    #[serde(default)]
    scoring_plays: Vec<EspnScoringPlay>,
}

#[derive(Debug, Deserialize)]
struct EspnScoringPlay {
    team: EspnTeam,
    #[serde(default, rename = "type")]
    play_type: Option<EspnPlayType>,
    #[serde(default)]
    wallclock: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EspnPlayType {
    #[serde(default)]
    text: String,
}

impl EspnClient {
    #[must_use]
    pub fn new(sport: &str, league: &str) -> Self {
        Self {
            http: Client::new(),
            base_url: ESPN_API_URL.to_string(),
            sport: sport.to_string(),
            league: league.to_string(),
            limiter: polite_limiter(),
        }
    }

    /// Sets a custom base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }
}

#[async_trait]
impl LeagueClient for EspnClient {
    fn league(&self) -> &str {
        &self.league
    }

    async fn live_games(&self) -> Result<Vec<GameState>, SportsError> {
        let url = format!(
            "{}/apis/site/v2/sports/{}/{}/scoreboard",
            self.base_url, self.sport, self.league
        );
        let response: ScoreboardResponse = polite_get(&self.http, &self.limiter, &url).await?;

        let games = response
            .events
            .into_iter()
            .filter_map(|e| {
                let competition = e.competitions.into_iter().next()?;
                let mut home = None;
                let mut away = None;
                for c in competition.competitors {
                    let score = c.score.parse::<u32>().unwrap_or(0);
                    match c.home_away.as_str() {
                        "home" => home = Some((c.team.abbreviation, score)),
                        "away" => away = Some((c.team.abbreviation, score)),
                        _ => {}
                    }
                }
                let (home_team, home_score) = home?;
                let (away_team, away_score) = away?;
                Some(GameState {
                    game_id: e.id,
                    home_team,
                    away_team,
                    home_score,
                    away_score,
                    decided: e.status.status_type.completed,
                })
            })
            .collect();
        Ok(games)
    }

    async fn recent_events(&self, game_id: &str) -> Result<Vec<ScoringEvent>, SportsError> {
        let url = format!(
            "{}/apis/site/v2/sports/{}/{}/summary?event={}",
            self.base_url, self.sport, self.league, game_id
        );
        let response: SummaryResponse = polite_get(&self.http, &self.limiter, &url).await?;

        let events = response
            .scoring_plays
            .iter()
            .map(|p| {
                let at = p
                    .wallclock
                    .as_ref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                ScoringEvent {
                    game_id: game_id.to_string(),
                    team: p.team.abbreviation.clone(),
                    kind: p
                        .play_type
                        .as_ref()
                        .map(|t| t.text.to_lowercase())
                        .unwrap_or_else(|| "score".to_string()),
                    at,
                }
            })
            .collect();
        Ok(events)
    }
}

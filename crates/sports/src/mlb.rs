//! MLB client: the statsapi schedule for live games and the
//! `feed/live` endpoint for scoring plays.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;

use crate::{polite_get, polite_limiter, GameState, LeagueClient, ScoringEvent, SportsError};

/// MLB stats API base URL.
pub const MLB_API_URL: &str = "https://statsapi.mlb.com";

pub struct MlbClient {
    http: Client,
    base_url: String,
    limiter: std::sync::Arc<
        governor::RateLimiter<
            governor::state::NotKeyed,
            governor::state::InMemoryState,
            governor::clock::DefaultClock,
        >,
    >,
}

#[derive(Debug, Deserialize)]
struct ScheduleResponse {
    #[serde(default)]
    dates: Vec<ScheduleDate>,
}

#[derive(Debug, Deserialize)]
struct ScheduleDate {
    #[serde(default)]
    games: Vec<MlbScheduleGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlbScheduleGame {
    game_pk: u64,
    status: MlbStatus,
    teams: MlbScheduleTeams,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlbStatus {
    abstract_game_state: String,
}

#[derive(Debug, Deserialize)]
struct MlbScheduleTeams {
    home: MlbScheduleSide,
    away: MlbScheduleSide,
}

#[derive(Debug, Deserialize)]
struct MlbScheduleSide {
    #[serde(default)]
    score: u32,
    team: MlbTeamRef,
}

#[derive(Debug, Deserialize)]
struct MlbTeamRef {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedLiveResponse {
    game_data: GameData,
    live_data: LiveData,
}

#[derive(Debug, Deserialize)]
struct GameData {
    teams: GameDataTeams,
}

#[derive(Debug, Deserialize)]
struct GameDataTeams {
    home: MlbTeamRef,
    away: MlbTeamRef,
}

#[derive(Debug, Deserialize)]
struct LiveData {
    plays: MlbPlays,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlbPlays {
    #[serde(default)]
    all_plays: Vec<MlbPlay>,
}

#[derive(Debug, Deserialize)]
struct MlbPlay {
    result: MlbPlayResult,
    about: MlbPlayAbout,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlbPlayResult {
    #[serde(default)]
    rbi: u32,
    #[serde(default)]
    event: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MlbPlayAbout {
    #[serde(default)]
    half_inning: String,
    #[serde(default)]
    end_time: Option<String>,
}

impl MlbClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: MLB_API_URL.to_string(),
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

impl Default for MlbClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeagueClient for MlbClient {
    fn league(&self) -> &str {
        "mlb"
    }

    async fn live_games(&self) -> Result<Vec<GameState>, SportsError> {
        let url = format!("{}/api/v1/schedule?sportId=1", self.base_url);
        let response: ScheduleResponse = polite_get(&self.http, &self.limiter, &url).await?;

        Ok(response
            .dates
            .into_iter()
            .flat_map(|d| d.games)
            .map(|g| GameState {
                game_id: g.game_pk.to_string(),
                home_team: g.teams.home.team.name,
                away_team: g.teams.away.team.name,
                home_score: g.teams.home.score,
                away_score: g.teams.away.score,
                decided: g.status.abstract_game_state == "Final",
            })
            .collect())
    }

    async fn recent_events(&self, game_id: &str) -> Result<Vec<ScoringEvent>, SportsError> {
        let url = format!("{}/api/v1.1/game/{}/feed/live", self.base_url, game_id);
        let response: FeedLiveResponse = polite_get(&self.http, &self.limiter, &url).await?;

        let home = response.game_data.teams.home.name;
        let away = response.game_data.teams.away.name;
        let events = response
            .live_data
            .plays
            .all_plays
            .iter()
            .filter(|p| p.result.rbi > 0)
            .map(|p| {
                // The feed stamps play end times; fall back to now for
                // in-progress plays.
                let at = p
                    .about
                    .end_time
                    .as_ref()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_else(Utc::now);
                // "top" half means the away team batted in the runs.
                let team = if p.about.half_inning == "top" { &away } else { &home };
                ScoringEvent {
                    game_id: game_id.to_string(),
                    team: team.clone(),
                    kind: p.result.event.to_lowercase(),
                    at,
                }
            })
            .collect();
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn live_games_flattens_dates() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1/schedule"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "dates": [{
                    "games": [{
                        "gamePk": 745123,
                        "status": {"abstractGameState": "Live"},
                        "teams": {
                            "home": {"score": 3, "team": {"name": "Boston Red Sox"}},
                            "away": {"score": 2, "team": {"name": "New York Yankees"}}
                        }
                    }]
                }]
            })))
            .mount(&mock_server)
            .await;

        let client = MlbClient::new().with_base_url(mock_server.uri());
        let games = client.live_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].game_id, "745123");
        assert!(!games[0].decided);
    }

    #[tokio::test]
    async fn recent_events_are_rbi_plays() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v1.1/game/745123/feed/live"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "gameData": {
                    "teams": {
                        "home": {"name": "Boston Red Sox"},
                        "away": {"name": "New York Yankees"}
                    }
                },
                "liveData": {
                    "plays": {
                        "allPlays": [
                            {"result": {"rbi": 0, "event": "Strikeout"}, "about": {"halfInning": "top"}},
                            {"result": {"rbi": 2, "event": "Home Run"}, "about": {"halfInning": "bottom", "endTime": "2025-04-12T01:23:45Z"}}
                        ]
                    }
                }
            })))
            .mount(&mock_server)
            .await;

        let client = MlbClient::new().with_base_url(mock_server.uri());
        let events = client.recent_events("745123").await.unwrap();
        assert_eq!(events.len(), 1);
        // Bottom half: the home team batted in the runs.
        assert_eq!(events[0].team, "Boston Red Sox");
        assert_eq!(events[0].kind, "home run");
    }
}

//! NBA client: the CDN liveData scoreboard and play-by-play JSON.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;

use crate::{polite_get, polite_limiter, GameState, LeagueClient, ScoringEvent, SportsError};

/// NBA CDN base URL.
pub const NBA_CDN_URL: &str = "https://cdn.nba.com";

pub struct NbaClient {
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
struct ScoreboardResponse {
    scoreboard: Scoreboard,
}

#[derive(Debug, Deserialize)]
struct Scoreboard {
    #[serde(default)]
    games: Vec<NbaGame>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaGame {
    game_id: String,
    /// 1 = scheduled, 2 = live, 3 = final.
    game_status: u8,
    home_team: NbaTeam,
    away_team: NbaTeam,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaTeam {
    team_tricode: String,
    #[serde(default)]
    score: u32,
}

#[derive(Debug, Deserialize)]
struct PlayByPlayResponse {
    game: PlayByPlayGame,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayByPlayGame {
    #[serde(default)]
    actions: Vec<NbaAction>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NbaAction {
    action_type: String,
    #[serde(default)]
    team_tricode: Option<String>,
    #[serde(default)]
    shot_result: Option<String>,
}

impl NbaClient {
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: Client::new(),
            base_url: NBA_CDN_URL.to_string(),
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

impl Default for NbaClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeagueClient for NbaClient {
    fn league(&self) -> &str {
        "nba"
    }

    async fn live_games(&self) -> Result<Vec<GameState>, SportsError> {
        let url = format!(
            "{}/static/json/liveData/scoreboard/todaysScoreboard_00.json",
            self.base_url
        );
        let response: ScoreboardResponse = polite_get(&self.http, &self.limiter, &url).await?;

        Ok(response
            .scoreboard
            .games
            .into_iter()
            .map(|g| GameState {
                game_id: g.game_id,
                home_team: g.home_team.team_tricode,
                away_team: g.away_team.team_tricode,
                home_score: g.home_team.score,
                away_score: g.away_team.score,
                decided: g.game_status == 3,
            })
            .collect())
    }

    async fn recent_events(&self, game_id: &str) -> Result<Vec<ScoringEvent>, SportsError> {
        let url = format!(
            "{}/static/json/liveData/playbyplay/playbyplay_{}.json",
            self.base_url, game_id
        );
        let response: PlayByPlayResponse = polite_get(&self.http, &self.limiter, &url).await?;

        let now = Utc::now();
        let events = response
            .game
            .actions
            .iter()
            .filter(|a| {
                // Made shots and free throws move moneylines; misses do not.
                let made = a.shot_result.as_deref() == Some("Made");
                matches!(a.action_type.as_str(), "2pt" | "3pt" | "freethrow") && made
            })
            .filter_map(|a| {
                Some(ScoringEvent {
                    game_id: game_id.to_string(),
                    team: a.team_tricode.clone()?,
                    kind: a.action_type.clone(),
                    at: now,
                })
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
    async fn live_games_maps_status() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/json/liveData/scoreboard/todaysScoreboard_00.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "scoreboard": {
                    "games": [{
                        "gameId": "0022400501",
                        "gameStatus": 2,
                        "homeTeam": {"teamTricode": "BOS", "score": 55},
                        "awayTeam": {"teamTricode": "LAL", "score": 60}
                    }]
                }
            })))
            .mount(&mock_server)
            .await;

        let client = NbaClient::new().with_base_url(mock_server.uri());
        let games = client.live_games().await.unwrap();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].away_score, 60);
        assert!(!games[0].decided);
    }

    #[tokio::test]
    async fn recent_events_only_made_shots() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/static/json/liveData/playbyplay/playbyplay_0022400501.json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "game": {
                    "actions": [
                        {"actionType": "3pt", "teamTricode": "BOS", "shotResult": "Made"},
                        {"actionType": "2pt", "teamTricode": "LAL", "shotResult": "Missed"},
                        {"actionType": "rebound", "teamTricode": "LAL"}
                    ]
                }
            })))
            .mount(&mock_server)
            .await;

        let client = NbaClient::new().with_base_url(mock_server.uri());
        let events = client.recent_events("0022400501").await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].team, "BOS");
        assert_eq!(events[0].kind, "3pt");
    }
}

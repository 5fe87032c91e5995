//! Shock classification against live league events.
//!
//! On a shock the engine burst-polls the game's league API for up to
//! `burst_cutoff_ms`, looking for scoring events that explain the
//! move. Only a single clear cause is tradeable: multi-event sequences
//! have unclear momentum, no cause means the move was noise from flow,
//! and a cause that surfaces only *after* the price moved means the
//! stadium feed was slower than the informed traders, so the reversion
//! edge is already gone.

use chrono::{DateTime, Duration, Utc};
use splitflip_sports::{LeagueClient, ScoringEvent, SportsError};
use tracing::debug;

/// How far back a scoring event can be and still explain a shock.
pub const CAUSE_LOOKBACK_SECS: i64 = 120;

/// Interval between burst polls.
const BURST_POLL_GAP_MS: u64 = 2_000;

/// Classification of one shock.
#[derive(Debug, Clone)]
pub enum ShockClass {
    /// One clear cause; the only tradeable class.
    SingleEvent(ScoringEvent),
    /// Several candidate causes; momentum unclear.
    MultiEvent,
    /// No correlated event found within the burst budget.
    Noise,
    /// The cause surfaced after the price moved; informed flow beat
    /// the wire.
    PreShock(ScoringEvent),
}

impl ShockClass {
    /// Only single-event shocks are traded.
    #[must_use]
    pub fn is_tradeable(&self) -> bool {
        matches!(self, Self::SingleEvent(_))
    }
}

/// Pure classification of a shock at `shock_at` against the events
/// visible right now.
#[must_use]
pub fn classify(shock_at: DateTime<Utc>, events: &[ScoringEvent]) -> ShockClass {
    let window_start = shock_at - Duration::seconds(CAUSE_LOOKBACK_SECS);
    let candidates: Vec<&ScoringEvent> = events
        .iter()
        .filter(|e| e.at >= window_start)
        .collect();

    match candidates.len() {
        0 => ShockClass::Noise,
        1 => {
            let event = candidates[0].clone();
            if event.at > shock_at {
                ShockClass::PreShock(event)
            } else {
                ShockClass::SingleEvent(event)
            }
        }
        _ => ShockClass::MultiEvent,
    }
}

/// Burst-polls the league client until a non-noise classification
/// appears or the budget runs out. Returns `Noise` on exhaustion; API
/// errors during the burst degrade to noise rather than aborting the
/// caller.
///
/// The second element is the feed's total event count when the class
/// was decided. The event feed is cumulative, so a caller opening a
/// cycle must snapshot this count: only events past it may drive the
/// cycle's exits, never the pre-shock history.
pub async fn burst_classify(
    client: &dyn LeagueClient,
    game_id: &str,
    shock_at: DateTime<Utc>,
    burst_cutoff_ms: u64,
) -> (ShockClass, usize) {
    let deadline = shock_at + Duration::milliseconds(burst_cutoff_ms as i64);
    let mut events_seen = 0;

    loop {
        match client.recent_events(game_id).await {
            Ok(events) => {
                events_seen = events.len();
                let class = classify(shock_at, &events);
                if !matches!(class, ShockClass::Noise) {
                    return (class, events_seen);
                }
            }
            Err(SportsError::UnknownGame(_)) => return (ShockClass::Noise, events_seen),
            Err(e) => debug!(error = %e, game_id, "burst poll error"),
        }

        if Utc::now() >= deadline {
            return (ShockClass::Noise, events_seen);
        }
        tokio::time::sleep(std::time::Duration::from_millis(BURST_POLL_GAP_MS)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(team: &str, at: DateTime<Utc>) -> ScoringEvent {
        ScoringEvent {
            game_id: "g1".to_string(),
            team: team.to_string(),
            kind: "goal".to_string(),
            at,
        }
    }

    #[test]
    fn no_events_is_noise() {
        assert!(matches!(classify(Utc::now(), &[]), ShockClass::Noise));
    }

    #[test]
    fn one_recent_event_is_single() {
        let now = Utc::now();
        let events = vec![event("BOS", now - Duration::seconds(8))];
        let class = classify(now, &events);
        assert!(class.is_tradeable());
        match class {
            ShockClass::SingleEvent(e) => assert_eq!(e.team, "BOS"),
            other => panic!("expected single event, got {other:?}"),
        }
    }

    #[test]
    fn stale_events_do_not_count() {
        let now = Utc::now();
        let events = vec![event("BOS", now - Duration::seconds(CAUSE_LOOKBACK_SECS + 30))];
        assert!(matches!(classify(now, &events), ShockClass::Noise));
    }

    #[test]
    fn two_recent_events_are_multi() {
        let now = Utc::now();
        let events = vec![
            event("BOS", now - Duration::seconds(40)),
            event("NYR", now - Duration::seconds(10)),
        ];
        let class = classify(now, &events);
        assert!(matches!(class, ShockClass::MultiEvent));
        assert!(!class.is_tradeable());
    }

    #[test]
    fn event_after_shock_is_pre_shock() {
        let now = Utc::now();
        // The wire reported the goal 3 s after the price moved.
        let events = vec![event("BOS", now + Duration::seconds(3))];
        let class = classify(now, &events);
        assert!(matches!(class, ShockClass::PreShock(_)));
        assert!(!class.is_tradeable());
    }

    struct StubClient {
        events: Vec<ScoringEvent>,
    }

    #[async_trait::async_trait]
    impl LeagueClient for StubClient {
        fn league(&self) -> &str {
            "stub"
        }

        async fn live_games(&self) -> Result<Vec<splitflip_sports::GameState>, SportsError> {
            Ok(Vec::new())
        }

        async fn recent_events(&self, _game_id: &str) -> Result<Vec<ScoringEvent>, SportsError> {
            Ok(self.events.clone())
        }
    }

    #[tokio::test]
    async fn burst_classify_reports_full_feed_length() {
        let now = Utc::now();
        // The play-by-play feed is cumulative: two goals from earlier
        // in the game plus the fresh cause. The class counts only the
        // fresh one, but the reported length must cover all three so
        // the caller's high-water mark skips the stale goals.
        let client = StubClient {
            events: vec![
                event("BOS", now - Duration::seconds(1800)),
                event("NYR", now - Duration::seconds(900)),
                event("BOS", now - Duration::seconds(8)),
            ],
        };

        let (class, events_seen) = burst_classify(&client, "g1", now, 10_000).await;
        assert!(class.is_tradeable());
        assert_eq!(events_seen, 3);
    }

    #[tokio::test]
    async fn burst_classify_noise_still_reports_length() {
        let now = Utc::now();
        let client = StubClient {
            events: vec![event("BOS", now - Duration::seconds(1800))],
        };

        // Cutoff already passed: one poll, then Noise.
        let (class, events_seen) = burst_classify(&client, "g1", now - Duration::seconds(60), 1).await;
        assert!(matches!(class, ShockClass::Noise));
        assert_eq!(events_seen, 1);
    }
}

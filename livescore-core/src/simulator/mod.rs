//! Match simulator.
//!
//! Keeps a fixed pool of matches and advances every live one by a minute per
//! tick. Each tick yields the [`Emission`]s per match, in the order they
//! must be published. The simulator never publishes anything itself; see
//! [`SimulatorRunner`] for the loop that does.
//!
//! Lifecycle of a match: Live → (minute 45) HalfTime → (after the pause)
//! Live → (minute 90) Finished → (restart) Live from minute 0.

mod runner;
mod state;

pub use runner::{SimulatorRunner, TickOutcome};
pub use state::{MatchState, Occurrence, fixtures, starter_id, substitute_id};

use crate::config::SimulatorConfig;
use crate::events::Emission;
use livescore_sdk::objects::{
    EventEnvelope, EventType, MatchStatus, Metadata, MetadataValue, PlayerUpdate,
};
use rand::Rng;
use time::OffsetDateTime;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

const HALF_TIME_MINUTE: u32 = 45;
const FULL_TIME_MINUTE: u32 = 90;

/// Emissions of one match within one tick, in publish order.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchEmissions {
    pub match_id: i64,
    pub emissions: Vec<Emission>,
}

pub struct Simulator<R> {
    config: SimulatorConfig,
    rng: R,
    matches: Vec<MatchState>,
}

impl<R: Rng> Simulator<R> {
    /// Create a simulator over the standard fixture pool.
    pub fn new(config: SimulatorConfig, mut rng: R) -> Self {
        let matches = fixtures(config.match_count, &mut rng, OffsetDateTime::now_utc());
        Self::with_matches(config, rng, matches)
    }

    pub fn with_matches(config: SimulatorConfig, rng: R, matches: Vec<MatchState>) -> Self {
        Self {
            config,
            rng,
            matches,
        }
    }

    pub fn matches(&self) -> &[MatchState] {
        &self.matches
    }

    pub fn match_state(&self, match_id: i64) -> Option<&MatchState> {
        self.matches.iter().find(|m| m.match_id == match_id)
    }

    /// Number of matches currently being played.
    pub fn live_count(&self) -> usize {
        self.matches
            .iter()
            .filter(|m| m.status == MatchStatus::Live)
            .count()
    }

    /// Advance every live match by one minute, then bring matches whose
    /// half-time pause has elapsed back to live.
    pub fn tick(&mut self, now: Instant) -> Vec<MatchEmissions> {
        let mut out = Vec::new();
        for index in 0..self.matches.len() {
            let Some(state) = self.matches.get(index) else {
                continue;
            };
            if state.status != MatchStatus::Live {
                continue;
            }
            let roll: f64 = self.rng.random();
            let emissions = self.advance_at(index, now, roll);
            if !emissions.emissions.is_empty() {
                out.push(emissions);
            }
        }
        out.extend(self.resume_due(now));
        out
    }

    /// Advance one live match with a fixed occurrence roll.
    ///
    /// Returns `None` when the match is unknown or not live.
    pub fn advance_with_roll(
        &mut self,
        match_id: i64,
        now: Instant,
        roll: f64,
    ) -> Option<MatchEmissions> {
        let index = self
            .matches
            .iter()
            .position(|m| m.match_id == match_id && m.status == MatchStatus::Live)?;
        Some(self.advance_at(index, now, roll))
    }

    /// Reset every finished match to a fresh kick-off.
    pub fn restart_finished(&mut self) -> Vec<MatchEmissions> {
        let timestamp = OffsetDateTime::now_utc();
        self.matches
            .iter_mut()
            .filter(|m| m.status == MatchStatus::Finished)
            .map(|state| {
                state.minute = 0;
                state.home_score = 0;
                state.away_score = 0;
                state.status = MatchStatus::Live;
                state.start_time = timestamp;
                state.resume_at = None;
                debug!(match_id = state.match_id, "Match restarted");

                let mut metadata = Metadata::new();
                metadata.insert("homeTeamId".into(), state.home_team_id.into());
                metadata.insert("awayTeamId".into(), state.away_team_id.into());
                let kick_off = envelope(
                    state,
                    EventType::MatchStart,
                    None,
                    None,
                    "Kick off".to_string(),
                    metadata,
                    timestamp,
                );
                MatchEmissions {
                    match_id: state.match_id,
                    emissions: vec![
                        Emission::Event(kick_off),
                        Emission::Score(state.score_update(timestamp)),
                    ],
                }
            })
            .collect()
    }

    fn resume_due(&mut self, now: Instant) -> Vec<MatchEmissions> {
        let timestamp = OffsetDateTime::now_utc();
        self.matches
            .iter_mut()
            .filter(|m| m.status == MatchStatus::HalfTime)
            .filter(|m| m.resume_at.is_some_and(|at| at <= now))
            .map(|state| {
                state.status = MatchStatus::Live;
                state.minute = HALF_TIME_MINUTE;
                state.resume_at = None;
                debug!(match_id = state.match_id, "Second half started");
                MatchEmissions {
                    match_id: state.match_id,
                    emissions: vec![Emission::Score(state.score_update(timestamp))],
                }
            })
            .collect()
    }

    fn advance_at(&mut self, index: usize, now: Instant, roll: f64) -> MatchEmissions {
        let config = &self.config;
        let rng = &mut self.rng;
        let Some(state) = self.matches.get_mut(index) else {
            return MatchEmissions {
                match_id: 0,
                emissions: Vec::new(),
            };
        };
        let timestamp = OffsetDateTime::now_utc();
        let mut emissions = Vec::new();

        state.minute += 1;
        match state.minute {
            HALF_TIME_MINUTE => {
                state.status = MatchStatus::HalfTime;
                state.resume_at = Some(now + config.half_time_pause);
                let mut metadata = Metadata::new();
                metadata.insert("homeScore".into(), state.home_score.into());
                metadata.insert("awayScore".into(), state.away_score.into());
                emissions.push(Emission::Event(envelope(
                    state,
                    EventType::HalfTime,
                    None,
                    None,
                    "Half Time".to_string(),
                    metadata,
                    timestamp,
                )));
                emissions.push(Emission::Score(state.score_update(timestamp)));
                info!(
                    match_id = state.match_id,
                    home_score = state.home_score,
                    away_score = state.away_score,
                    "Half time"
                );
            }
            minute if minute >= FULL_TIME_MINUTE => {
                state.minute = FULL_TIME_MINUTE;
                state.status = MatchStatus::Finished;
                let mut metadata = Metadata::new();
                metadata.insert("finalHomeScore".into(), state.home_score.into());
                metadata.insert("finalAwayScore".into(), state.away_score.into());
                emissions.push(Emission::Event(envelope(
                    state,
                    EventType::FullTime,
                    None,
                    None,
                    "Full Time".to_string(),
                    metadata,
                    timestamp,
                )));
                emissions.push(Emission::Score(state.score_update(timestamp)));
                info!(
                    match_id = state.match_id,
                    home_score = state.home_score,
                    away_score = state.away_score,
                    "Full time"
                );
            }
            minute => {
                if let Some(occurrence) = Occurrence::from_roll(roll) {
                    emissions.extend(occurrence_emissions(state, occurrence, rng, timestamp));
                }
                if config.player_update_every > 0 && minute % config.player_update_every == 0 {
                    for _ in 0..config.players_per_update {
                        emissions.push(Emission::Player(player_update(state, rng, timestamp)));
                    }
                }
            }
        }

        MatchEmissions {
            match_id: state.match_id,
            emissions,
        }
    }
}

fn envelope(
    state: &MatchState,
    event_type: EventType,
    player_id: Option<i64>,
    team_id: Option<i64>,
    description: String,
    metadata: Metadata,
    timestamp: OffsetDateTime,
) -> EventEnvelope {
    EventEnvelope {
        event_id: Uuid::new_v4(),
        match_id: state.match_id,
        event_type,
        minute: state.minute,
        player_id,
        team_id,
        description,
        metadata,
        timestamp,
    }
}

fn pick<'a, R: Rng>(rng: &mut R, choices: &[&'a str]) -> &'a str {
    choices
        .get(rng.random_range(0..choices.len()))
        .copied()
        .unwrap_or_default()
}

fn occurrence_emissions<R: Rng>(
    state: &mut MatchState,
    occurrence: Occurrence,
    rng: &mut R,
    timestamp: OffsetDateTime,
) -> Vec<Emission> {
    let (team_id, is_home) = state.random_side(rng);
    let mut metadata = Metadata::new();

    let event = match occurrence {
        Occurrence::Goal => {
            if is_home {
                state.home_score += 1;
            } else {
                state.away_score += 1;
            }
            let player_id = starter_id(team_id, rng);
            metadata.insert(
                "goalType".into(),
                pick(rng, &["header", "penalty", "regular"]).into(),
            );
            metadata.insert("homeScore".into(), state.home_score.into());
            metadata.insert("awayScore".into(), state.away_score.into());
            info!(
                match_id = state.match_id,
                minute = state.minute,
                home_score = state.home_score,
                away_score = state.away_score,
                "Goal"
            );
            let goal = envelope(
                state,
                EventType::Goal,
                Some(player_id),
                Some(team_id),
                format!("Goal scored by player {player_id}"),
                metadata,
                timestamp,
            );
            return vec![
                Emission::Event(goal),
                Emission::Score(state.score_update(timestamp)),
            ];
        }
        Occurrence::Card => {
            let player_id = starter_id(team_id, rng);
            let yellow = rng.random_bool(0.8);
            metadata.insert(
                "cardType".into(),
                MetadataValue::from(if yellow { "yellow" } else { "red" }),
            );
            metadata.insert(
                "reason".into(),
                pick(rng, &["foul", "unsporting_behavior", "dissent"]).into(),
            );
            envelope(
                state,
                EventType::Card,
                Some(player_id),
                Some(team_id),
                format!(
                    "{} card for player {player_id}",
                    if yellow { "Yellow" } else { "Red" }
                ),
                metadata,
                timestamp,
            )
        }
        Occurrence::Substitution => {
            let player_out = starter_id(team_id, rng);
            let player_in = substitute_id(team_id, rng);
            metadata.insert("playerOut".into(), player_out.into());
            metadata.insert("playerIn".into(), player_in.into());
            envelope(
                state,
                EventType::Substitution,
                None,
                Some(team_id),
                format!("Substitution: Player {player_in} in for {player_out}"),
                metadata,
                timestamp,
            )
        }
        Occurrence::Shot => {
            let player_id = starter_id(team_id, rng);
            metadata.insert("onTarget".into(), rng.random_bool(0.5).into());
            metadata.insert(
                "bodyPart".into(),
                pick(rng, &["right_foot", "left_foot", "header"]).into(),
            );
            envelope(
                state,
                EventType::Shot,
                Some(player_id),
                Some(team_id),
                format!("Shot by player {player_id}"),
                metadata,
                timestamp,
            )
        }
        Occurrence::Corner => {
            metadata.insert("side".into(), pick(rng, &["left", "right"]).into());
            envelope(
                state,
                EventType::Corner,
                None,
                Some(team_id),
                format!("Corner for team {team_id}"),
                metadata,
                timestamp,
            )
        }
    };
    vec![Emission::Event(event)]
}

fn player_update<R: Rng>(
    state: &MatchState,
    rng: &mut R,
    timestamp: OffsetDateTime,
) -> PlayerUpdate {
    let (team_id, _) = state.random_side(rng);
    let player_id = starter_id(team_id, rng);
    let mut statistics = Metadata::new();
    statistics.insert("shots".into(), rng.random_range(0..5i64).into());
    statistics.insert("shotsOnTarget".into(), rng.random_range(0..3i64).into());
    statistics.insert("passes".into(), rng.random_range(10..50i64).into());
    statistics.insert("passAccuracy".into(), rng.random_range(70..95i64).into());
    statistics.insert("tackles".into(), rng.random_range(0..8i64).into());
    statistics.insert("interceptions".into(), rng.random_range(0..5i64).into());
    statistics.insert("fouls".into(), rng.random_range(0..3i64).into());
    statistics.insert("minutesPlayed".into(), state.minute.into());
    PlayerUpdate {
        player_id,
        match_id: state.match_id,
        statistics,
        timestamp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::time::Duration;

    const NO_OCCURRENCE: f64 = 0.99;

    fn live_match(match_id: i64, minute: u32) -> MatchState {
        let mut state = MatchState::new(
            match_id,
            2 * match_id - 1,
            2 * match_id,
            1,
            OffsetDateTime::now_utc(),
        );
        state.minute = minute;
        state.status = MatchStatus::Live;
        state
    }

    fn simulator(matches: Vec<MatchState>) -> Simulator<StdRng> {
        Simulator::with_matches(
            SimulatorConfig::default(),
            StdRng::seed_from_u64(42),
            matches,
        )
    }

    fn events(emissions: &[Emission]) -> Vec<&EventEnvelope> {
        emissions
            .iter()
            .filter_map(|e| match e {
                Emission::Event(event) => Some(event),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_forced_goal_emits_event_and_score() {
        let mut sim = simulator(vec![live_match(1, 29)]);

        let out = sim.advance_with_roll(1, Instant::now(), 0.0).unwrap();

        let state = sim.match_state(1).unwrap();
        assert_eq!(state.minute, 30);
        assert_eq!(state.total_goals(), 1);
        // Minute 30 also carries the periodic player statistics.
        assert_eq!(events(&out.emissions).len(), 1);
        let scores = out
            .emissions
            .iter()
            .filter(|e| matches!(e, Emission::Score(_)))
            .count();
        assert_eq!(scores, 1);

        let Emission::Event(goal) = &out.emissions[0] else {
            panic!("expected goal event first");
        };
        assert_eq!(goal.event_type, EventType::Goal);
        assert_eq!(goal.minute, 30);
        let scoring_team = goal.team_id.unwrap();
        if state.home_score == 1 {
            assert_eq!(scoring_team, state.home_team_id);
        } else {
            assert_eq!(scoring_team, state.away_team_id);
        }
        assert_eq!(
            goal.metadata.get("homeScore").and_then(MetadataValue::as_i64),
            Some(i64::from(state.home_score))
        );

        let Emission::Score(score) = &out.emissions[1] else {
            panic!("expected score update second");
        };
        assert_eq!(score.minute, 30);
        assert_eq!(
            (score.home_score, score.away_score),
            (state.home_score, state.away_score)
        );
    }

    #[test]
    fn test_quiet_minute_emits_nothing() {
        let mut sim = simulator(vec![live_match(1, 10)]);
        let out = sim.advance_with_roll(1, Instant::now(), NO_OCCURRENCE).unwrap();
        assert!(out.emissions.is_empty());
        assert_eq!(sim.match_state(1).unwrap().minute, 11);
    }

    #[test]
    fn test_every_fifth_minute_emits_player_updates() {
        let mut sim = simulator(vec![live_match(3, 19)]);
        let out = sim.advance_with_roll(3, Instant::now(), NO_OCCURRENCE).unwrap();

        assert_eq!(out.emissions.len(), 4);
        for emission in &out.emissions {
            let Emission::Player(update) = emission else {
                panic!("expected player update");
            };
            assert_eq!(update.match_id, 3);
            assert!((56..78).contains(&update.player_id));
            assert_eq!(
                update
                    .statistics
                    .get("minutesPlayed")
                    .and_then(MetadataValue::as_i64),
                Some(20)
            );
        }
    }

    #[test]
    fn test_occurrences_carry_expected_metadata() {
        let cases = [
            (0.03, EventType::Card, "cardType"),
            (0.06, EventType::Substitution, "playerIn"),
            (0.10, EventType::Shot, "bodyPart"),
            (0.17, EventType::Corner, "side"),
        ];
        for (roll, event_type, key) in cases {
            let mut sim = simulator(vec![live_match(1, 10)]);
            let out = sim.advance_with_roll(1, Instant::now(), roll).unwrap();
            let events = events(&out.emissions);
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].event_type, event_type);
            assert!(events[0].metadata.contains_key(key));
            assert_eq!(sim.match_state(1).unwrap().total_goals(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_time_pause_and_resume() {
        let mut sim = simulator(vec![live_match(1, 44)]);

        let out = sim.advance_with_roll(1, Instant::now(), NO_OCCURRENCE).unwrap();
        let events = events(&out.emissions);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, EventType::HalfTime);
        assert_eq!(events[0].minute, 45);
        assert_eq!(sim.match_state(1).unwrap().status, MatchStatus::HalfTime);

        // Paused matches do not advance.
        sim.tick(Instant::now());
        assert_eq!(sim.match_state(1).unwrap().minute, 45);
        assert_eq!(sim.match_state(1).unwrap().status, MatchStatus::HalfTime);

        tokio::time::advance(Duration::from_secs(5)).await;
        let resumed = sim.tick(Instant::now());
        let state = sim.match_state(1).unwrap();
        assert_eq!(state.status, MatchStatus::Live);
        assert_eq!(state.minute, 45);
        assert_eq!(resumed.len(), 1);

        sim.tick(Instant::now());
        assert_eq!(sim.match_state(1).unwrap().minute, 46);
    }

    #[test]
    fn test_full_time_then_restart() {
        let mut state = live_match(1, 89);
        state.home_score = 2;
        state.away_score = 1;
        let mut sim = simulator(vec![state]);

        let out = sim.advance_with_roll(1, Instant::now(), NO_OCCURRENCE).unwrap();
        let events = events(&out.emissions);
        assert_eq!(events[0].event_type, EventType::FullTime);
        assert_eq!(
            events[0]
                .metadata
                .get("finalHomeScore")
                .and_then(MetadataValue::as_i64),
            Some(2)
        );
        assert_eq!(sim.match_state(1).unwrap().status, MatchStatus::Finished);
        assert_eq!(sim.live_count(), 0);

        let restarted = sim.restart_finished();
        assert_eq!(restarted.len(), 1);
        let Emission::Event(kick_off) = &restarted[0].emissions[0] else {
            panic!("expected kick-off event");
        };
        assert_eq!(kick_off.event_type, EventType::MatchStart);

        let state = sim.match_state(1).unwrap();
        assert_eq!(state.minute, 0);
        assert_eq!((state.home_score, state.away_score), (0, 0));
        assert_eq!(state.status, MatchStatus::Live);
    }

    #[test]
    fn test_minute_and_score_never_decrease_while_live() {
        let mut sim = Simulator::new(SimulatorConfig::default(), StdRng::seed_from_u64(9));
        let now = Instant::now();
        for _ in 0..200 {
            let before: Vec<_> = sim.matches().to_vec();
            sim.tick(now);
            for (old, new) in before.iter().zip(sim.matches()) {
                if new.status == MatchStatus::Live && old.status == MatchStatus::Live {
                    assert!(new.minute >= old.minute);
                }
                assert!(new.total_goals() >= old.total_goals());
            }
            sim.restart_finished();
        }
    }

    #[test]
    fn test_goal_events_have_distinct_ids() {
        let mut sim = simulator(vec![live_match(1, 1)]);
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let out = sim.advance_with_roll(1, Instant::now(), 0.0).unwrap();
            for event in events(&out.emissions) {
                assert!(ids.insert(event.event_id));
            }
        }
        assert_eq!(ids.len(), 20);
        assert_eq!(sim.match_state(1).unwrap().total_goals(), 20);
    }
}

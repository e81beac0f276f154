//! Per-match state owned by the simulator.

use livescore_sdk::objects::{MatchStatus, ScoreUpdate};
use rand::Rng;
use time::OffsetDateTime;
use tokio::time::Instant;

/// Mutable state of one simulated match.
///
/// Only the simulator's tick loop writes this. Everything downstream sees
/// [`ScoreUpdate`] and event snapshots taken from it.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchState {
    pub match_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub league_id: i64,
    pub minute: u32,
    pub home_score: u32,
    pub away_score: u32,
    pub status: MatchStatus,
    pub start_time: OffsetDateTime,
    /// When a match at half-time goes live again.
    pub(crate) resume_at: Option<Instant>,
}

impl MatchState {
    pub fn new(
        match_id: i64,
        home_team_id: i64,
        away_team_id: i64,
        league_id: i64,
        start_time: OffsetDateTime,
    ) -> Self {
        Self {
            match_id,
            home_team_id,
            away_team_id,
            league_id,
            minute: 0,
            home_score: 0,
            away_score: 0,
            status: MatchStatus::Scheduled,
            start_time,
            resume_at: None,
        }
    }

    pub fn resume_at(&self) -> Option<Instant> {
        self.resume_at
    }

    pub fn total_goals(&self) -> u32 {
        self.home_score + self.away_score
    }

    /// Score snapshot as published on `live-scores`.
    pub fn score_update(&self, timestamp: OffsetDateTime) -> ScoreUpdate {
        ScoreUpdate {
            match_id: self.match_id,
            home_score: self.home_score,
            away_score: self.away_score,
            minute: self.minute,
            status: self.status,
            timestamp,
        }
    }

    /// Pick a side at random: `(team_id, is_home)`.
    pub(crate) fn random_side<R: Rng>(&self, rng: &mut R) -> (i64, bool) {
        if rng.random_bool(0.5) {
            (self.home_team_id, true)
        } else {
            (self.away_team_id, false)
        }
    }
}

/// Player ids are derived from the team: eleven starters per team.
pub fn starter_id<R: Rng>(team_id: i64, rng: &mut R) -> i64 {
    team_id * 11 + rng.random_range(1..12)
}

/// Bench players follow the starters.
pub fn substitute_id<R: Rng>(team_id: i64, rng: &mut R) -> i64 {
    team_id * 11 + rng.random_range(12..20)
}

/// The initial pool of live matches.
///
/// Match `i` (1-based) is team `2i-1` at home against team `2i` in league
/// `i % 5 + 1`, already somewhere in its first half.
pub fn fixtures<R: Rng>(count: usize, rng: &mut R, now: OffsetDateTime) -> Vec<MatchState> {
    (1..=count as i64)
        .map(|i| {
            let kicked_off = now - time::Duration::minutes(rng.random_range(1..45));
            let mut state = MatchState::new(i, 2 * i - 1, 2 * i, i % 5 + 1, kicked_off);
            state.minute = rng.random_range(1..45);
            state.home_score = rng.random_range(0..3);
            state.away_score = rng.random_range(0..3);
            state.status = MatchStatus::Live;
            state
        })
        .collect()
}

/// What, if anything, happens in a regular minute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occurrence {
    Goal,
    Card,
    Substitution,
    Shot,
    Corner,
}

impl Occurrence {
    /// Map a uniform roll in `[0, 1)` to an occurrence. Ranges are checked in
    /// order and the first match wins.
    pub fn from_roll(roll: f64) -> Option<Self> {
        match roll {
            r if r < 0.02 => Some(Occurrence::Goal),
            r if r < 0.05 => Some(Occurrence::Card),
            r if r < 0.08 => Some(Occurrence::Substitution),
            r if r < 0.15 => Some(Occurrence::Shot),
            r if r < 0.20 => Some(Occurrence::Corner),
            _ => None,
        }
    }
}

//! Storage sinks written by the ingestion fan-out.
//!
//! Each sink is an external collaborator behind an `async_trait` seam:
//!
//! | Seam                   | Holds                                        |
//! |------------------------|----------------------------------------------|
//! | [`MatchStore`]         | canonical match rows (relational)            |
//! | [`EventDocumentStore`] | one document per event, keyed by event id    |
//! | [`EventSearchIndex`]   | one search document per event id             |
//! | [`ScoreCache`]         | score snapshots with TTL, live-match index   |
//! | [`PlayerStatsStore`]   | latest statistics per (player, match)        |
//!
//! Every write is safe to repeat: messages can be delivered more than once.

pub mod memory;

pub use memory::{
    MemoryDocumentStore, MemoryMatchStore, MemoryPlayerStats, MemoryScoreCache, MemorySearchIndex,
};

use async_trait::async_trait;
use compact_str::{CompactString, format_compact};
use livescore_sdk::objects::{EventEnvelope, MatchStatus, PlayerUpdate, ScoreUpdate};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;

use crate::simulator::MatchState;

/// Sorted-set key of the live-match index.
pub const LIVE_MATCHES_KEY: &str = "live:matches";

/// Cache key of a match's latest score snapshot.
pub fn score_cache_key(match_id: i64) -> CompactString {
    format_compact!("match:score:{match_id}")
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{sink} unavailable: {reason}")]
    Unavailable { sink: &'static str, reason: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored value does not fit the domain type.
    #[error("value out of range: {0}")]
    OutOfRange(String),
}

/// Canonical row of a match in the relational store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRow {
    pub match_id: i64,
    pub league_id: i64,
    pub home_team_id: i64,
    pub away_team_id: i64,
    pub scheduled_time: OffsetDateTime,
    pub status: MatchStatus,
    pub home_score: u32,
    pub away_score: u32,
    pub minute: u32,
    pub venue: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl MatchRow {
    /// Overwrite the live fields from a score update (last writer wins).
    pub fn apply_score(&mut self, update: &ScoreUpdate, now: OffsetDateTime) {
        self.home_score = update.home_score;
        self.away_score = update.away_score;
        self.minute = update.minute;
        self.status = update.status;
        self.updated_at = now;
    }
}

impl From<&MatchState> for MatchRow {
    fn from(state: &MatchState) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            match_id: state.match_id,
            league_id: state.league_id,
            home_team_id: state.home_team_id,
            away_team_id: state.away_team_id,
            scheduled_time: state.start_time,
            status: state.status,
            home_score: state.home_score,
            away_score: state.away_score,
            minute: state.minute,
            venue: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Value stored under [`score_cache_key`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreSnapshot {
    pub match_id: i64,
    pub home_score: u32,
    pub away_score: u32,
    pub minute: u32,
    pub status: MatchStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl From<&ScoreUpdate> for ScoreSnapshot {
    fn from(update: &ScoreUpdate) -> Self {
        Self {
            match_id: update.match_id,
            home_score: update.home_score,
            away_score: update.away_score,
            minute: update.minute,
            status: update.status,
            updated_at: update.timestamp,
        }
    }
}

#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn get_match(&self, match_id: i64) -> Result<Option<MatchRow>, SinkError>;

    /// Persist the live fields of `row`. Rows are never created here.
    async fn update_match(&self, row: &MatchRow) -> Result<(), SinkError>;
}

#[async_trait]
pub trait EventDocumentStore: Send + Sync {
    /// Insert or replace the document with id `event.event_id`.
    async fn upsert_event(&self, event: &EventEnvelope) -> Result<(), SinkError>;
}

#[async_trait]
pub trait EventSearchIndex: Send + Sync {
    /// Index `event` under document id `event.event_id`.
    async fn index_event(&self, event: &EventEnvelope) -> Result<(), SinkError>;
}

#[async_trait]
pub trait ScoreCache: Send + Sync {
    async fn set_score(
        &self,
        key: &str,
        snapshot: &ScoreSnapshot,
        ttl: Duration,
    ) -> Result<(), SinkError>;

    /// Add or re-score `match_id` in the live index.
    async fn touch_live(&self, match_id: i64, at: OffsetDateTime) -> Result<(), SinkError>;

    async fn remove_live(&self, match_id: i64) -> Result<(), SinkError>;
}

#[async_trait]
pub trait PlayerStatsStore: Send + Sync {
    async fn record(&self, update: &PlayerUpdate) -> Result<(), SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_cache_key() {
        assert_eq!(score_cache_key(17).as_str(), "match:score:17");
    }

    #[test]
    fn test_apply_score_overwrites_live_fields() {
        let created = OffsetDateTime::UNIX_EPOCH;
        let mut row = MatchRow {
            match_id: 1,
            league_id: 2,
            home_team_id: 1,
            away_team_id: 2,
            scheduled_time: created,
            status: MatchStatus::Live,
            home_score: 3,
            away_score: 1,
            minute: 80,
            venue: Some("Ground".into()),
            created_at: created,
            updated_at: created,
        };
        let now = OffsetDateTime::now_utc();
        let update = ScoreUpdate {
            match_id: 1,
            home_score: 0,
            away_score: 0,
            minute: 1,
            status: MatchStatus::Live,
            timestamp: now,
        };

        row.apply_score(&update, now);

        assert_eq!((row.home_score, row.away_score, row.minute), (0, 0, 1));
        assert_eq!(row.updated_at, now);
        assert_eq!(row.created_at, created);
        assert_eq!(row.venue.as_deref(), Some("Ground"));
    }

    #[test]
    fn test_snapshot_wire_names() {
        let snapshot = ScoreSnapshot {
            match_id: 4,
            home_score: 1,
            away_score: 2,
            minute: 60,
            status: MatchStatus::Live,
            updated_at: OffsetDateTime::UNIX_EPOCH,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["matchId"], 4);
        assert_eq!(json["status"], "Live");
        assert_eq!(json["updatedAt"], "1970-01-01T00:00:00Z");
    }
}

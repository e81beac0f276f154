//! Messages carried on the broker topics.
//!
//! All field names are camelCase on the wire. Timestamps are RFC 3339.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::{EventType, MatchStatus, Metadata};
use crate::codec::WireSchema;

/// An in-match occurrence published on `ingest-events`.
///
/// Immutable once published; identity is `event_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEnvelope {
    pub event_id: Uuid,
    pub match_id: i64,
    pub event_type: EventType,
    pub minute: u32,
    #[serde(default)]
    pub player_id: Option<i64>,
    #[serde(default)]
    pub team_id: Option<i64>,
    pub description: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WireSchema for EventEnvelope {
    const FIELDS: &'static [&'static str] = &[
        "eventId",
        "matchId",
        "eventType",
        "minute",
        "playerId",
        "teamId",
        "description",
        "metadata",
        "timestamp",
    ];
}

/// Authoritative score snapshot published on `live-scores`.
///
/// Consumers apply these last-writer-wins per `match_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreUpdate {
    pub match_id: i64,
    pub home_score: u32,
    pub away_score: u32,
    pub minute: u32,
    pub status: MatchStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WireSchema for ScoreUpdate {
    const FIELDS: &'static [&'static str] = &[
        "matchId",
        "homeScore",
        "awayScore",
        "minute",
        "status",
        "timestamp",
    ];
}

/// Per-player statistics snapshot published on `player-updates`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerUpdate {
    pub player_id: i64,
    pub match_id: i64,
    #[serde(default)]
    pub statistics: Metadata,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WireSchema for PlayerUpdate {
    const FIELDS: &'static [&'static str] = &["playerId", "matchId", "statistics", "timestamp"];
}

/// A message the consumer side gave up on, published on `dead-letter-queue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub error: String,
    /// Raw payload as received, lossily decoded as UTF-8. `None` when the
    /// broker error carried no payload.
    pub message: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl WireSchema for DeadLetterRecord {
    const FIELDS: &'static [&'static str] = &["originalTopic", "error", "message", "timestamp"];
}

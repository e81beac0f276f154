//! Topic names and partition-key rules.
//!
//! Topic names are a fixed contract between producer and consumers.
//! Partition keys keep every message about one entity on one ordered
//! partition.

use uuid::Uuid;

use crate::objects::{DeadLetterRecord, EventEnvelope, PlayerUpdate, ScoreUpdate};

/// `EventEnvelope`, keyed by match id.
pub const INGEST_EVENTS: &str = "ingest-events";
/// `ScoreUpdate`, keyed by match id.
pub const LIVE_SCORES: &str = "live-scores";
/// `PlayerUpdate`, keyed by player id.
pub const PLAYER_UPDATES: &str = "player-updates";
/// `DeadLetterRecord`, keyed by a fresh id.
pub const DEAD_LETTER_QUEUE: &str = "dead-letter-queue";

/// Every topic of the contract.
pub const ALL_TOPICS: &[&str] = &[INGEST_EVENTS, LIVE_SCORES, PLAYER_UPDATES, DEAD_LETTER_QUEUE];

/// A message type bound to its topic and partition-key rule.
pub trait TopicMessage {
    const TOPIC: &'static str;

    fn partition_key(&self) -> String;
}

impl TopicMessage for EventEnvelope {
    const TOPIC: &'static str = INGEST_EVENTS;

    fn partition_key(&self) -> String {
        self.match_id.to_string()
    }
}

impl TopicMessage for ScoreUpdate {
    const TOPIC: &'static str = LIVE_SCORES;

    fn partition_key(&self) -> String {
        self.match_id.to_string()
    }
}

impl TopicMessage for PlayerUpdate {
    const TOPIC: &'static str = PLAYER_UPDATES;

    fn partition_key(&self) -> String {
        self.player_id.to_string()
    }
}

impl TopicMessage for DeadLetterRecord {
    const TOPIC: &'static str = DEAD_LETTER_QUEUE;

    fn partition_key(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

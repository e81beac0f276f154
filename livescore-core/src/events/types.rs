//! Event type definitions passed between pipeline stages.
//!
//! Everything here is an immutable snapshot. No stage holds a reference into
//! another stage's state.

use compact_str::CompactString;
use livescore_sdk::objects::{EventEnvelope, HubServerMessage, PlayerUpdate, ScoreUpdate};
use livescore_sdk::topics::TopicMessage;
use smallvec::SmallVec;
use uuid::Uuid;

/// A message produced by one simulator tick for one match.
#[derive(Debug, Clone, PartialEq)]
pub enum Emission {
    Event(EventEnvelope),
    Score(ScoreUpdate),
    Player(PlayerUpdate),
}

impl Emission {
    pub fn match_id(&self) -> i64 {
        match self {
            Emission::Event(event) => event.match_id,
            Emission::Score(score) => score.match_id,
            Emission::Player(update) => update.match_id,
        }
    }

    /// Topic the emission is published on.
    pub fn topic(&self) -> &'static str {
        match self {
            Emission::Event(_) => EventEnvelope::TOPIC,
            Emission::Score(_) => ScoreUpdate::TOPIC,
            Emission::Player(_) => PlayerUpdate::TOPIC,
        }
    }
}

/// Names of hub groups a broadcast targets. Most broadcasts hit four or fewer.
pub type GroupList = SmallVec<[CompactString; 4]>;

/// A broadcast travelling over the backplane between hub instances.
///
/// Every instance, including the origin, delivers `frame` to its local
/// members of `groups`.
#[derive(Debug, Clone)]
pub struct GroupBroadcast {
    /// Hub instance that issued the broadcast.
    pub origin: Uuid,
    pub groups: GroupList,
    pub frame: HubServerMessage,
}

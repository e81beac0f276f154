//! WebSocket message types for the `/sportshub` push transport.
//!
//! # Protocol
//!
//! 1. The client sends [`HubClientMessage`] frames to change what it
//!    follows. Every `subscribeTo*` is answered with a
//!    [`HubServerMessage::SubscriptionConfirmed`]; unsubscribes are silent.
//! 2. The server pushes [`HubServerMessage::ScoreUpdate`],
//!    [`HubServerMessage::MatchEvent`] and [`HubServerMessage::PlayerUpdate`]
//!    frames for every group the connection belongs to.
//! 3. `setEventTypes` narrows the pushed match events to the listed types;
//!    score and player frames are not affected.
//! 4. Preference state lives only as long as the connection.
//!
//! Frames are internally tagged on `"type"`:
//!
//! ```json
//! {"type":"subscribeToTeam","id":7}
//! {"type":"subscriptionConfirmed","kind":"team","id":7}
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{EventEnvelope, EventType, PlayerUpdate, ScoreUpdate};

/// What a connection can follow. Each kind maps to a broadcast group
/// named `"{kind}_{id}"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionKind {
    Team,
    Player,
    League,
    Match,
}

impl SubscriptionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionKind::Team => "team",
            SubscriptionKind::Player => "player",
            SubscriptionKind::League => "league",
            SubscriptionKind::Match => "match",
        }
    }
}

impl std::fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client-to-server frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubClientMessage {
    SubscribeToTeam { id: i64 },
    UnsubscribeFromTeam { id: i64 },
    SubscribeToPlayer { id: i64 },
    UnsubscribeFromPlayer { id: i64 },
    SubscribeToLeague { id: i64 },
    UnsubscribeFromLeague { id: i64 },
    SubscribeToMatch { id: i64 },
    UnsubscribeFromMatch { id: i64 },
    GetUserPreferences,
    /// Only push match events of these types. An empty list means all.
    SetEventTypes {
        #[serde(rename = "eventTypes")]
        event_types: Vec<EventType>,
    },
}

/// A subscription change requested by a client frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionChange {
    Subscribe(SubscriptionKind, i64),
    Unsubscribe(SubscriptionKind, i64),
}

impl HubClientMessage {
    /// The subscription change this frame asks for, if any.
    pub fn subscription_change(&self) -> Option<SubscriptionChange> {
        use HubClientMessage::*;
        use SubscriptionChange::{Subscribe, Unsubscribe};
        use SubscriptionKind::*;

        let change = match self {
            SubscribeToTeam { id } => Subscribe(Team, *id),
            UnsubscribeFromTeam { id } => Unsubscribe(Team, *id),
            SubscribeToPlayer { id } => Subscribe(Player, *id),
            UnsubscribeFromPlayer { id } => Unsubscribe(Player, *id),
            SubscribeToLeague { id } => Subscribe(League, *id),
            UnsubscribeFromLeague { id } => Unsubscribe(League, *id),
            SubscribeToMatch { id } => Subscribe(Match, *id),
            UnsubscribeFromMatch { id } => Unsubscribe(Match, *id),
            GetUserPreferences | SetEventTypes { .. } => return None,
        };
        Some(change)
    }
}

/// Preference state of one connection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPreferences {
    pub favorite_team_ids: BTreeSet<i64>,
    pub favorite_player_ids: BTreeSet<i64>,
    pub favorite_league_ids: BTreeSet<i64>,
    pub match_ids: BTreeSet<i64>,
    pub event_types_to_notify: BTreeSet<EventTypeName>,
}

impl UserPreferences {
    /// Whether a match event of `event_type` should be pushed.
    pub fn wants_event(&self, event_type: EventType) -> bool {
        self.event_types_to_notify.is_empty()
            || self.event_types_to_notify.contains(&EventTypeName(event_type))
    }
}

/// [`EventType`] wrapper that orders by wire code, for use in sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypeName(pub EventType);

impl PartialOrd for EventTypeName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EventTypeName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.0.code().cmp(&other.0.code())
    }
}

/// Server-to-client frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubServerMessage {
    /// Acknowledges a `subscribeTo*` frame.
    SubscriptionConfirmed { kind: SubscriptionKind, id: i64 },

    /// Answer to `getUserPreferences`.
    UserPreferences { preferences: UserPreferences },

    ScoreUpdate { update: ScoreUpdate },

    MatchEvent { event: EventEnvelope },

    PlayerUpdate { update: PlayerUpdate },

    /// A frame the server could not act on. The connection stays open.
    Error { reason: String },
}

//! Connection and group membership table of one hub instance.

use crate::events::OutboundSender;
use compact_str::{CompactString, format_compact};
use livescore_sdk::objects::{EventType, EventTypeName, SubscriptionKind, UserPreferences};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Broadcast group of `(kind, id)`, e.g. `team_7`.
pub fn group_name(kind: SubscriptionKind, id: i64) -> CompactString {
    format_compact!("{kind}_{id}")
}

fn preference_set(preferences: &mut UserPreferences, kind: SubscriptionKind) -> &mut BTreeSet<i64> {
    match kind {
        SubscriptionKind::Team => &mut preferences.favorite_team_ids,
        SubscriptionKind::Player => &mut preferences.favorite_player_ids,
        SubscriptionKind::League => &mut preferences.favorite_league_ids,
        SubscriptionKind::Match => &mut preferences.match_ids,
    }
}

#[derive(Debug)]
struct SubscriptionEntry {
    preferences: UserPreferences,
    outbound: OutboundSender,
}

#[derive(Debug, Default)]
struct RegistryState {
    connections: HashMap<Uuid, SubscriptionEntry>,
    /// group -> member connections
    groups: HashMap<CompactString, HashSet<Uuid>>,
}

impl RegistryState {
    fn leave(&mut self, group: &CompactString, connection_id: Uuid) {
        if let Some(members) = self.groups.get_mut(group) {
            members.remove(&connection_id);
            if members.is_empty() {
                self.groups.remove(group);
            }
        }
    }
}

/// Preferences and group memberships of the connections held by this
/// instance. Group membership is derived from the preferences one to one.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    state: Arc<RwLock<RegistryState>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, connection_id: Uuid, outbound: OutboundSender) {
        self.state.write().await.connections.insert(
            connection_id,
            SubscriptionEntry {
                preferences: UserPreferences::default(),
                outbound,
            },
        );
    }

    /// Record the preference and join its group. Returns `false` for an
    /// unknown connection.
    pub async fn subscribe(&self, connection_id: Uuid, kind: SubscriptionKind, id: i64) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        preference_set(&mut entry.preferences, kind).insert(id);
        state
            .groups
            .entry(group_name(kind, id))
            .or_default()
            .insert(connection_id);
        true
    }

    /// Remove the preference and leave its group.
    pub async fn unsubscribe(&self, connection_id: Uuid, kind: SubscriptionKind, id: i64) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        preference_set(&mut entry.preferences, kind).remove(&id);
        state.leave(&group_name(kind, id), connection_id);
        true
    }

    /// Replace the match-event filter of a connection.
    pub async fn set_event_types(
        &self,
        connection_id: Uuid,
        event_types: impl IntoIterator<Item = EventType>,
    ) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.get_mut(&connection_id) else {
            return false;
        };
        entry.preferences.event_types_to_notify =
            event_types.into_iter().map(EventTypeName).collect();
        true
    }

    pub async fn preferences(&self, connection_id: Uuid) -> Option<UserPreferences> {
        self.state
            .read()
            .await
            .connections
            .get(&connection_id)
            .map(|entry| entry.preferences.clone())
    }

    /// Purge all state of a connection.
    pub async fn remove(&self, connection_id: Uuid) -> bool {
        let mut state = self.state.write().await;
        let Some(entry) = state.connections.remove(&connection_id) else {
            return false;
        };
        let p = &entry.preferences;
        let groups: Vec<CompactString> = [
            (SubscriptionKind::Team, &p.favorite_team_ids),
            (SubscriptionKind::Player, &p.favorite_player_ids),
            (SubscriptionKind::League, &p.favorite_league_ids),
            (SubscriptionKind::Match, &p.match_ids),
        ]
        .into_iter()
        .flat_map(|(kind, ids)| ids.iter().map(move |id| group_name(kind, *id)))
        .collect();
        for group in &groups {
            state.leave(group, connection_id);
        }
        true
    }

    /// Outbound channels of every connection in at least one of `groups`,
    /// each connection once. With `event_type` set, connections whose
    /// event filter excludes it are skipped.
    pub async fn members<'a>(
        &self,
        groups: impl IntoIterator<Item = &'a CompactString>,
        event_type: Option<EventType>,
    ) -> Vec<(Uuid, OutboundSender)> {
        let state = self.state.read().await;
        let ids: HashSet<Uuid> = groups
            .into_iter()
            .filter_map(|group| state.groups.get(group))
            .flatten()
            .copied()
            .collect();
        ids.into_iter()
            .filter_map(|id| {
                state
                    .connections
                    .get(&id)
                    .filter(|entry| event_type.is_none_or(|t| entry.preferences.wants_event(t)))
                    .map(|entry| (id, entry.outbound.clone()))
            })
            .collect()
    }

    pub async fn connection_count(&self) -> usize {
        self.state.read().await.connections.len()
    }

    pub async fn group_count(&self) -> usize {
        self.state.read().await.groups.len()
    }
}

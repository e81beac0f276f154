//! Maps consumed messages to hub groups and broadcasts them.

use super::{Hub, HubError, group_name};
use crate::broker::BrokerError;
use crate::consumer::{ConsumerPipeline, MessageHandler};
use crate::events::GroupList;
use crate::sinks::MatchStore;
use async_trait::async_trait;
use compact_str::CompactString;
use livescore_sdk::objects::{
    EventEnvelope, HubServerMessage, PlayerUpdate, ScoreUpdate, SubscriptionKind,
};
use std::sync::Arc;
use tracing::{instrument, warn};

fn push_unique(groups: &mut GroupList, group: CompactString) {
    if !groups.contains(&group) {
        groups.push(group);
    }
}

/// Routes score updates, match events and player updates to the groups of
/// the entities they concern.
///
/// Team and league groups need the match row. When it cannot be read the
/// message still goes to the match and player groups.
pub struct NotificationRouter {
    hub: Hub,
    matches: Arc<dyn MatchStore>,
}

impl NotificationRouter {
    pub fn new(hub: Hub, matches: Arc<dyn MatchStore>) -> Self {
        Self { hub, matches }
    }

    /// Start one loop per notified topic on `pipeline`.
    pub async fn attach(self: Arc<Self>, pipeline: &mut ConsumerPipeline) -> Result<(), BrokerError> {
        pipeline
            .spawn_topic::<EventEnvelope, _>(self.clone())
            .await?;
        pipeline.spawn_topic::<ScoreUpdate, _>(self.clone()).await?;
        pipeline.spawn_topic::<PlayerUpdate, _>(self).await?;
        Ok(())
    }

    /// `match_{id}` followed by the league and both teams when the match is
    /// known.
    async fn match_groups(&self, match_id: i64, include_teams: bool) -> GroupList {
        let mut groups = GroupList::new();
        groups.push(group_name(SubscriptionKind::Match, match_id));

        match self.matches.get_match(match_id).await {
            Ok(Some(row)) => {
                push_unique(&mut groups, group_name(SubscriptionKind::League, row.league_id));
                if include_teams {
                    push_unique(&mut groups, group_name(SubscriptionKind::Team, row.home_team_id));
                    push_unique(&mut groups, group_name(SubscriptionKind::Team, row.away_team_id));
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!(match_id, error = %e, "Match lookup failed, routing to match group only");
            }
        }
        groups
    }

    pub async fn route_score(&self, update: &ScoreUpdate) -> GroupList {
        self.match_groups(update.match_id, true).await
    }

    pub async fn route_event(&self, event: &EventEnvelope) -> GroupList {
        let mut groups = self.match_groups(event.match_id, false).await;
        if let Some(team_id) = event.team_id {
            push_unique(&mut groups, group_name(SubscriptionKind::Team, team_id));
        }
        if let Some(player_id) = event.player_id {
            push_unique(&mut groups, group_name(SubscriptionKind::Player, player_id));
        }
        groups
    }

    pub fn route_player_update(&self, update: &PlayerUpdate) -> GroupList {
        let mut groups = GroupList::new();
        groups.push(group_name(SubscriptionKind::Player, update.player_id));
        groups.push(group_name(SubscriptionKind::Match, update.match_id));
        groups
    }
}

#[async_trait]
impl MessageHandler<ScoreUpdate> for NotificationRouter {
    type Error = HubError;

    #[instrument(skip_all, fields(match_id = update.match_id))]
    async fn handle(&self, update: ScoreUpdate) -> Result<(), HubError> {
        let groups = self.route_score(&update).await;
        self.hub
            .broadcast(groups, HubServerMessage::ScoreUpdate { update })
            .await
    }
}

#[async_trait]
impl MessageHandler<EventEnvelope> for NotificationRouter {
    type Error = HubError;

    #[instrument(skip_all, fields(event_id = %event.event_id, match_id = event.match_id))]
    async fn handle(&self, event: EventEnvelope) -> Result<(), HubError> {
        let groups = self.route_event(&event).await;
        self.hub
            .broadcast(groups, HubServerMessage::MatchEvent { event })
            .await
    }
}

#[async_trait]
impl MessageHandler<PlayerUpdate> for NotificationRouter {
    type Error = HubError;

    async fn handle(&self, update: PlayerUpdate) -> Result<(), HubError> {
        let groups = self.route_player_update(&update);
        self.hub
            .broadcast(groups, HubServerMessage::PlayerUpdate { update })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HubConfig;
    use crate::hub::MemoryBackplane;
    use crate::sinks::{MatchRow, MemoryMatchStore};
    use livescore_sdk::objects::{EventType, MatchStatus, Metadata};
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn router(store: Arc<MemoryMatchStore>) -> NotificationRouter {
        let (hub, _delivery) = Hub::new(Arc::new(MemoryBackplane::new(8)), HubConfig::default());
        NotificationRouter::new(hub, store)
    }

    fn store() -> Arc<MemoryMatchStore> {
        let now = OffsetDateTime::now_utc();
        Arc::new(MemoryMatchStore::seeded([MatchRow {
            match_id: 4,
            league_id: 5,
            home_team_id: 7,
            away_team_id: 8,
            scheduled_time: now,
            status: MatchStatus::Live,
            home_score: 0,
            away_score: 0,
            minute: 1,
            venue: None,
            created_at: now,
            updated_at: now,
        }]))
    }

    fn names(groups: &GroupList) -> Vec<&str> {
        groups.iter().map(CompactString::as_str).collect()
    }

    fn score(match_id: i64) -> ScoreUpdate {
        ScoreUpdate {
            match_id,
            home_score: 0,
            away_score: 0,
            minute: 1,
            status: MatchStatus::Live,
            timestamp: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn test_score_routes_to_match_league_and_teams() {
        let router = router(store());
        let groups = router.route_score(&score(4)).await;
        assert_eq!(names(&groups), ["match_4", "league_5", "team_7", "team_8"]);
    }

    #[tokio::test]
    async fn test_unknown_match_routes_to_match_group() {
        let router = router(store());
        let groups = router.route_score(&score(40)).await;
        assert_eq!(names(&groups), ["match_40"]);
    }

    #[tokio::test]
    async fn test_lookup_failure_degrades_to_match_group() {
        let store = store();
        store.fail_next(1);
        let router = router(store);
        let groups = router.route_score(&score(4)).await;
        assert_eq!(names(&groups), ["match_4"]);
    }

    #[tokio::test]
    async fn test_event_routes_to_its_team_and_player() {
        let router = router(store());
        let event = EventEnvelope {
            event_id: Uuid::new_v4(),
            match_id: 4,
            event_type: EventType::Shot,
            minute: 20,
            player_id: Some(80),
            team_id: Some(7),
            description: "Shot".into(),
            metadata: Metadata::new(),
            timestamp: OffsetDateTime::now_utc(),
        };
        let groups = router.route_event(&event).await;
        assert_eq!(names(&groups), ["match_4", "league_5", "team_7", "player_80"]);
    }

    #[tokio::test]
    async fn test_player_update_routes_to_player_and_match() {
        let router = router(store());
        let update = PlayerUpdate {
            player_id: 80,
            match_id: 4,
            statistics: Metadata::new(),
            timestamp: OffsetDateTime::now_utc(),
        };
        assert_eq!(
            names(&router.route_player_update(&update)),
            ["player_80", "match_4"]
        );
    }
}

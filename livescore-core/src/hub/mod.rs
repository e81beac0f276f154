//! Notification hub: per-connection subscriptions and group broadcast.
//!
//! A connection's groups are its subscription state. Broadcasts go through
//! the [`Backplane`] so that a broadcast issued on one instance reaches the
//! connections held by every instance. Each instance runs one
//! [`HubDelivery`] task that pushes backplane broadcasts to its local group
//! members.

mod backplane;
mod registry;
mod router;

pub use backplane::{Backplane, MemoryBackplane};
pub use registry::{SubscriptionRegistry, group_name};
pub use router::NotificationRouter;

use crate::config::HubConfig;
use crate::events::{GroupBroadcast, GroupList, OutboundReceiver, OutboundSender, outbound_channel};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use livescore_sdk::objects::{
    EventType, HubClientMessage, HubServerMessage, SubscriptionChange, SubscriptionKind,
    UserPreferences,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("backplane error: {0}")]
    Backplane(String),
}

/// One hub instance.
#[derive(Clone)]
pub struct Hub {
    instance_id: Uuid,
    backplane: Arc<dyn Backplane>,
    registry: SubscriptionRegistry,
    config: HubConfig,
}

impl Hub {
    /// Create a hub instance and the delivery task feeding its connections.
    ///
    /// The delivery task is subscribed to the backplane before this returns.
    pub fn new(backplane: Arc<dyn Backplane>, config: HubConfig) -> (Hub, HubDelivery) {
        let instance_id = Uuid::new_v4();
        let registry = SubscriptionRegistry::new();
        let delivery = HubDelivery {
            instance_id,
            registry: registry.clone(),
            broadcasts: backplane.subscribe(),
        };
        let hub = Hub {
            instance_id,
            backplane,
            registry,
            config,
        };
        (hub, delivery)
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Register a new connection. Frames for it arrive on the returned
    /// receiver.
    pub async fn connect(&self) -> (HubConnection, OutboundReceiver) {
        let (outbound, rx) = outbound_channel(self.config.outbound_buffer);
        let id = Uuid::new_v4();
        self.registry.register(id, outbound.clone()).await;
        debug!(connection_id = %id, "Hub connection opened");
        (
            HubConnection {
                id,
                registry: self.registry.clone(),
                outbound,
            },
            rx,
        )
    }

    /// Send `frame` to every member of `groups` on every instance.
    pub async fn broadcast(&self, groups: GroupList, frame: HubServerMessage) -> Result<(), HubError> {
        self.backplane
            .publish(GroupBroadcast {
                origin: self.instance_id,
                groups,
                frame,
            })
            .await
    }
}

/// Delivers backplane broadcasts to the connections of one instance.
pub struct HubDelivery {
    instance_id: Uuid,
    registry: SubscriptionRegistry,
    broadcasts: BoxStream<'static, GroupBroadcast>,
}

impl HubDelivery {
    pub async fn run(mut self, mut shutdown_rx: watch::Receiver<bool>) {
        info!(instance_id = %self.instance_id, "Hub delivery started");

        loop {
            let next = tokio::select! {
                biased;

                _ = shutdown_rx.wait_for(|stop| *stop) => {
                    info!("Hub delivery received shutdown signal");
                    break;
                }

                next = self.broadcasts.next() => next,
            };

            match next {
                Some(broadcast) => {
                    self.deliver(broadcast).await;
                }
                None => {
                    warn!("Backplane closed");
                    break;
                }
            }
        }

        info!(instance_id = %self.instance_id, "Hub delivery stopped");
    }

    /// Push one broadcast to local members. Returns the number of
    /// connections reached.
    async fn deliver(&mut self, broadcast: GroupBroadcast) -> usize {
        let event_type = match &broadcast.frame {
            HubServerMessage::MatchEvent { event } => Some(event.event_type),
            _ => None,
        };
        let members = self.registry.members(&broadcast.groups, event_type).await;
        let mut delivered = 0;
        for (connection_id, outbound) in members {
            match outbound.try_send(broadcast.frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(%connection_id, "Connection is not keeping up, frame dropped");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    debug!(%connection_id, "Connection already closed");
                }
            }
        }
        debug!(
            origin = %broadcast.origin,
            groups = ?broadcast.groups,
            delivered,
            "Broadcast delivered"
        );
        delivered
    }
}

/// Server side of one client connection.
#[derive(Debug)]
pub struct HubConnection {
    id: Uuid,
    registry: SubscriptionRegistry,
    outbound: OutboundSender,
}

impl HubConnection {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Act on a client frame.
    pub async fn handle(&self, message: HubClientMessage) {
        match message.subscription_change() {
            Some(SubscriptionChange::Subscribe(kind, id)) => self.subscribe(kind, id).await,
            Some(SubscriptionChange::Unsubscribe(kind, id)) => self.unsubscribe(kind, id).await,
            None => match message {
                HubClientMessage::SetEventTypes { event_types } => {
                    self.set_event_types(event_types).await;
                }
                _ => {
                    let preferences = self.preferences().await;
                    self.push(HubServerMessage::UserPreferences { preferences });
                }
            },
        }
    }

    /// Join `"{kind}_{id}"` and confirm to the client.
    pub async fn subscribe(&self, kind: SubscriptionKind, id: i64) {
        if self.registry.subscribe(self.id, kind, id).await {
            debug!(connection_id = %self.id, %kind, id, "Subscribed");
            self.push(HubServerMessage::SubscriptionConfirmed { kind, id });
        }
    }

    pub async fn unsubscribe(&self, kind: SubscriptionKind, id: i64) {
        if self.registry.unsubscribe(self.id, kind, id).await {
            debug!(connection_id = %self.id, %kind, id, "Unsubscribed");
        }
    }

    /// Restrict pushed match events to `event_types`; empty means all.
    pub async fn set_event_types(&self, event_types: Vec<EventType>) {
        if self.registry.set_event_types(self.id, event_types).await {
            debug!(connection_id = %self.id, "Event filter updated");
        }
    }

    pub async fn preferences(&self) -> UserPreferences {
        self.registry.preferences(self.id).await.unwrap_or_default()
    }

    /// Tell the client a frame was not understood.
    pub fn reject(&self, reason: impl Into<String>) {
        self.push(HubServerMessage::Error {
            reason: reason.into(),
        });
    }

    /// Drop every preference and membership of this connection.
    pub async fn disconnect(self) {
        self.registry.remove(self.id).await;
        debug!(connection_id = %self.id, "Hub connection closed");
    }

    fn push(&self, frame: HubServerMessage) {
        if let Err(e) = self.outbound.try_send(frame) {
            warn!(connection_id = %self.id, error = %e, "Failed to queue direct reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use livescore_sdk::objects::{EventEnvelope, MatchStatus, Metadata, ScoreUpdate};
    use std::time::Duration;
    use time::OffsetDateTime;

    fn score_frame(match_id: i64) -> HubServerMessage {
        HubServerMessage::ScoreUpdate {
            update: ScoreUpdate {
                match_id,
                home_score: 1,
                away_score: 0,
                minute: 12,
                status: MatchStatus::Live,
                timestamp: OffsetDateTime::now_utc(),
            },
        }
    }

    fn groups(names: &[&str]) -> GroupList {
        names.iter().map(|name| (*name).into()).collect()
    }

    fn spawn_hub(backplane: Arc<dyn Backplane>) -> (Hub, watch::Sender<bool>) {
        let (hub, delivery) = Hub::new(backplane, HubConfig::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(delivery.run(shutdown_rx));
        (hub, shutdown_tx)
    }

    async fn recv(rx: &mut OutboundReceiver) -> Option<HubServerMessage> {
        tokio::time::timeout(Duration::from_millis(200), rx.recv())
            .await
            .ok()
            .flatten()
    }

    #[tokio::test]
    async fn test_subscribe_is_confirmed() {
        let (hub, _shutdown) = spawn_hub(Arc::new(MemoryBackplane::new(16)));
        let (connection, mut rx) = hub.connect().await;

        connection
            .handle(HubClientMessage::SubscribeToTeam { id: 4 })
            .await;

        assert_eq!(
            recv(&mut rx).await,
            Some(HubServerMessage::SubscriptionConfirmed {
                kind: SubscriptionKind::Team,
                id: 4
            })
        );
    }

    #[tokio::test]
    async fn test_preferences_reflect_subscriptions() {
        let (hub, _shutdown) = spawn_hub(Arc::new(MemoryBackplane::new(16)));
        let (connection, mut rx) = hub.connect().await;

        connection.subscribe(SubscriptionKind::Player, 23).await;
        connection.subscribe(SubscriptionKind::League, 2).await;
        connection.unsubscribe(SubscriptionKind::League, 2).await;
        connection.handle(HubClientMessage::GetUserPreferences).await;

        // Two confirmations, no frame for the unsubscribe.
        recv(&mut rx).await.unwrap();
        recv(&mut rx).await.unwrap();
        match recv(&mut rx).await {
            Some(HubServerMessage::UserPreferences { preferences }) => {
                assert!(preferences.favorite_player_ids.contains(&23));
                assert!(preferences.favorite_league_ids.is_empty());
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_broadcast_reaches_group_members_once() {
        let (hub, _shutdown) = spawn_hub(Arc::new(MemoryBackplane::new(16)));
        let (first, mut first_rx) = hub.connect().await;
        let (second, mut second_rx) = hub.connect().await;
        let (_third, mut third_rx) = hub.connect().await;

        first.subscribe(SubscriptionKind::Team, 1).await;
        first.subscribe(SubscriptionKind::Match, 10).await;
        second.subscribe(SubscriptionKind::Team, 1).await;
        recv(&mut first_rx).await.unwrap();
        recv(&mut first_rx).await.unwrap();
        recv(&mut second_rx).await.unwrap();

        hub.broadcast(groups(&["match_10", "team_1", "team_2"]), score_frame(10))
            .await
            .unwrap();

        assert!(matches!(
            recv(&mut first_rx).await,
            Some(HubServerMessage::ScoreUpdate { update }) if update.match_id == 10
        ));
        assert!(recv(&mut first_rx).await.is_none());
        assert!(matches!(
            recv(&mut second_rx).await,
            Some(HubServerMessage::ScoreUpdate { .. })
        ));
        assert!(recv(&mut third_rx).await.is_none());
    }

    #[tokio::test]
    async fn test_broadcast_crosses_instances() {
        let backplane: Arc<dyn Backplane> = Arc::new(MemoryBackplane::new(16));
        let (hub_a, _shutdown_a) = spawn_hub(backplane.clone());
        let (hub_b, _shutdown_b) = spawn_hub(backplane);

        let (remote, mut remote_rx) = hub_b.connect().await;
        remote.subscribe(SubscriptionKind::Match, 3).await;
        recv(&mut remote_rx).await.unwrap();

        hub_a
            .broadcast(groups(&["match_3"]), score_frame(3))
            .await
            .unwrap();

        assert!(matches!(
            recv(&mut remote_rx).await,
            Some(HubServerMessage::ScoreUpdate { update }) if update.match_id == 3
        ));
    }

    #[tokio::test]
    async fn test_disconnect_stops_delivery() {
        let (hub, _shutdown) = spawn_hub(Arc::new(MemoryBackplane::new(16)));
        let (connection, mut rx) = hub.connect().await;
        connection.subscribe(SubscriptionKind::Match, 5).await;
        recv(&mut rx).await.unwrap();

        connection.disconnect().await;
        assert_eq!(hub.registry().connection_count().await, 0);

        hub.broadcast(groups(&["match_5"]), score_frame(5))
            .await
            .unwrap();
        assert!(recv(&mut rx).await.is_none());
    }

    #[tokio::test]
    async fn test_event_filter_applies_to_match_events_only() {
        let (hub, _shutdown) = spawn_hub(Arc::new(MemoryBackplane::new(16)));
        let (connection, mut rx) = hub.connect().await;
        connection.subscribe(SubscriptionKind::Match, 6).await;
        recv(&mut rx).await.unwrap();
        connection
            .handle(HubClientMessage::SetEventTypes {
                event_types: vec![EventType::Goal],
            })
            .await;

        let event = |event_type: EventType| EventEnvelope {
            event_id: Uuid::new_v4(),
            match_id: 6,
            event_type,
            minute: 30,
            player_id: None,
            team_id: Some(1),
            description: String::new(),
            timestamp: OffsetDateTime::now_utc(),
            metadata: Metadata::new(),
        };
        hub.broadcast(groups(&["match_6"]), HubServerMessage::MatchEvent {
            event: event(EventType::Corner),
        })
        .await
        .unwrap();
        hub.broadcast(groups(&["match_6"]), HubServerMessage::MatchEvent {
            event: event(EventType::Goal),
        })
        .await
        .unwrap();
        hub.broadcast(groups(&["match_6"]), score_frame(6))
            .await
            .unwrap();

        assert!(matches!(
            recv(&mut rx).await,
            Some(HubServerMessage::MatchEvent { event }) if event.event_type == EventType::Goal
        ));
        assert!(matches!(
            recv(&mut rx).await,
            Some(HubServerMessage::ScoreUpdate { .. })
        ));
        assert!(recv(&mut rx).await.is_none());

        connection.handle(HubClientMessage::GetUserPreferences).await;
        match recv(&mut rx).await {
            Some(HubServerMessage::UserPreferences { preferences }) => {
                assert_eq!(preferences.event_types_to_notify.len(), 1);
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_full_connection_drops_frames() {
        let backplane: Arc<dyn Backplane> = Arc::new(MemoryBackplane::new(16));
        let (hub, mut delivery) = Hub::new(
            backplane,
            HubConfig {
                outbound_buffer: 1,
                ..Default::default()
            },
        );
        let (connection, mut rx) = hub.connect().await;
        connection.subscribe(SubscriptionKind::Match, 8).await;

        // The confirmation occupies the only slot.
        let broadcast = GroupBroadcast {
            origin: hub.instance_id(),
            groups: groups(&["match_8"]),
            frame: score_frame(8),
        };
        assert_eq!(delivery.deliver(broadcast).await, 0);
        assert!(matches!(
            rx.recv().await,
            Some(HubServerMessage::SubscriptionConfirmed { .. })
        ));
    }
}

//! Pub/sub channel shared by hub instances.

use super::HubError;
use crate::events::{BackplaneSender, GroupBroadcast, backplane_channel};
use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::warn;

/// Carries group broadcasts to every hub instance, the sender included.
#[async_trait]
pub trait Backplane: Send + Sync {
    async fn publish(&self, broadcast: GroupBroadcast) -> Result<(), HubError>;

    /// Broadcasts published from now on.
    fn subscribe(&self) -> BoxStream<'static, GroupBroadcast>;
}

/// Backplane for hub instances living in the same process.
#[derive(Debug, Clone)]
pub struct MemoryBackplane {
    tx: BackplaneSender,
}

impl MemoryBackplane {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = backplane_channel(capacity);
        Self { tx }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl Backplane for MemoryBackplane {
    async fn publish(&self, broadcast: GroupBroadcast) -> Result<(), HubError> {
        self.tx
            .send(broadcast)
            .map(|_| ())
            .map_err(|_| HubError::Backplane("no hub instance is subscribed".to_string()))
    }

    fn subscribe(&self) -> BoxStream<'static, GroupBroadcast> {
        BroadcastStream::new(self.tx.subscribe())
            .filter_map(|item| async move {
                match item {
                    Ok(broadcast) => Some(broadcast),
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        warn!(skipped, "Backplane subscriber lagged, broadcasts dropped");
                        None
                    }
                }
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GroupList;
    use livescore_sdk::objects::HubServerMessage;
    use uuid::Uuid;

    fn broadcast(reason: &str) -> GroupBroadcast {
        GroupBroadcast {
            origin: Uuid::new_v4(),
            groups: GroupList::from_iter(["match_1".into()]),
            frame: HubServerMessage::Error {
                reason: reason.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_receives() {
        let backplane = MemoryBackplane::new(8);
        let mut a = backplane.subscribe();
        let mut b = backplane.subscribe();
        assert_eq!(backplane.subscriber_count(), 2);

        backplane.publish(broadcast("x")).await.unwrap();

        assert_eq!(a.next().await.unwrap().frame, broadcast("x").frame);
        assert_eq!(b.next().await.unwrap().frame, broadcast("x").frame);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let backplane = MemoryBackplane::new(8);
        assert!(matches!(
            backplane.publish(broadcast("x")).await,
            Err(HubError::Backplane(_))
        ));
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let backplane = MemoryBackplane::new(2);
        let mut stream = backplane.subscribe();
        for i in 0..5 {
            backplane.publish(broadcast(&i.to_string())).await.unwrap();
        }

        // Only the newest two are retained.
        assert_eq!(stream.next().await.unwrap().frame, broadcast("3").frame);
        assert_eq!(stream.next().await.unwrap().frame, broadcast("4").frame);
    }
}

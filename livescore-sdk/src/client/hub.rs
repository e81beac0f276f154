use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::ClientError;
use crate::objects::{EventType, HubClientMessage, HubServerMessage, SubscriptionKind};

/// Typed client for the notification hub.
///
/// ```no_run
/// # async fn demo() -> Result<(), livescore_sdk::client::ClientError> {
/// use livescore_sdk::client::HubClient;
/// use livescore_sdk::objects::SubscriptionKind;
///
/// let mut hub = HubClient::connect("ws://localhost:8080/sportshub").await?;
/// hub.subscribe(SubscriptionKind::Team, 7).await?;
/// while let Some(frame) = hub.next_message().await? {
///     println!("{frame:?}");
/// }
/// # Ok(())
/// # }
/// ```
pub struct HubClient {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl HubClient {
    /// Open a connection to a `/sportshub` endpoint (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Self { stream })
    }

    /// Send a raw client frame.
    pub async fn send(&mut self, message: &HubClientMessage) -> Result<(), ClientError> {
        let json = serde_json::to_string(message)?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    pub async fn subscribe(&mut self, kind: SubscriptionKind, id: i64) -> Result<(), ClientError> {
        let message = match kind {
            SubscriptionKind::Team => HubClientMessage::SubscribeToTeam { id },
            SubscriptionKind::Player => HubClientMessage::SubscribeToPlayer { id },
            SubscriptionKind::League => HubClientMessage::SubscribeToLeague { id },
            SubscriptionKind::Match => HubClientMessage::SubscribeToMatch { id },
        };
        self.send(&message).await
    }

    pub async fn unsubscribe(&mut self, kind: SubscriptionKind, id: i64) -> Result<(), ClientError> {
        let message = match kind {
            SubscriptionKind::Team => HubClientMessage::UnsubscribeFromTeam { id },
            SubscriptionKind::Player => HubClientMessage::UnsubscribeFromPlayer { id },
            SubscriptionKind::League => HubClientMessage::UnsubscribeFromLeague { id },
            SubscriptionKind::Match => HubClientMessage::UnsubscribeFromMatch { id },
        };
        self.send(&message).await
    }

    pub async fn request_preferences(&mut self) -> Result<(), ClientError> {
        self.send(&HubClientMessage::GetUserPreferences).await
    }

    /// Restrict pushed match events to `event_types`. An empty list lifts
    /// the restriction.
    pub async fn set_event_types(&mut self, event_types: Vec<EventType>) -> Result<(), ClientError> {
        self.send(&HubClientMessage::SetEventTypes { event_types }).await
    }

    /// Wait for the next server frame.
    ///
    /// Returns `Ok(None)` once the server has closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<HubServerMessage>, ClientError> {
        while let Some(frame) = self.stream.next().await {
            match frame? {
                Message::Text(text) => return Ok(Some(serde_json::from_str(&text)?)),
                Message::Binary(bytes) => return Ok(Some(serde_json::from_slice(&bytes)?)),
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
        Ok(None)
    }

    pub async fn close(mut self) -> Result<(), ClientError> {
        self.stream.close(None).await?;
        Ok(())
    }
}

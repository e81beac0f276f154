use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use livescore_core::hub::{Hub, HubConnection};
use livescore_sdk::objects::{HubClientMessage, HubServerMessage};
use tokio::sync::watch;

use crate::state::AppState;

/// `GET /sportshub`: live notification stream.
///
/// Upgrades the HTTP connection to a WebSocket bound to one hub connection.
/// The client sends `subscribeTo*` / `unsubscribeFrom*` /
/// `getUserPreferences` frames; the server pushes confirmations and every
/// broadcast to the groups the connection has joined.
pub(super) async fn sportshub_ws(
    State(state): State<AppState>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub, state.shutdown_rx))
}

/// Drives a single WebSocket connection until the client leaves or the
/// server shuts down. All subscription state is purged on exit.
async fn handle_socket(mut socket: WebSocket, hub: Hub, mut shutdown_rx: watch::Receiver<bool>) {
    let (connection, mut outbound) = hub.connect().await;
    tracing::debug!(connection_id = %connection.id(), "WS: client connected");

    let mut closing = false;
    loop {
        tokio::select! {
            _ = async { shutdown_rx.wait_for(|stop| *stop).await.map(|_| ()) } => {
                closing = true;
                break;
            }

            frame = outbound.recv() => {
                match frame {
                    Some(frame) => {
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(&connection, text.as_str()).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break;
                    }
                    Some(Ok(_)) => {
                    }
                    Some(Err(e)) => {
                        tracing::debug!(error = %e, "WS: receive failed");
                        break;
                    }
                }
            }
        }
    }

    if closing {
        let _ = socket.send(Message::Close(None)).await;
    }
    tracing::debug!(connection_id = %connection.id(), "WS: client disconnected");
    connection.disconnect().await;
}

async fn handle_text(connection: &HubConnection, text: &str) {
    match serde_json::from_str::<HubClientMessage>(text) {
        Ok(message) => connection.handle(message).await,
        Err(e) => {
            tracing::debug!(connection_id = %connection.id(), error = %e, "WS: unrecognised frame");
            connection.reject(format!("unrecognised frame: {e}"));
        }
    }
}

/// Serialize `frame` as JSON and send it as a text WebSocket frame.
///
/// Returns `Err(())` if the send fails (client disconnected).
async fn send_json(socket: &mut WebSocket, frame: &HubServerMessage) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    socket
        .send(Message::Text(json.into()))
        .await
        .map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;

    fn assert_send_handler<F, Fut>(_: F)
    where
        F: FnOnce(WebSocket, Hub, watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send,
    {
    }

    #[test]
    fn test_socket_handler_can_run_on_any_worker() {
        assert_send_handler(handle_socket);
    }
}

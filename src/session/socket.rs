//! Real-time connection pump
//!
//! Bridges one upgraded WebSocket to its game session and the hub. The reader
//! decodes input frames and forwards them to the session; the writer drains
//! the connection's outbound buffer. Whichever side finishes first ends the
//! connection and it is unregistered from the hub.

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::session::hub::{Connection, HubHandle};
use crate::session::registry::SessionRegistry;
use crate::types::PlayerInput;
use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything a connection needs to reach its session and the hub
#[derive(Clone)]
pub struct ConnectionContext {
    pub registry: Arc<SessionRegistry>,
    pub hub: HubHandle,
    pub outbound_buffer: usize,
    pub metrics_collector: Arc<MetricsCollector>,
}

/// Decode an inbound text frame as input from `player_id`
///
/// The id carried in the frame is always replaced by the connection's own.
pub fn decode_input(text: &str, player_id: &str) -> serde_json::Result<PlayerInput> {
    let mut input: PlayerInput = serde_json::from_str(text)?;
    input.player_id = player_id.to_string();
    Ok(input)
}

/// Run a connection until either side closes
pub async fn serve_connection(
    socket: WebSocket,
    match_id: String,
    player_id: String,
    context: ConnectionContext,
) -> Result<()> {
    let session = context.registry.add_player(&match_id, &player_id)?;
    let (connection, mut outbound) =
        Connection::new(match_id.clone(), player_id.clone(), context.outbound_buffer);
    let connection_id = connection.id;
    context.hub.register(connection)?;

    info!(
        "Player '{}' connected to match {} ({})",
        player_id, match_id, connection_id
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    let outgoing_task = async {
        while let Some(frame) = outbound.recv().await {
            if let Err(e) = ws_sender.send(Message::Text(frame.to_string().into())).await {
                debug!("Send to {} failed: {}", connection_id, e);
                break;
            }
        }
        let _ = ws_sender.close().await;
    };

    let incoming_task = async {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match decode_input(text.as_str(), &player_id) {
                    Ok(input) => {
                        if session.apply_input(input).is_err() {
                            warn!(
                                "Session for match {} is gone, closing {}",
                                match_id, connection_id
                            );
                            break;
                        }
                    }
                    Err(e) => {
                        context.metrics_collector.record_input("malformed");
                        debug!("Malformed input from '{}': {}", player_id, e);
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Player '{}' requested close", player_id);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    debug!("WebSocket error for {}: {}", connection_id, e);
                    break;
                }
            }
        }
    };

    tokio::select! {
        _ = outgoing_task => {},
        _ = incoming_task => {},
    }

    // No-op when the hub already dropped it as unresponsive
    let _ = context.hub.unregister(&match_id, connection_id);
    session.touch();

    info!("Player '{}' disconnected from match {}", player_id, match_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_input_overrides_player_id() {
        let frame = r#"{"player_id":"mallory","action":"move","payload":{"x":3.0,"speed":2.0}}"#;
        let input = decode_input(frame, "alice").unwrap();

        assert_eq!(input.player_id, "alice");
        assert_eq!(input.payload.x, 3.0);
        assert_eq!(input.payload.speed, 2.0);
    }

    #[test]
    fn test_decode_input_without_player_id() {
        let input = decode_input(r#"{"payload":{"angle":1.5}}"#, "bob").unwrap();
        assert_eq!(input.player_id, "bob");
        assert_eq!(input.payload.angle, 1.5);
    }

    #[test]
    fn test_decode_input_rejects_garbage() {
        assert!(decode_input("not json", "bob").is_err());
        assert!(decode_input(r#"{"action":"move"}"#, "bob").is_err());
    }
}

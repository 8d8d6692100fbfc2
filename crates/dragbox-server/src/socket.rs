//! Per-connection relay loop.

use crate::room::{AppState, Envelope};
use axum::extract::ws::{Message, WebSocket};
use dragbox_core::protocol::{base64_decode, base64_encode};
use dragbox_core::{ClientId, ClientMessage, ServerMessage};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Relay state of one WebSocket connection.
struct Connection {
    /// Server-side id, used to suppress echoes.
    id: Uuid,
    state: Arc<AppState>,
    room: Option<String>,
    /// Client id announced in `join`; presence is relayed under this id only.
    client_id: Option<ClientId>,
    rx: Option<broadcast::Receiver<Envelope>>,
}

impl Connection {
    fn new(state: Arc<AppState>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state,
            room: None,
            client_id: None,
            rx: None,
        }
    }

    /// Apply one client message. Returns the reply for this connection, if any.
    fn handle(&mut self, msg: ClientMessage) -> Option<ServerMessage> {
        match msg {
            ClientMessage::Join { room, client_id } => {
                self.leave();

                let membership = self.state.join_room(&room, self.id, client_id);
                self.rx = Some(membership.rx);
                self.room = Some(room.clone());
                self.client_id = Some(client_id);

                self.state
                    .broadcast(&room, self.id, ServerMessage::PeerJoined { client_id });
                info!(conn = %self.id, %client_id, %room, "peer joined");

                Some(ServerMessage::Joined {
                    room,
                    peer_count: membership.peer_count,
                    initial_sync: membership.initial_sync,
                })
            }
            ClientMessage::Leave => {
                self.leave();
                None
            }
            ClientMessage::Sync { data } => self.relay_sync(data),
            ClientMessage::Awareness {
                client_id: claimed,
                state,
            } => {
                let (Some(room), Some(client_id)) = (self.room.as_deref(), self.client_id) else {
                    return None;
                };
                if claimed != client_id {
                    debug!(conn = %self.id, %claimed, %client_id, "awareness under a different id");
                }
                self.state.broadcast(
                    room,
                    self.id,
                    ServerMessage::Awareness {
                        from: client_id,
                        state,
                    },
                );
                None
            }
        }
    }

    /// Merge an update into the room and forward it to the other peers.
    fn relay_sync(&self, data: String) -> Option<ServerMessage> {
        let (Some(room), Some(client_id)) = (self.room.as_deref(), self.client_id) else {
            return None;
        };

        let merged = base64_decode(&data)
            .map_err(|e| e.to_string())
            .and_then(|bytes| self.state.merge_sync(room, &bytes).map_err(|e| e.to_string()));
        if let Err(e) = merged {
            warn!(conn = %self.id, error = %e, "rejected sync data");
            return Some(ServerMessage::Error {
                message: format!("Invalid sync data: {}", e),
            });
        }

        self.state.broadcast(
            room,
            self.id,
            ServerMessage::Sync {
                from: client_id,
                data,
            },
        );
        None
    }

    fn leave(&mut self) {
        if let Some(room) = self.room.take() {
            if let Some(client_id) = self.state.leave_room(&room, self.id) {
                self.state
                    .broadcast(&room, self.id, ServerMessage::PeerLeft { client_id });
                info!(conn = %self.id, %client_id, %room, "peer left");
            }
        }
        self.client_id = None;
        self.rx = None;
    }

    /// Next room message from another connection. Pends forever outside a room.
    async fn next_broadcast(&mut self) -> Option<ServerMessage> {
        let Some(rx) = self.rx.as_mut() else {
            return std::future::pending().await;
        };
        loop {
            match rx.recv().await {
                Ok((from, _)) if from == self.id => continue,
                Ok((_, msg)) => return Some(msg),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(conn = %self.id, skipped, "connection lagged behind its room");
                    // Skipped deltas are covered by the merged room state.
                    let (Some(room), Some(client_id)) = (self.room.as_deref(), self.client_id)
                    else {
                        continue;
                    };
                    if let Some(data) = self.state.snapshot(room) {
                        return Some(ServerMessage::Sync {
                            from: client_id,
                            data,
                        });
                    }
                }
                Err(RecvError::Closed) => {
                    self.rx = None;
                    return None;
                }
            }
        }
    }
}

async fn send_json(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &ServerMessage,
) -> Result<(), axum::Error> {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            warn!(error = %e, "failed to encode server message");
            Ok(())
        }
    }
}

/// Handle a WebSocket connection
pub async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut conn = Connection::new(state);
    info!(conn = %conn.id, "new connection");

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let reply = match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(client_msg) => conn.handle(client_msg),
                        Err(e) => {
                            warn!(conn = %conn.id, error = %e, "invalid message");
                            Some(ServerMessage::Error {
                                message: format!("Invalid message: {}", e),
                            })
                        }
                    },
                    // Binary frames are raw Loro updates.
                    Some(Ok(Message::Binary(data))) => conn.relay_sync(base64_encode(&data)),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => None,
                    Some(Err(e)) => {
                        warn!(conn = %conn.id, error = %e, "websocket error");
                        break;
                    }
                };
                if let Some(reply) = reply {
                    if send_json(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
            }

            msg = conn.next_broadcast() => {
                if let Some(server_msg) = msg {
                    if send_json(&mut sender, &server_msg).await.is_err() {
                        break;
                    }
                }
            }
        }
    }

    conn.leave();
    info!(conn = %conn.id, "connection closed");
}

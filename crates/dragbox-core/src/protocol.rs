//! Relay wire protocol.
//!
//! Messages are JSON text frames tagged by `type`:
//! ```json
//! { "type": "join", "room": "dragbox", "client_id": 42 }
//! { "type": "sync", "data": "<base64 loro update>" }
//! { "type": "awareness", "client_id": 42, "color": "#aabbcc", "cursor": null, "is_selecting": false }
//! ```

use crate::identity::ClientId;
use crate::presence::WirePresence;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Messages sent to the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join a room (one room per document)
    Join { room: String, client_id: ClientId },
    /// Leave current room
    Leave,
    /// CRDT update or snapshot (base64 encoded Loro bytes)
    Sync { data: String },
    /// Full presence entry of the sender
    Awareness {
        client_id: ClientId,
        #[serde(flatten)]
        state: WirePresence,
    },
}

/// Messages received from the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Confirm room join with current state
    Joined {
        room: String,
        peer_count: usize,
        /// Merged room snapshot (if the room has history)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        initial_sync: Option<String>,
    },
    /// Peer joined the room
    PeerJoined { client_id: ClientId },
    /// Peer left the room or lost its connection
    PeerLeft { client_id: ClientId },
    /// CRDT data from another peer
    Sync { from: ClientId, data: String },
    /// Presence update from another peer
    Awareness {
        from: ClientId,
        #[serde(flatten)]
        state: WirePresence,
    },
    /// Error message
    Error { message: String },
}

/// Errors decoding inbound traffic.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Base64 error: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events from the replication channel
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// Connected (or reconnected) to the server
    Connected,
    /// Lost the connection; the channel retries on its own
    Disconnected,
    /// Waiting before reconnect attempt `attempt`
    Reconnecting { attempt: u32 },
    /// Joined a room
    JoinedRoom {
        room: String,
        peer_count: usize,
        initial_sync: Option<Vec<u8>>,
    },
    /// A peer joined the room
    PeerJoined { client_id: ClientId },
    /// A peer left the room
    PeerLeft { client_id: ClientId },
    /// Received CRDT data from a peer
    SyncReceived { from: ClientId, data: Vec<u8> },
    /// Received a presence update from a peer (not yet validated)
    AwarenessReceived { from: ClientId, state: WirePresence },
    /// Error reported by the server or the transport
    Error { message: String },
}

impl SyncEvent {
    /// Parse a server text frame.
    pub fn from_json(json: &str) -> Result<Self, ProtocolError> {
        let msg: ServerMessage = serde_json::from_str(json)?;
        Self::try_from(msg)
    }
}

impl TryFrom<ServerMessage> for SyncEvent {
    type Error = ProtocolError;

    fn try_from(msg: ServerMessage) -> Result<Self, ProtocolError> {
        Ok(match msg {
            ServerMessage::Joined {
                room,
                peer_count,
                initial_sync,
            } => SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync: initial_sync.as_deref().map(base64_decode).transpose()?,
            },
            ServerMessage::PeerJoined { client_id } => SyncEvent::PeerJoined { client_id },
            ServerMessage::PeerLeft { client_id } => SyncEvent::PeerLeft { client_id },
            ServerMessage::Sync { from, data } => SyncEvent::SyncReceived {
                from,
                data: base64_decode(&data)?,
            },
            ServerMessage::Awareness { from, state } => SyncEvent::AwarenessReceived { from, state },
            ServerMessage::Error { message } => SyncEvent::Error { message },
        })
    }
}

pub fn base64_encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

pub fn base64_decode(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_serialize() {
        let msg = ClientMessage::Join {
            room: "test-room".to_string(),
            client_id: ClientId(7),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""type":"join""#));
        assert!(json.contains("test-room"));
        assert!(json.contains(r#""client_id":7"#));
    }

    #[test]
    fn test_awareness_is_flattened() {
        let msg = ClientMessage::Awareness {
            client_id: ClientId(3),
            state: WirePresence {
                color: Some("#ff0000".into()),
                cursor: None,
                is_selecting: Some(true),
            },
        };
        let value: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "awareness");
        assert_eq!(value["color"], "#ff0000");
        assert_eq!(value["is_selecting"], true);
        assert!(value["cursor"].is_null());
    }

    #[test]
    fn test_server_message_deserialize() {
        let json = r#"{"type":"joined","room":"test","peer_count":2}"#;
        match SyncEvent::from_json(json).unwrap() {
            SyncEvent::JoinedRoom {
                room,
                peer_count,
                initial_sync,
            } => {
                assert_eq!(room, "test");
                assert_eq!(peer_count, 2);
                assert!(initial_sync.is_none());
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_sync_payload_decoded() {
        let msg = ServerMessage::Sync {
            from: ClientId(9),
            data: base64_encode(b"loro"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(
            SyncEvent::from_json(&json).unwrap(),
            SyncEvent::SyncReceived {
                from: ClientId(9),
                data: b"loro".to_vec()
            }
        );
    }

    #[test]
    fn test_bad_base64_rejected() {
        let json = r#"{"type":"sync","from":1,"data":"!!!"}"#;
        assert!(matches!(SyncEvent::from_json(json), Err(ProtocolError::Base64(_))));
    }

    #[test]
    fn test_malformed_awareness_still_parses_envelope() {
        let json = r#"{"type":"awareness","from":4,"cursor":{"x":1.0,"y":2.0}}"#;
        match SyncEvent::from_json(json).unwrap() {
            SyncEvent::AwarenessReceived { from, state } => {
                assert_eq!(from, ClientId(4));
                assert!(state.color.is_none());
            }
            other => panic!("Wrong event: {:?}", other),
        }
    }

    #[test]
    fn test_server_error_converts() {
        let event = SyncEvent::try_from(ServerMessage::Error {
            message: "Invalid sync data".to_string(),
        })
        .unwrap();
        assert_eq!(
            event,
            SyncEvent::Error {
                message: "Invalid sync data".to_string()
            }
        );

        let bad = ServerMessage::Joined {
            room: "r".to_string(),
            peer_count: 1,
            initial_sync: Some("%".to_string()),
        };
        let result: Result<SyncEvent, ProtocolError> = bad.try_into();
        assert!(matches!(result, Err(ProtocolError::Base64(_))));
    }

    #[test]
    fn test_base64_padding() {
        assert_eq!(base64_encode(b"a"), "YQ==");
        assert_eq!(base64_encode(b"ab"), "YWI=");
        assert_eq!(base64_encode(b"abc"), "YWJj");
    }
}

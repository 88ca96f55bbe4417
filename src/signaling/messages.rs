use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{RoomId, SignalingError, UserId};

/// Messages sent from client to server.
///
/// Offer, answer and candidate payloads are opaque blobs; the relay never
/// inspects them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Join a room by identifier (the room is created implicitly)
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom { room_id: RoomId, user_id: UserId },

    /// Session-description offer for the other members of the room
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer {
        room_id: RoomId,
        user_id: UserId,
        payload: Value,
    },

    /// Session-description answer for the other members of the room
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer {
        room_id: RoomId,
        user_id: UserId,
        payload: Value,
    },

    /// ICE candidate for the other members of the room
    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate {
        room_id: RoomId,
        user_id: UserId,
        payload: Value,
    },
}

impl ClientMessage {
    /// Boundary check: every variant must carry a non-empty room and user id.
    pub fn validate(&self) -> Result<(), SignalingError> {
        let (room_id, user_id) = match self {
            ClientMessage::JoinRoom { room_id, user_id } => (room_id, user_id),
            ClientMessage::Offer {
                room_id, user_id, ..
            }
            | ClientMessage::Answer {
                room_id, user_id, ..
            }
            | ClientMessage::IceCandidate {
                room_id, user_id, ..
            } => (room_id, user_id),
        };

        if room_id.is_empty() {
            return Err(SignalingError::EmptyRoomId);
        }
        if user_id.is_empty() {
            return Err(SignalingError::EmptyUserId);
        }
        Ok(())
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Another participant joined the room
    #[serde(rename = "user-connected", rename_all = "camelCase")]
    UserConnected { user_id: UserId },

    /// Relayed offer from another member
    #[serde(rename = "offer", rename_all = "camelCase")]
    Offer { user_id: UserId, payload: Value },

    /// Relayed answer from another member
    #[serde(rename = "answer", rename_all = "camelCase")]
    Answer { user_id: UserId, payload: Value },

    /// Relayed ICE candidate from another member
    #[serde(rename = "ice-candidate", rename_all = "camelCase")]
    IceCandidate { user_id: UserId, payload: Value },

    /// Another participant left the room or lost its connection
    #[serde(rename = "user-disconnected", rename_all = "camelCase")]
    UserDisconnected { user_id: UserId },

    /// Error response for a frame the server could not parse
    #[serde(rename = "error")]
    Error { message: String },
}

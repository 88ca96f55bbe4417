use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// Signaling relay errors
#[derive(Debug, Error)]
pub enum SignalingError {
    #[error("empty room id")]
    EmptyRoomId,

    #[error("empty user id")]
    EmptyUserId,
}

const CONN_ID_LEN: usize = 13;
const HEX_CHARS: &[u8] = b"0123456789abcdef";

/// Room identifier: opaque string chosen by the client application.
///
/// Backed by `Arc<str>` so the membership tables and relayed frames share
/// one allocation per room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(Arc<str>);

impl RoomId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for RoomId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for RoomId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RoomId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(RoomId::from(s.as_str()))
    }
}

/// Participant identifier: opaque string chosen by the client application,
/// distinct from the transport-level connection id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UserId(Arc<str>);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl Serialize for UserId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(UserId::from(s.as_str()))
    }
}

/// Connection ID: 13-byte fixed array ("conn_" + 8 hex), server-assigned.
/// Never leaves the server process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId {
    bytes: [u8; CONN_ID_LEN],
}

impl ConnId {
    pub fn generate() -> Self {
        let mut bytes = [0u8; CONN_ID_LEN];
        bytes[..5].copy_from_slice(b"conn_");

        let mut rng = rand::rng();
        let value: u32 = rng.random();

        for i in 0..8 {
            let nibble = ((value >> (28 - i * 4)) & 0xF) as usize;
            bytes[5 + i] = HEX_CHARS[nibble];
        }
        Self { bytes }
    }

    pub fn as_str(&self) -> &str {
        std::str::from_utf8(&self.bytes).unwrap_or("")
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wrapper for outbound WebSocket messages using tungstenite's Utf8Bytes.
#[derive(Debug, Clone)]
pub struct OutboundMessage(Utf8Bytes);

impl OutboundMessage {
    /// Create a new outbound message from any string type
    pub fn new(s: impl Into<Utf8Bytes>) -> Self {
        Self(s.into())
    }

    /// Get the inner Utf8Bytes for tungstenite Message::Text
    pub fn into_inner(self) -> Utf8Bytes {
        self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<String> for OutboundMessage {
    fn from(s: String) -> Self {
        Self(Utf8Bytes::from(s))
    }
}

#[derive(Debug)]
pub(crate) struct PeerState {
    pub user_id: UserId,
    /// Channel for outbound messages to this peer.
    /// Uses OutboundMessage (Arc<str>) for O(1) broadcast cloning.
    pub tx: mpsc::UnboundedSender<OutboundMessage>,
}

/// A room is nothing but its current member set; an empty room is removed
/// from the registry rather than kept around.
#[derive(Debug, Default)]
pub(crate) struct Room {
    pub members: HashMap<ConnId, PeerState>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conn_id_generate_has_correct_format() {
        let conn_id = ConnId::generate();
        assert!(conn_id.as_str().starts_with("conn_"));
        assert_eq!(conn_id.as_str().len(), 13);
    }

    #[test]
    fn conn_id_generate_uses_hex_suffix() {
        let conn_id = ConnId::generate();
        for c in conn_id.as_str()[5..].chars() {
            assert!(c.is_ascii_hexdigit(), "Invalid char: {}", c);
        }
    }

    #[test]
    fn room_id_from_str() {
        let room = RoomId::from("practice-42");
        assert_eq!(room.as_str(), "practice-42");
        assert!(!room.is_empty());
    }

    #[test]
    fn room_id_display() {
        let room = RoomId::from("r1");
        assert_eq!(format!("{}", room), "r1");
    }

    #[test]
    fn user_id_empty() {
        let user = UserId::from("");
        assert!(user.is_empty());
    }

    #[test]
    fn room_id_serialization() {
        let room = RoomId::from("r1");
        let json = serde_json::to_string(&room).unwrap();
        assert_eq!(json, "\"r1\"");
    }

    #[test]
    fn room_id_deserialization() {
        let room: RoomId = serde_json::from_str("\"r1\"").unwrap();
        assert_eq!(room.as_str(), "r1");
    }

    #[test]
    fn user_id_round_trips_escaped_json() {
        let user: UserId = serde_json::from_str("\"u\\u00e9\"").unwrap();
        assert_eq!(user.as_str(), "u\u{e9}");
    }

    #[test]
    fn conn_id_is_copy() {
        let id = ConnId::generate();
        let copy = id;
        assert_eq!(id.as_str(), copy.as_str());
    }

    #[test]
    fn outbound_message_clones_share_text() {
        let msg = OutboundMessage::from(String::from("hello"));
        let copy = msg.clone();
        assert_eq!(msg.as_str(), copy.as_str());
    }
}

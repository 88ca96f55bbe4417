//! Parley: a room-based signaling relay for WebRTC practice pairings.
//!
//! The server keeps an in-memory table of rooms and their member
//! connections and forwards offer/answer/ICE-candidate messages verbatim
//! between members of the same room; payloads are never inspected. The
//! [`signaling::SignalingClient`] wrapper is the peer-side counterpart.

pub mod signaling;

pub use signaling::{
    ClientConfig, ClientMessage, RoomId, ServerMessage, SignalingClient, SignalingServer, UserId,
};

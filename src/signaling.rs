//! WebSocket signaling relay for WebRTC session setup between paired peers

mod client;
mod messages;
mod registry;
mod server;
mod types;

pub use client::{ClientConfig, SignalingClient};
pub use messages::{ClientMessage, ServerMessage};
pub use registry::RoomRegistryHandle;
pub use server::{DEFAULT_SIGNALING_PORT, SignalingServer};
pub use types::{ConnId, OutboundMessage, RoomId, SignalingError, UserId};

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::messages::ServerMessage;
use super::types::{ConnId, OutboundMessage, PeerState, Room, RoomId, UserId};

/// Commands sent to the room registry actor.
///
/// All commands are fire-and-forget: the relay protocol has no
/// acknowledgments, so no command carries a reply channel.
pub(crate) enum RegistryCommand {
    Join {
        conn_id: ConnId,
        room_id: RoomId,
        user_id: UserId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    },
    Relay {
        conn_id: ConnId,
        room_id: RoomId,
        message: ServerMessage,
    },
    Disconnect {
        conn_id: ConnId,
    },
}

fn encode(message: &ServerMessage) -> OutboundMessage {
    let json =
        serde_json::to_string(message).expect("ServerMessage serialization should never fail");
    OutboundMessage::from(json)
}

/// Remove `conn_id` from its current room, notifying the remaining members.
/// No-op if the connection never joined.
fn leave(
    rooms: &mut HashMap<RoomId, Room>,
    memberships: &mut HashMap<ConnId, RoomId>,
    conn_id: ConnId,
) {
    let Some(room_id) = memberships.remove(&conn_id) else {
        return;
    };
    let Some(room) = rooms.get_mut(&room_id) else {
        return;
    };

    if let Some(peer) = room.members.remove(&conn_id) {
        let notice = encode(&ServerMessage::UserDisconnected {
            user_id: peer.user_id.clone(),
        });
        for member in room.members.values() {
            let _ = member.tx.send(notice.clone());
        }
        info!("User {} ({}) left room {}", peer.user_id, conn_id, room_id);
    }

    if room.members.is_empty() {
        rooms.remove(&room_id);
        info!("Room {} removed (empty)", room_id);
    }
}

pub(crate) async fn room_registry(mut rx: mpsc::Receiver<RegistryCommand>) {
    let mut rooms: HashMap<RoomId, Room> = HashMap::new();
    let mut memberships: HashMap<ConnId, RoomId> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Join {
                conn_id,
                room_id,
                user_id,
                peer_tx,
            } => {
                // Joining a different room is an implicit leave of the
                // previous one.
                if memberships.get(&conn_id).is_some_and(|r| *r != room_id) {
                    leave(&mut rooms, &mut memberships, conn_id);
                }

                let room = rooms.entry(room_id.clone()).or_default();
                if room.members.contains_key(&conn_id) {
                    // Idempotent membership: refresh state, announce nothing.
                    room.members.insert(
                        conn_id,
                        PeerState {
                            user_id,
                            tx: peer_tx,
                        },
                    );
                    continue;
                }

                let announce = encode(&ServerMessage::UserConnected {
                    user_id: user_id.clone(),
                });
                for member in room.members.values() {
                    let _ = member.tx.send(announce.clone());
                }

                room.members.insert(
                    conn_id,
                    PeerState {
                        user_id: user_id.clone(),
                        tx: peer_tx,
                    },
                );
                memberships.insert(conn_id, room_id.clone());

                info!("User {} ({}) joined room {}", user_id, conn_id, room_id);
            }

            RegistryCommand::Relay {
                conn_id,
                room_id,
                message,
            } => {
                // Unknown room or no other members: best-effort delivery
                // means a silent no-op.
                let Some(room) = rooms.get(&room_id) else {
                    debug!("Dropping relay to unknown room {}", room_id);
                    continue;
                };

                let frame = encode(&message);
                for (member_id, member) in &room.members {
                    if *member_id != conn_id {
                        let _ = member.tx.send(frame.clone());
                    }
                }
            }

            RegistryCommand::Disconnect { conn_id } => {
                leave(&mut rooms, &mut memberships, conn_id);
            }
        }
    }
}

/// Handle to communicate with the room registry actor
#[derive(Clone)]
pub struct RoomRegistryHandle {
    tx: mpsc::Sender<RegistryCommand>,
}

impl RoomRegistryHandle {
    /// Spawn a registry actor and return a handle to it. Each handle tree
    /// owns an independent registry, so tests can run several in-process.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel::<RegistryCommand>(1024);
        tokio::spawn(room_registry(rx));
        Self { tx }
    }

    /// Register the connection as a member of the room and announce it to
    /// the other members. The joiner learns nothing about existing members.
    pub async fn join(
        &self,
        conn_id: ConnId,
        room_id: RoomId,
        user_id: UserId,
        peer_tx: mpsc::UnboundedSender<OutboundMessage>,
    ) {
        let _ = self
            .tx
            .send(RegistryCommand::Join {
                conn_id,
                room_id,
                user_id,
                peer_tx,
            })
            .await;
    }

    /// Forward a message verbatim to every other member of the room.
    /// The sender never receives its own message back.
    pub async fn relay(&self, conn_id: ConnId, room_id: RoomId, message: ServerMessage) {
        let _ = self
            .tx
            .send(RegistryCommand::Relay {
                conn_id,
                room_id,
                message,
            })
            .await;
    }

    /// Drop the connection's room membership and notify the remaining
    /// members.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let _ = self.tx.send(RegistryCommand::Disconnect { conn_id }).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    struct TestPeer {
        conn_id: ConnId,
        tx: mpsc::UnboundedSender<OutboundMessage>,
        rx: mpsc::UnboundedReceiver<OutboundMessage>,
    }

    impl TestPeer {
        fn new() -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            Self {
                conn_id: ConnId::generate(),
                tx,
                rx,
            }
        }

        async fn join(&self, registry: &RoomRegistryHandle, room: &str, user: &str) {
            registry
                .join(
                    self.conn_id,
                    RoomId::from(room),
                    UserId::from(user),
                    self.tx.clone(),
                )
                .await;
        }

        async fn next(&mut self) -> ServerMessage {
            let frame = timeout(Duration::from_secs(1), self.rx.recv())
                .await
                .expect("timed out waiting for message")
                .expect("peer channel closed");
            serde_json::from_str(frame.as_str()).expect("server frame should parse")
        }

        fn assert_silent(&mut self) {
            assert!(self.rx.try_recv().is_err(), "expected no pending message");
        }
    }

    #[tokio::test]
    async fn second_join_notifies_only_existing_members() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let mut b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        b.join(&registry, "r1", "u2").await;

        match a.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u2"),
            other => panic!("unexpected message: {:?}", other),
        }
        a.assert_silent();
        b.assert_silent();
    }

    #[tokio::test]
    async fn relay_reaches_other_members_but_never_the_sender() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let mut b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        b.join(&registry, "r1", "u2").await;
        a.next().await; // user-connected(u2)

        registry
            .relay(
                a.conn_id,
                RoomId::from("r1"),
                ServerMessage::Offer {
                    user_id: UserId::from("u1"),
                    payload: json!({"sdp": "abc"}),
                },
            )
            .await;

        match b.next().await {
            ServerMessage::Offer { user_id, payload } => {
                assert_eq!(user_id.as_str(), "u1");
                assert_eq!(payload["sdp"], "abc");
            }
            other => panic!("unexpected message: {:?}", other),
        }
        a.assert_silent();
        b.assert_silent();
    }

    #[tokio::test]
    async fn relay_without_other_members_is_a_silent_no_op() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        registry
            .relay(
                a.conn_id,
                RoomId::from("r1"),
                ServerMessage::Offer {
                    user_id: UserId::from("u1"),
                    payload: json!({"sdp": "abc"}),
                },
            )
            .await;

        // The relay to an unknown room is equally silent.
        registry
            .relay(
                a.conn_id,
                RoomId::from("no-such-room"),
                ServerMessage::Answer {
                    user_id: UserId::from("u1"),
                    payload: json!({"sdp": "xyz"}),
                },
            )
            .await;

        // B's join is processed after both relays, so the first message A
        // observes proves neither relay was echoed back.
        b.join(&registry, "r1", "u2").await;
        match a.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u2"),
            other => panic!("unexpected message: {:?}", other),
        }
        a.assert_silent();
    }

    #[tokio::test]
    async fn disconnect_notifies_remaining_members_and_removes_membership() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let mut b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        b.join(&registry, "r1", "u2").await;
        a.next().await; // user-connected(u2)

        registry.disconnect(a.conn_id).await;
        match b.next().await {
            ServerMessage::UserDisconnected { user_id } => assert_eq!(user_id.as_str(), "u1"),
            other => panic!("unexpected message: {:?}", other),
        }

        // A is gone from the member set: B's relays no longer reach it.
        registry
            .relay(
                b.conn_id,
                RoomId::from("r1"),
                ServerMessage::IceCandidate {
                    user_id: UserId::from("u2"),
                    payload: json!({"candidate": "candidate:0"}),
                },
            )
            .await;

        // C's join lands after the relay, so once B observes it the relay
        // has been fully processed.
        let c = TestPeer::new();
        c.join(&registry, "r1", "u3").await;
        match b.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u3"),
            other => panic!("unexpected message: {:?}", other),
        }
        a.assert_silent();
        b.assert_silent();
    }

    #[tokio::test]
    async fn disconnect_before_any_join_is_a_no_op() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let lurker = TestPeer::new();

        registry.disconnect(lurker.conn_id).await;

        // Registry stays healthy afterwards.
        a.join(&registry, "r1", "u1").await;
        let b = TestPeer::new();
        b.join(&registry, "r1", "u2").await;
        match a.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u2"),
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn duplicate_join_keeps_a_single_membership() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let mut b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        a.join(&registry, "r1", "u1").await;
        b.join(&registry, "r1", "u2").await;

        match a.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u2"),
            other => panic!("unexpected message: {:?}", other),
        }

        registry
            .relay(
                b.conn_id,
                RoomId::from("r1"),
                ServerMessage::Offer {
                    user_id: UserId::from("u2"),
                    payload: json!({"sdp": "abc"}),
                },
            )
            .await;

        // Exactly one copy despite the double join.
        assert!(matches!(a.next().await, ServerMessage::Offer { .. }));
        a.assert_silent();
        b.assert_silent();
    }

    #[tokio::test]
    async fn joining_another_room_leaves_the_first() {
        let registry = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let mut b = TestPeer::new();

        a.join(&registry, "r1", "u1").await;
        b.join(&registry, "r1", "u2").await;
        a.next().await; // user-connected(u2)

        a.join(&registry, "r2", "u1").await;
        match b.next().await {
            ServerMessage::UserDisconnected { user_id } => assert_eq!(user_id.as_str(), "u1"),
            other => panic!("unexpected message: {:?}", other),
        }

        registry
            .relay(
                b.conn_id,
                RoomId::from("r1"),
                ServerMessage::Offer {
                    user_id: UserId::from("u2"),
                    payload: json!({"sdp": "abc"}),
                },
            )
            .await;

        // A's first message after moving to r2 must be C's join there, not
        // a stray relay from r1.
        let c = TestPeer::new();
        c.join(&registry, "r2", "u3").await;
        match a.next().await {
            ServerMessage::UserConnected { user_id } => assert_eq!(user_id.as_str(), "u3"),
            other => panic!("unexpected message: {:?}", other),
        }
        a.assert_silent();
    }

    #[tokio::test]
    async fn registries_are_independent() {
        let left = RoomRegistryHandle::spawn();
        let right = RoomRegistryHandle::spawn();
        let mut a = TestPeer::new();
        let b = TestPeer::new();

        a.join(&left, "r1", "u1").await;
        b.join(&right, "r1", "u2").await;

        // Same room id, different registry: A hears nothing about B.
        right
            .relay(
                b.conn_id,
                RoomId::from("r1"),
                ServerMessage::Offer {
                    user_id: UserId::from("u2"),
                    payload: json!({"sdp": "abc"}),
                },
            )
            .await;
        right.disconnect(b.conn_id).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        a.assert_silent();
    }
}

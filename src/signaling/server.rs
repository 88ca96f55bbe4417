use std::net::SocketAddr;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tracing::{debug, error, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::registry::RoomRegistryHandle;
use super::types::{ConnId, OutboundMessage};

pub const DEFAULT_SIGNALING_PORT: u16 = 3000;
const PING_INTERVAL: Duration = Duration::from_secs(30);
const PONG_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket front end of the relay. Owns a listener and a registry; each
/// accepted connection gets its own task feeding the shared registry.
pub struct SignalingServer {
    listener: TcpListener,
    handle: RoomRegistryHandle,
}

impl SignalingServer {
    /// Bind the listener and spawn the room registry. `addr` may use port 0
    /// to let the OS pick one; see [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        info!("Signaling server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            handle: RoomRegistryHandle::spawn(),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> std::io::Result<()> {
        loop {
            let (stream, addr) = self.listener.accept().await?;
            let handle = self.handle.clone();

            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, handle).await {
                    error!("Connection error from {}: {}", addr, e);
                }
            });
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    handle: RoomRegistryHandle,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_tx, mut ws_rx) = ws_stream.split();

    let conn_id = ConnId::generate();
    info!("WebSocket connection {} from {}", conn_id, addr);

    let (tx, mut rx) = mpsc::unbounded_channel::<OutboundMessage>();
    let (ctrl_tx, mut ctrl_rx) = mpsc::unbounded_channel::<Message>();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    let mut waiting_for_pong = false;
    let mut pong_deadline: Option<tokio::time::Instant> = None;

    let send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(msg) = rx.recv() => {
                    let ws_msg = Message::Text(msg.into_inner());
                    if ws_tx.send(ws_msg).await.is_err() {
                        break;
                    }
                }
                Some(ctrl_msg) = ctrl_rx.recv() => {
                    if ws_tx.send(ctrl_msg).await.is_err() {
                        break;
                    }
                }
                else => break,
            }
        }
    });

    loop {
        let pong_timeout = async {
            match pong_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = ping_interval.tick() => {
                if waiting_for_pong {
                    warn!("No Pong received, disconnecting {}", addr);
                    break;
                }
                if ctrl_tx.send(Message::Ping(Bytes::new())).is_err() {
                    break;
                }
                waiting_for_pong = true;
                pong_deadline = Some(tokio::time::Instant::now() + PONG_TIMEOUT);
                debug!("Ping sent to {}", addr);
            }

            _ = pong_timeout => {
                warn!("Pong timeout, disconnecting {}", addr);
                break;
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(e)) => {
                        warn!("WebSocket error: {}", e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        handle_frame(&text, conn_id, &tx, &handle).await;
                    }
                    Message::Pong(_) => {
                        waiting_for_pong = false;
                        pong_deadline = None;
                        debug!("Pong received from {}", addr);
                    }
                    Message::Close(_) => {
                        info!("Close received from {}", addr);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }

    // Abrupt transport loss and graceful close land here alike; the
    // registry no-ops if the connection never joined.
    handle.disconnect(conn_id).await;

    send_task.abort();
    info!("WebSocket disconnected: {} ({})", addr, conn_id);

    Ok(())
}

async fn handle_frame(
    text: &str,
    conn_id: ConnId,
    tx: &mpsc::UnboundedSender<OutboundMessage>,
    handle: &RoomRegistryHandle,
) {
    let client_msg: ClientMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            warn!("Unparseable frame from {}: {}", conn_id, e);
            let err = ServerMessage::Error {
                message: format!("Invalid message: {}", e),
            };
            if let Ok(json) = serde_json::to_string(&err) {
                let _ = tx.send(OutboundMessage::from(json));
            }
            return;
        }
    };

    if let Err(e) = client_msg.validate() {
        warn!("Dropping frame from {}: {}", conn_id, e);
        return;
    }

    match client_msg {
        ClientMessage::JoinRoom { room_id, user_id } => {
            handle.join(conn_id, room_id, user_id, tx.clone()).await;
        }
        ClientMessage::Offer {
            room_id,
            user_id,
            payload,
        } => {
            handle
                .relay(conn_id, room_id, ServerMessage::Offer { user_id, payload })
                .await;
        }
        ClientMessage::Answer {
            room_id,
            user_id,
            payload,
        } => {
            handle
                .relay(conn_id, room_id, ServerMessage::Answer { user_id, payload })
                .await;
        }
        ClientMessage::IceCandidate {
            room_id,
            user_id,
            payload,
        } => {
            handle
                .relay(
                    conn_id,
                    room_id,
                    ServerMessage::IceCandidate { user_id, payload },
                )
                .await;
        }
    }
}

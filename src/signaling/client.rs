use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Message, Utf8Bytes};
use tracing::{debug, info, warn};

use super::messages::{ClientMessage, ServerMessage};
use super::types::{RoomId, UserId};

const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(500);
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Client wrapper configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Ceiling for the delay between automatic reconnection attempts.
    pub reconnect_delay_max: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_max: Duration::from_secs(10),
        }
    }
}

struct Transport {
    out_tx: mpsc::UnboundedSender<ClientMessage>,
    connected: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

/// Peer-side wrapper around the relay: holds at most one transport handle,
/// joins rooms and sends the typed signaling messages. Send operations are
/// silent no-ops while not connected; the relay protocol has no
/// acknowledgments to wait for.
pub struct SignalingClient {
    config: ClientConfig,
    events: broadcast::Sender<ServerMessage>,
    transport: Mutex<Option<Transport>>,
}

impl Default for SignalingClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

impl SignalingClient {
    pub fn new(config: ClientConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            config,
            events,
            transport: Mutex::new(None),
        }
    }

    /// Open the transport to the relay at `url` (e.g. `ws://host:3000`).
    ///
    /// Idempotent: while a transport handle exists, further calls do
    /// nothing. The spawned driver redials with bounded exponential backoff
    /// after an unexpected loss; [`disconnect`](Self::disconnect) is the
    /// only way to stop it.
    pub fn connect(&self, url: &str) {
        let mut transport = self.transport.lock().unwrap();
        if transport.is_some() {
            debug!("connect: already connected, keeping existing transport");
            return;
        }

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let connected = Arc::new(AtomicBool::new(false));
        let driver = tokio::spawn(drive(
            url.to_string(),
            self.config.reconnect_delay_max,
            out_rx,
            self.events.clone(),
            connected.clone(),
        ));

        *transport = Some(Transport {
            out_tx,
            connected,
            driver,
        });
    }

    /// Subscribe to decoded server events. Subscriptions survive reconnects
    /// of the underlying transport.
    pub fn events(&self) -> broadcast::Receiver<ServerMessage> {
        self.events.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.transport
            .lock()
            .unwrap()
            .as_ref()
            .is_some_and(|t| t.connected.load(Ordering::Relaxed))
    }

    pub fn join_room(&self, room_id: RoomId, user_id: UserId) {
        self.send(ClientMessage::JoinRoom { room_id, user_id });
    }

    pub fn send_offer(&self, room_id: RoomId, user_id: UserId, payload: Value) {
        self.send(ClientMessage::Offer {
            room_id,
            user_id,
            payload,
        });
    }

    pub fn send_answer(&self, room_id: RoomId, user_id: UserId, payload: Value) {
        self.send(ClientMessage::Answer {
            room_id,
            user_id,
            payload,
        });
    }

    pub fn send_ice_candidate(&self, room_id: RoomId, user_id: UserId, payload: Value) {
        self.send(ClientMessage::IceCandidate {
            room_id,
            user_id,
            payload,
        });
    }

    /// Close the transport and clear the handle; a later
    /// [`connect`](Self::connect) starts a fresh session.
    pub fn disconnect(&self) {
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.driver.abort();
            info!("Signaling transport closed");
        }
    }

    fn send(&self, msg: ClientMessage) {
        let transport = self.transport.lock().unwrap();
        match transport.as_ref() {
            Some(t) if t.connected.load(Ordering::Relaxed) => {
                let _ = t.out_tx.send(msg);
            }
            _ => debug!("Dropping outbound signaling message: not connected"),
        }
    }
}

impl Drop for SignalingClient {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.lock().unwrap().take() {
            transport.driver.abort();
        }
    }
}

/// Driver task: dial, pump, redial. Exits only via abort.
async fn drive(
    url: String,
    delay_max: Duration,
    mut out_rx: mpsc::UnboundedReceiver<ClientMessage>,
    events: broadcast::Sender<ServerMessage>,
    connected: Arc<AtomicBool>,
) {
    let mut backoff = INITIAL_RECONNECT_DELAY;

    loop {
        match connect_async(&url).await {
            Ok((ws_stream, _)) => {
                info!("Connected to signaling server at {}", url);
                connected.store(true, Ordering::Relaxed);
                backoff = INITIAL_RECONNECT_DELAY;

                let (mut ws_tx, mut ws_rx) = ws_stream.split();
                loop {
                    tokio::select! {
                        out = out_rx.recv() => {
                            let Some(msg) = out else {
                                let _ = ws_tx.send(Message::Close(None)).await;
                                connected.store(false, Ordering::Relaxed);
                                return;
                            };
                            let json = match serde_json::to_string(&msg) {
                                Ok(json) => json,
                                Err(e) => {
                                    warn!("Failed to encode signaling message: {}", e);
                                    continue;
                                }
                            };
                            if ws_tx.send(Message::Text(Utf8Bytes::from(json))).await.is_err() {
                                break;
                            }
                        }

                        frame = ws_rx.next() => {
                            match frame {
                                Some(Ok(Message::Text(text))) => {
                                    match serde_json::from_str::<ServerMessage>(&text) {
                                        // Lagging subscribers or none at all
                                        // are not the transport's problem.
                                        Ok(event) => { let _ = events.send(event); }
                                        Err(e) => warn!("Unparseable server frame: {}", e),
                                    }
                                }
                                Some(Ok(Message::Ping(data))) => {
                                    if ws_tx.send(Message::Pong(data)).await.is_err() {
                                        break;
                                    }
                                }
                                Some(Ok(Message::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!("WebSocket error: {}", e);
                                    break;
                                }
                            }
                        }
                    }
                }

                connected.store(false, Ordering::Relaxed);
                warn!("Signaling transport lost, reconnecting");
            }
            Err(e) => {
                warn!("Failed to connect to {}: {}", url, e);
            }
        }

        let jitter = {
            let mut rng = rand::rng();
            Duration::from_millis(rng.random_range(0..=backoff.as_millis() as u64 / 4))
        };
        tokio::time::sleep(backoff + jitter).await;
        backoff = (backoff * 2).min(delay_max);
    }
}

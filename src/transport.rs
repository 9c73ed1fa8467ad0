//! The transport session (C5): a reconnecting, backoff-bounded channel
//! to the relay that reconciles the outbound queue and delivers inbound
//! operations upward.
//!
//! The socket itself is abstracted behind [`Transport`]/[`Connector`] so
//! the state machine and reconciliation logic can be exercised against
//! an in-memory fake, per §9's note that transport/persistence
//! singletons "become injected collaborators with narrow capability
//! interfaces... enabling in-memory fakes in tests."

use crate::error::{HandshakeSnafu, TransportError, WriteSnafu};
use crate::operation::Operation;
use crate::queue::{OutboundQueue, QueueId};
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use snafu::ResultExt;
use std::time::Duration;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

const MIN_INTER_SEND_DELAY: Duration = Duration::from_millis(10);
const MAX_ATTEMPTS: u32 = 10;

/// The session's connection state (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

/// What a small status badge in the editor would show (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: SessionState,
    pub pending_operations: usize,
}

/// Exponential backoff with mandatory jitter (spec §4.5):
/// `delay(n) = min(base * 2^n, cap) + U(0, jitter_max)`.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base: Duration,
    pub cap: Duration,
    pub jitter_max: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
            jitter_max: Duration::from_millis(1000),
        }
    }
}

impl ReconnectPolicy {
    /// The deterministic part of the schedule, with no jitter applied.
    /// Exposed separately so P8 (non-decreasing up to cap) is testable
    /// without a source of randomness.
    pub fn base_delay(&self, consecutive_failures: u32) -> Duration {
        let scaled = self.base.saturating_mul(1u32.checked_shl(consecutive_failures).unwrap_or(u32::MAX));
        scaled.min(self.cap)
    }

    pub fn delay_with_jitter(&self, consecutive_failures: u32) -> Duration {
        let base = self.base_delay(consecutive_failures);
        let jitter_millis = if self.jitter_max.is_zero() {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.jitter_max.as_millis() as u64)
        };
        base + Duration::from_millis(jitter_millis)
    }
}

/// The minimal capability a connected channel must provide.
pub trait Transport: Send {
    /// Sends one framed text message.
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Waits for the next framed text message, or `None` on close.
    async fn recv(&mut self) -> Option<String>;
}

/// Produces a fresh [`Transport`] on each connection attempt.
pub trait Connector: Send {
    type Conn: Transport;

    async fn connect(&self) -> Result<Self::Conn, TransportError>;
}

/// Production connector: a plain WebSocket to the relay.
pub struct WsConnector {
    pub url: String,
}

pub struct WsTransport {
    inner: WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
}

impl Connector for WsConnector {
    type Conn = WsTransport;

    async fn connect(&self) -> Result<WsTransport, TransportError> {
        let (stream, _response) = connect_async(&self.url).await.context(HandshakeSnafu)?;
        Ok(WsTransport { inner: stream })
    }
}

impl Transport for WsTransport {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.inner
            .send(WsMessage::Text(frame))
            .await
            .context(WriteSnafu)
    }

    async fn recv(&mut self) -> Option<String> {
        loop {
            match self.inner.next().await {
                Some(Ok(WsMessage::Text(text))) => return Some(text),
                Some(Ok(WsMessage::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("transport read error: {e}");
                    return None;
                }
            }
        }
    }
}

/// Client-to-relay and relay-to-client framed messages (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMessage {
    #[serde(rename = "operation")]
    Operation {
        operation: Operation,
        #[serde(rename = "isSync", skip_serializing_if = "Option::is_none")]
        is_sync: Option<bool>,
    },
    #[serde(rename = "users_update")]
    UsersUpdate { count: u64 },
    #[serde(rename = "operation_ack")]
    OperationAck {
        #[serde(rename = "operationId")]
        operation_id: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

/// Canonical string form of a `PosId` used to correlate sync acks to
/// queue entries (spec §4.6: the relay echoes back the operation's own
/// `id`, not the queue id).
fn operation_correlation_id(op: &Operation) -> String {
    serde_json::to_string(op.id()).unwrap_or_default()
}

/// The reconnecting session itself.
pub struct Session<C: Connector> {
    connector: C,
    conn: Option<C::Conn>,
    state: SessionState,
    attempts: u32,
    closing: bool,
    policy: ReconnectPolicy,
    queue: OutboundQueue,
    pending_sync_acks: std::collections::HashMap<String, QueueId>,
    inbound: flume::Sender<Operation>,
}

impl<C: Connector> Session<C> {
    pub fn new(connector: C, queue: OutboundQueue, inbound: flume::Sender<Operation>) -> Self {
        Self {
            connector,
            conn: None,
            state: SessionState::Disconnected,
            attempts: 0,
            closing: false,
            policy: ReconnectPolicy::default(),
            queue,
            pending_sync_acks: std::collections::HashMap::new(),
            inbound,
        }
    }

    pub fn with_policy(mut self, policy: ReconnectPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus {
            state: self.state,
            pending_operations: self.queue.size(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session forever: connect, reconcile, receive, and
    /// reconnect with backoff on drop, until `close()` is observed.
    pub async fn run(&mut self) {
        loop {
            if self.closing {
                self.state = SessionState::Disconnected;
                return;
            }

            self.state = SessionState::Connecting;
            match self.connector.connect().await {
                Ok(conn) => {
                    self.conn = Some(conn);
                    self.state = SessionState::Connected;
                    self.attempts = 0;
                    info!("session connected");
                    self.reconciliation_pass().await;
                    self.receive_until_closed().await;
                }
                Err(e) => {
                    error!("handshake failed: {e}");
                }
            }

            if self.closing {
                self.state = SessionState::Disconnected;
                return;
            }

            self.attempts += 1;
            if self.attempts >= MAX_ATTEMPTS {
                warn!("giving up after {} consecutive failed attempts", self.attempts);
                self.state = SessionState::Disconnected;
                return;
            }

            self.state = SessionState::Reconnecting;
            let delay = self.policy.delay_with_jitter(self.attempts - 1);
            debug!("reconnecting in {:?}", delay);
            sleep(delay).await;
        }
    }

    async fn receive_until_closed(&mut self) {
        loop {
            if self.closing {
                return;
            }
            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            match conn.recv().await {
                Some(frame) => self.handle_frame(&frame),
                None => {
                    self.conn = None;
                    return;
                }
            }
        }
    }

    fn handle_frame(&mut self, frame: &str) {
        let message: WireMessage = match serde_json::from_str(frame) {
            Ok(m) => m,
            Err(e) => {
                warn!("malformed message from relay, dropping: {e}");
                return;
            }
        };

        match message {
            WireMessage::Operation { operation, .. } => {
                let _ = self.inbound.send(operation);
            }
            WireMessage::OperationAck {
                operation_id,
                success,
                error,
            } => {
                if success {
                    if let Some(queue_id) = self.pending_sync_acks.remove(&operation_id) {
                        self.queue.ack(&[queue_id]);
                    }
                } else {
                    warn!("relay rejected synced operation: {:?}", error);
                }
            }
            WireMessage::UsersUpdate { count } => {
                debug!("relay reports {count} connected participants");
            }
        }
    }

    /// Resends every queued entry on entering `Connected`, yielding
    /// between sends to avoid saturating the relay (spec §4.5).
    async fn reconciliation_pass(&mut self) {
        let entries = self.queue.peek_all();
        for entry in entries {
            if self.state != SessionState::Connected {
                return;
            }

            let correlation_id = operation_correlation_id(&entry.op);
            let frame = serde_json::to_string(&WireMessage::Operation {
                operation: entry.op.clone(),
                is_sync: Some(true),
            })
            .expect("wire messages always encode");

            let Some(conn) = self.conn.as_mut() else {
                return;
            };
            match conn.send(frame).await {
                Ok(()) => {
                    self.pending_sync_acks.insert(correlation_id, entry.queue_id);
                }
                Err(e) => {
                    error!("reconciliation send failed: {e}");
                    return;
                }
            }

            sleep(MIN_INTER_SEND_DELAY).await;
        }
    }

    /// The application's send path (spec §4.5, §2 data flow). Every
    /// locally produced operation is durably enqueued first, matching
    /// C4's "enqueues" step in the data flow; a freshly produced
    /// (non-sync) send is then best-effort: acknowledged immediately on
    /// a successful write rather than waiting for a relay ack, per §9's
    /// resolution of the non-sync acknowledgement open question. A
    /// write error or a non-Connected session simply leaves the entry
    /// queued for the next reconciliation pass.
    pub async fn send(&mut self, op: Operation) {
        let queue_id = self.queue.enqueue(op.clone());

        if self.state != SessionState::Connected {
            return;
        }

        let frame = serde_json::to_string(&WireMessage::Operation {
            operation: op,
            is_sync: None,
        })
        .expect("wire messages always encode");

        let Some(conn) = self.conn.as_mut() else {
            return;
        };

        match conn.send(frame).await {
            Ok(()) => self.queue.ack(&[queue_id]),
            Err(e) => error!("send failed, left queued for reconciliation: {e}"),
        }
    }

    /// Terminal close: no further automatic transitions, in-flight
    /// messages are dropped, the queue is left intact.
    pub fn close(&mut self) {
        self.closing = true;
        self.conn = None;
        self.state = SessionState::Disconnected;
    }

    /// Resets the attempt counter and signals the next loop iteration to
    /// try immediately, per §7's manual reconnect action.
    pub fn reconnect_now(&mut self) {
        self.closing = false;
        self.attempts = 0;
    }
}

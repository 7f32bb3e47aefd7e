//! Persistent push connection with bounded reconnection.
//!
//! One [`PushConnection`] owns one socket. Every successfully decoded
//! inbound frame is handed to the router; malformed frames are dropped
//! without disturbing the read loop. An unexpected close schedules linear
//! backoff reconnects (`interval × attempt`) up to a bounded attempt count,
//! after which the connection stays down until `connect()` is called again.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use pipewatch_core::envelope::{ControlFrame, PushEnvelope};
use pipewatch_core::router::EventRouter;

/// Write half of the socket, shared with the control-frame senders.
type WsSink =
    Arc<tokio::sync::Mutex<SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>>>;

/// Connection lifecycle, observable through [`PushConnection::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

/// Tuning for the connect/reconnect lifecycle.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    /// Consecutive reconnects attempted after an unexpected close.
    pub max_reconnect_attempts: u32,
    /// Base backoff; attempt `n` waits `n ×` this interval.
    pub reconnect_interval: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_reconnect_attempts: 5,
            reconnect_interval: Duration::from_millis(5000),
        }
    }
}

/// Failure to open the socket. Only ever returned from the initiating
/// `connect()` call; it does not trigger the reconnect policy.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("failed to open push connection: {0}")]
    Open(#[from] tokio_tungstenite::tungstenite::Error),
}

#[derive(Default)]
struct LiveParts {
    sink: Option<WsSink>,
    reader: Option<JoinHandle<()>>,
    reconnect: Option<JoinHandle<()>>,
}

struct ConnectionShared {
    config: ConnectionConfig,
    router: EventRouter,
    manual_close: AtomicBool,
    attempts: AtomicU32,
    state_tx: watch::Sender<ConnectionState>,
    live: Mutex<LiveParts>,
}

/// One logical connection to the push endpoint.
///
/// Cheap to clone; clones share the same underlying socket and lifecycle.
/// Constructor-injected wherever a consumer needs push events, so each
/// consumer (or test) can own an isolated instance.
#[derive(Clone)]
pub struct PushConnection {
    shared: Arc<ConnectionShared>,
}

impl PushConnection {
    pub fn new(config: ConnectionConfig, router: EventRouter) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            shared: Arc::new(ConnectionShared {
                config,
                router,
                manual_close: AtomicBool::new(false),
                attempts: AtomicU32::new(0),
                state_tx,
                live: Mutex::new(LiveParts::default()),
            }),
        }
    }

    /// The router inbound frames are dispatched on.
    pub fn router(&self) -> &EventRouter {
        &self.shared.router
    }

    /// Open the connection. Completes once the transport handshake
    /// succeeds; an error before the socket ever opens is returned to the
    /// caller and does not schedule a reconnect.
    pub async fn connect(&self) -> Result<(), ConnectError> {
        self.shared.manual_close.store(false, Ordering::SeqCst);
        self.shared.state_tx.send_replace(ConnectionState::Connecting);
        match tokio_tungstenite::connect_async(self.shared.config.url.as_str()).await {
            Ok((stream, _)) => {
                Self::install(&self.shared, stream);
                Ok(())
            }
            Err(err) => {
                self.shared
                    .state_tx
                    .send_replace(ConnectionState::Disconnected);
                Err(ConnectError::Open(err))
            }
        }
    }

    /// Close the connection and suppress any pending reconnect. Idempotent,
    /// and safe when nothing was ever opened.
    pub fn disconnect(&self) {
        self.shared.manual_close.store(true, Ordering::SeqCst);
        let (sink, reader, reconnect) = {
            let mut live = self.shared.live.lock().unwrap();
            (live.sink.take(), live.reader.take(), live.reconnect.take())
        };
        if let Some(task) = reconnect {
            task.abort();
        }
        if let Some(task) = reader {
            task.abort();
        }
        if let Some(sink) = sink {
            // Best-effort close frame; skipped when no runtime is around.
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    let _ = sink.lock().await.send(Message::Close(None)).await;
                });
            }
        }
        self.shared
            .state_tx
            .send_replace(ConnectionState::Disconnected);
    }

    /// Best-effort control-frame send; dropped with a warning when the
    /// socket is not open.
    pub async fn send(&self, frame: ControlFrame) {
        let sink = self.shared.live.lock().unwrap().sink.clone();
        let Some(sink) = sink else {
            log::warn!("push connection not open, dropping control frame");
            return;
        };
        match serde_json::to_string(&frame) {
            Ok(text) => {
                if let Err(err) = sink.lock().await.send(Message::Text(text)).await {
                    log::warn!("failed to send control frame: {err}");
                }
            }
            Err(err) => log::warn!("failed to encode control frame: {err}"),
        }
    }

    pub async fn watch_video(&self, video_id: &str) {
        self.send(ControlFrame::watch_video(video_id)).await;
    }

    pub async fn unwatch_video(&self, video_id: &str) {
        self.send(ControlFrame::unwatch_video(video_id)).await;
    }

    pub async fn watch_channel(&self, channel_id: &str) {
        self.send(ControlFrame::watch_channel(channel_id)).await;
    }

    pub async fn unwatch_channel(&self, channel_id: &str) {
        self.send(ControlFrame::unwatch_channel(channel_id)).await;
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.shared.state_tx.borrow(), ConnectionState::Connected)
    }

    /// Observe lifecycle transitions.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Reconnect attempts consumed since the last successful open.
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Wire a freshly opened stream: reset the attempt counter, store the
    /// write half, and spawn the read loop. The sink is stored and the state
    /// published before the reader starts, so an instantly closing stream
    /// still observes a consistent Connected → Disconnected sequence.
    fn install(shared: &Arc<ConnectionShared>, stream: WebSocketStream<MaybeTlsStream<TcpStream>>) {
        let (sink, mut source) = stream.split();
        let sink: WsSink = Arc::new(tokio::sync::Mutex::new(sink));
        shared.attempts.store(0, Ordering::SeqCst);
        shared.live.lock().unwrap().sink = Some(sink);
        shared.state_tx.send_replace(ConnectionState::Connected);

        let reader = tokio::spawn({
            let shared = Arc::clone(shared);
            async move {
                while let Some(frame) = source.next().await {
                    match frame {
                        Ok(Message::Text(text)) => match PushEnvelope::decode(&text) {
                            Ok(envelope) => shared.router.dispatch(&envelope),
                            Err(err) => log::warn!("dropping malformed push frame: {err}"),
                        },
                        Ok(Message::Close(_)) => break,
                        // Pings are answered by tungstenite; binary frames
                        // are not part of the protocol.
                        Ok(_) => {}
                        Err(err) => {
                            log::warn!("push connection read error: {err}");
                            break;
                        }
                    }
                }
                Self::handle_closed(&shared);
            }
        });

        shared.live.lock().unwrap().reader = Some(reader);
    }

    /// The read loop ended. Unless the close was manual, enter the
    /// reconnect policy.
    fn handle_closed(shared: &Arc<ConnectionShared>) {
        shared.live.lock().unwrap().sink = None;
        if shared.manual_close.load(Ordering::SeqCst) {
            return;
        }
        shared
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        Self::schedule_reconnect(shared);
    }

    /// Increment the attempt counter, then wait `interval × attempt` before
    /// redialing. At most one reconnect timer is outstanding at a time.
    fn schedule_reconnect(shared: &Arc<ConnectionShared>) {
        let used = shared.attempts.load(Ordering::SeqCst);
        if used >= shared.config.max_reconnect_attempts {
            log::warn!("push connection lost after {used} reconnect attempts, giving up");
            return;
        }
        let attempt = used + 1;
        shared.attempts.store(attempt, Ordering::SeqCst);
        shared
            .state_tx
            .send_replace(ConnectionState::Reconnecting { attempt });
        let delay = shared.config.reconnect_interval * attempt;

        let task = tokio::spawn({
            let shared = Arc::clone(shared);
            async move {
                tokio::time::sleep(delay).await;
                if shared.manual_close.load(Ordering::SeqCst) {
                    return;
                }
                match tokio_tungstenite::connect_async(shared.config.url.as_str()).await {
                    Ok((stream, _)) => Self::install(&shared, stream),
                    Err(err) => {
                        log::warn!("reconnect attempt {attempt} failed: {err}");
                        Self::schedule_reconnect(&shared);
                    }
                }
            }
        });

        let mut live = shared.live.lock().unwrap();
        if let Some(previous) = live.reconnect.replace(task) {
            previous.abort();
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

use crate::bus::EventBus;
use crate::config::{ReconnectPolicy, SyncConfig};
use crate::error::ConnectionError;
use crate::lock;
use futures_util::future::{self, BoxFuture};
use futures_util::stream::BoxStream;
use futures_util::{FutureExt, StreamExt};
use napoli_core::push::decode_event;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use url::Url;

/// Inbound text frames of one open push connection. The stream ends when the
/// peer closes; an `Err` item means the transport failed.
pub type FrameStream = BoxStream<'static, Result<String, ConnectionError>>;

pub trait Connector: Send + Sync + 'static {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>>;
}

/// WebSocket transport. Binary, ping and pong frames are skipped.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

impl Connector for WsConnector {
    fn connect(&self, endpoint: &Url) -> BoxFuture<'static, Result<FrameStream, ConnectionError>> {
        let endpoint = endpoint.to_string();
        async move {
            let (ws, _) = connect_async(endpoint)
                .await
                .map_err(|err| ConnectionError::Handshake(err.to_string()))?;
            let frames = ws
                .take_while(|message| future::ready(!matches!(message, Ok(Message::Close(_)))))
                .filter_map(|message| {
                    future::ready(match message {
                        Ok(Message::Text(text)) => Some(Ok(text)),
                        Ok(_) => None,
                        Err(err) => Some(Err(ConnectionError::Transport(err.to_string()))),
                    })
                });
            Ok(frames.boxed())
        }
        .boxed()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Reconnecting => "reconnecting",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionStats {
    pub attempts: u64,
    pub opened: u64,
    pub reconnects_scheduled: u64,
    pub frames: u64,
    pub dropped_frames: u64,
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    opened: AtomicU64,
    reconnects_scheduled: AtomicU64,
    frames: AtomicU64,
    dropped_frames: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConnectionStats {
        ConnectionStats {
            attempts: self.attempts.load(Ordering::Relaxed),
            opened: self.opened.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
        }
    }
}

/// Owns the single push-channel supervisor task.
pub struct ConnectionManager {
    config: SyncConfig,
    bus: EventBus,
    connector: Arc<dyn Connector>,
    state: Arc<watch::Sender<ConnectionState>>,
    counters: Arc<Counters>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(config: SyncConfig, bus: EventBus, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            config,
            bus,
            connector,
            state: Arc::new(state),
            counters: Arc::new(Counters::default()),
            supervisor: Mutex::new(None),
        }
    }

    /// Starts the supervisor unless one is already running (open or waiting
    /// to reconnect). Returns whether a new supervisor was spawned. Endpoint
    /// and runtime problems are logged, never returned.
    pub fn connect(&self, client_id: &str) -> bool {
        let mut slot = lock(&self.supervisor);
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            debug!(event = "push_connect_skipped", client_id, state = self.state().as_str());
            return false;
        }
        let endpoint = match self.config.push_endpoint(client_id) {
            Ok(endpoint) => endpoint,
            Err(err) => {
                error!(event = "push_endpoint_error", client_id, error = %err);
                return false;
            }
        };
        let runtime = match Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!(event = "push_runtime_missing", error = %err);
                return false;
            }
        };
        let supervisor = Supervisor {
            endpoint,
            connector: self.connector.clone(),
            bus: self.bus.clone(),
            state: self.state.clone(),
            counters: self.counters.clone(),
            policy: self.config.reconnect,
            max_frame_bytes: self.config.max_frame_bytes,
        };
        *slot = Some(runtime.spawn(supervisor.run()));
        true
    }

    pub fn is_running(&self) -> bool {
        lock(&self.supervisor)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ConnectionStats {
        self.counters.snapshot()
    }

    pub fn shutdown(&self) {
        if let Some(handle) = lock(&self.supervisor).take() {
            handle.abort();
            info!(event = "push_shutdown");
        }
        self.state.send_replace(ConnectionState::Idle);
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        if let Some(handle) = lock(&self.supervisor).take() {
            handle.abort();
        }
    }
}

struct Supervisor {
    endpoint: Url,
    connector: Arc<dyn Connector>,
    bus: EventBus,
    state: Arc<watch::Sender<ConnectionState>>,
    counters: Arc<Counters>,
    policy: ReconnectPolicy,
    max_frame_bytes: usize,
}

impl Supervisor {
    async fn run(self) {
        let mut failures: u32 = 0;
        loop {
            let attempt = self.counters.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            self.state.send_replace(ConnectionState::Connecting);
            debug!(event = "push_connecting", endpoint = %self.endpoint, attempt);

            match self.connector.connect(&self.endpoint).await {
                Ok(frames) => {
                    failures = 0;
                    self.counters.opened.fetch_add(1, Ordering::Relaxed);
                    self.state.send_replace(ConnectionState::Open);
                    info!(event = "push_open", endpoint = %self.endpoint, attempt);
                    let reason = self.pump(frames).await;
                    warn!(event = "push_closed", endpoint = %self.endpoint, reason = %reason);
                }
                Err(err) => {
                    warn!(event = "push_connect_error", endpoint = %self.endpoint, error = %err);
                }
            }

            let delay = self.policy.delay_for(failures);
            failures = failures.saturating_add(1);
            self.counters
                .reconnects_scheduled
                .fetch_add(1, Ordering::Relaxed);
            self.state.send_replace(ConnectionState::Reconnecting);
            info!(event = "push_reconnect_scheduled", delay_ms = delay.as_millis() as u64);
            tokio::time::sleep(delay).await;
        }
    }

    async fn pump(&self, mut frames: FrameStream) -> String {
        while let Some(frame) = frames.next().await {
            match frame {
                Ok(text) => self.dispatch(&text),
                Err(err) => return err.to_string(),
            }
        }
        "closed by peer".to_string()
    }

    fn dispatch(&self, text: &str) {
        match decode_event(text, self.max_frame_bytes) {
            Ok(event) => {
                self.counters.frames.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event = "push_event",
                    kind = %event.kind,
                    entity = event.entity_id.as_deref().unwrap_or("-"),
                );
                self.bus.publish(&event);
            }
            Err(err) => {
                self.counters.dropped_frames.fetch_add(1, Ordering::Relaxed);
                warn!(event = "push_decode_error", error = %err);
            }
        }
    }
}

use crate::error::TrackerError;
use napoli_core::push::{EventKind, PushEvent};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The HTTP request itself failed.
    Request,
    /// The backend reported the failure on the push channel.
    Remote,
    /// The acknowledgement body was neither processing nor a success.
    Unexpected,
    /// Nothing arrived before the tracker timeout.
    NoResponse,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpFailure {
    pub kind: FailureKind,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum OpState {
    #[default]
    Idle,
    Queued,
    Success,
    Error(OpFailure),
}

impl OpState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, OpState::Success | OpState::Error(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OpState::Idle => "idle",
            OpState::Queued => "queued",
            OpState::Success => "success",
            OpState::Error(_) => "error",
        }
    }

    pub fn failure(&self) -> Option<&OpFailure> {
        match self {
            OpState::Error(failure) => Some(failure),
            _ => None,
        }
    }
}

impl fmt::Display for OpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpState::Error(failure) => write!(f, "error: {}", failure.reason),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Classification of a synchronous HTTP acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Ack {
    Processing,
    Completed,
    Failed(String),
}

impl Ack {
    pub fn classify(body: &Value) -> Ack {
        match ack_status(body).as_deref() {
            Some("processing") => Ack::Processing,
            Some("connected" | "success" | "ok" | "synced") => Ack::Completed,
            _ => Ack::Failed(unexpected_reason(body)),
        }
    }
}

fn ack_status(body: &Value) -> Option<String> {
    body.get("status")
        .and_then(Value::as_str)
        .map(|status| status.trim().to_ascii_lowercase())
}

fn unexpected_reason(body: &Value) -> String {
    ["error", "detail", "message"]
        .iter()
        .find_map(|key| body.get(*key).and_then(Value::as_str))
        .map(|detail| format!("unexpected response: {detail}"))
        .unwrap_or_else(|| "unexpected response".to_string())
}

fn first_text(data: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| data.get(*key).and_then(Value::as_str))
        .filter(|text| !text.trim().is_empty())
        .map(str::to_string)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure(String),
}

/// Decides which push events complete an operation and how.
pub trait OperationFlow: Send + 'static {
    fn name(&self) -> &'static str;

    /// Returns the correlation key of the op this event completes, if any.
    fn classify_event(&self, event: &PushEvent) -> Option<(String, Outcome)>;

    fn classify_ack(&self, body: &Value) -> Ack {
        Ack::classify(body)
    }
}

/// MCP registration: completed by `MCP_CONNECTION_RESULT` keyed by server name.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpConnectFlow;

impl OperationFlow for McpConnectFlow {
    fn name(&self) -> &'static str {
        "mcp_connect"
    }

    fn classify_event(&self, event: &PushEvent) -> Option<(String, Outcome)> {
        if event.kind != EventKind::McpConnectionResult {
            return None;
        }
        let key = event.entity_id.clone()?;
        let outcome = match event.data_str("status") {
            Some("success") => Outcome::Success,
            _ => Outcome::Failure(
                first_text(&event.payload, &["error"])
                    .unwrap_or_else(|| "unknown MCP handshake failure".to_string()),
            ),
        };
        Some((key, outcome))
    }
}

/// Test-connection probe: completed by `MCP_SERVER_STATUS` keyed by server id.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpProbeFlow;

impl OperationFlow for McpProbeFlow {
    fn name(&self) -> &'static str {
        "mcp_probe"
    }

    fn classify_event(&self, event: &PushEvent) -> Option<(String, Outcome)> {
        if event.kind != EventKind::McpServerStatus {
            return None;
        }
        let key = event.entity_id.clone()?;
        match event.data_str("status") {
            Some("online") => Some((key, Outcome::Success)),
            Some(status @ ("error" | "offline")) => {
                let reason = first_text(&event.payload, &["error", "message"])
                    .unwrap_or_else(|| format!("server reported {status}"));
                Some((key, Outcome::Failure(reason)))
            }
            _ => None,
        }
    }

    /// A probe may answer inline with the server status it measured.
    fn classify_ack(&self, body: &Value) -> Ack {
        match ack_status(body).as_deref() {
            Some("online") => Ack::Completed,
            Some(status @ ("error" | "offline")) => Ack::Failed(
                first_text(body, &["error", "message"])
                    .unwrap_or_else(|| format!("server reported {status}")),
            ),
            _ => Ack::classify(body),
        }
    }
}

/// WhatsApp gateway start: ready once a QR code or a connected status arrives.
#[derive(Debug, Clone, Copy, Default)]
pub struct SessionConnectFlow;

impl OperationFlow for SessionConnectFlow {
    fn name(&self) -> &'static str {
        "session_connect"
    }

    fn classify_event(&self, event: &PushEvent) -> Option<(String, Outcome)> {
        let key = event.entity_id.clone()?;
        match event.kind {
            EventKind::WppQrCode => Some((key, Outcome::Success)),
            EventKind::WppStatusChange => match event.data_str("status") {
                Some("connected" | "qr_ready") => Some((key, Outcome::Success)),
                Some("error") => Some((
                    key,
                    Outcome::Failure(
                        first_text(&event.payload, &["message", "error"])
                            .unwrap_or_else(|| "gateway reported an error".to_string()),
                    ),
                )),
                _ => None,
            },
            _ => None,
        }
    }

    fn classify_ack(&self, body: &Value) -> Ack {
        let has_qr = body
            .pointer("/qrcode/base64")
            .and_then(Value::as_str)
            .is_some_and(|qr| !qr.is_empty());
        if has_qr {
            return Ack::Completed;
        }
        match ack_status(body).as_deref() {
            Some("error" | "failed") => Ack::Failed(
                first_text(body, &["message", "error", "detail"])
                    .unwrap_or_else(|| "gateway start failed".to_string()),
            ),
            Some("connected" | "open") => Ack::Completed,
            _ => Ack::Processing,
        }
    }
}

#[derive(Debug, Clone)]
struct OpRecord {
    state: OpState,
    started: Instant,
}

/// Per-panel async operation state machine keyed by correlation key.
///
/// `Idle -> Queued -> {Success | Error}`. Whichever terminal transition comes
/// first (acknowledgement, push event, request error or timeout) wins; later
/// signals for the same op are ignored until it is started again.
#[derive(Debug, Clone)]
pub struct OperationTracker<F> {
    flow: F,
    ops: HashMap<String, OpRecord>,
    timeout: Option<Duration>,
}

impl<F: OperationFlow> OperationTracker<F> {
    pub fn new(flow: F) -> Self {
        Self {
            flow,
            ops: HashMap::new(),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn flow(&self) -> &F {
        &self.flow
    }

    pub fn state(&self, key: &str) -> OpState {
        self.ops
            .get(key)
            .map(|record| record.state.clone())
            .unwrap_or_default()
    }

    pub fn is_queued(&self, key: &str) -> bool {
        matches!(self.ops.get(key), Some(record) if record.state == OpState::Queued)
    }

    pub fn queued(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .ops
            .iter()
            .filter(|(_, record)| record.state == OpState::Queued)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn begin(&mut self, key: &str) -> Result<(), TrackerError> {
        if self.is_queued(key) {
            return Err(TrackerError::AlreadyQueued(key.to_string()));
        }
        self.ops.insert(
            key.to_string(),
            OpRecord {
                state: OpState::Queued,
                started: Instant::now(),
            },
        );
        debug!(event = "op_queued", flow = self.flow.name(), key);
        Ok(())
    }

    pub fn on_ack(&mut self, key: &str, ack: Ack) -> OpState {
        match ack {
            Ack::Processing => {}
            Ack::Completed => self.finish(key, OpState::Success),
            Ack::Failed(reason) => self.finish(
                key,
                OpState::Error(OpFailure {
                    kind: FailureKind::Unexpected,
                    reason,
                }),
            ),
        }
        self.state(key)
    }

    /// Classifies a JSON acknowledgement with the flow's rules, then applies it.
    pub fn on_ack_body(&mut self, key: &str, body: &Value) -> OpState {
        let ack = self.flow.classify_ack(body);
        self.on_ack(key, ack)
    }

    pub fn on_request_error(&mut self, key: &str, reason: impl Into<String>) -> OpState {
        self.finish(
            key,
            OpState::Error(OpFailure {
                kind: FailureKind::Request,
                reason: reason.into(),
            }),
        );
        self.state(key)
    }

    /// Feeds a push event. Returns the key that transitioned, if any.
    pub fn on_event(&mut self, event: &PushEvent) -> Option<String> {
        let (key, outcome) = self.flow.classify_event(event)?;
        if !self.is_queued(&key) {
            return None;
        }
        let next = match outcome {
            Outcome::Success => OpState::Success,
            Outcome::Failure(reason) => OpState::Error(OpFailure {
                kind: FailureKind::Remote,
                reason,
            }),
        };
        self.finish(&key, next);
        Some(key)
    }

    /// Fails every op queued for longer than the timeout. No-op without one.
    pub fn expire(&mut self, now: Instant) -> Vec<String> {
        let Some(timeout) = self.timeout else {
            return Vec::new();
        };
        let mut expired: Vec<String> = self
            .ops
            .iter()
            .filter(|(_, record)| {
                record.state == OpState::Queued
                    && now.saturating_duration_since(record.started) >= timeout
            })
            .map(|(key, _)| key.clone())
            .collect();
        expired.sort();
        for key in &expired {
            warn!(event = "op_timeout", flow = self.flow.name(), key = %key);
            self.finish(
                key,
                OpState::Error(OpFailure {
                    kind: FailureKind::NoResponse,
                    reason: format!("no response after {}s", timeout.as_secs()),
                }),
            );
        }
        expired
    }

    pub fn reset(&mut self, key: &str) {
        self.ops.remove(key);
    }

    pub fn clear_terminal(&mut self) -> usize {
        let before = self.ops.len();
        self.ops.retain(|_, record| !record.state.is_terminal());
        before - self.ops.len()
    }

    fn finish(&mut self, key: &str, next: OpState) {
        let Some(record) = self.ops.get_mut(key) else {
            return;
        };
        if record.state != OpState::Queued {
            debug!(
                event = "op_late_signal",
                flow = self.flow.name(),
                key,
                state = record.state.as_str(),
            );
            return;
        }
        debug!(event = "op_finished", flow = self.flow.name(), key, state = next.as_str());
        record.state = next;
    }
}

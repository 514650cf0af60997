use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::{ApiError, PanelError};
use crate::lock;
use crate::reconcile::{EntityStore, Tracked};
use crate::service::SyncService;
use crate::tracker::{OpState, OperationTracker, SessionConnectFlow};
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::{LogLevel, SessionStatus, WppSession, DEFAULT_SESSION_NAME};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct WhatsAppState {
    pub sessions: EntityStore<WppSession>,
    pub connect: OperationTracker<SessionConnectFlow>,
    gateway_rtt_ms: HashMap<String, u64>,
}

impl WhatsAppState {
    pub fn new(log_cap: usize, operation_timeout: Option<Duration>) -> Self {
        let mut sessions = EntityStore::new(log_cap);
        sessions.insert_local(WppSession::named(DEFAULT_SESSION_NAME));
        Self {
            sessions,
            connect: OperationTracker::new(SessionConnectFlow).with_timeout(operation_timeout),
            gateway_rtt_ms: HashMap::new(),
        }
    }

    /// Applies one push event. Events without a session id, or for a session
    /// this panel does not know, are ignored.
    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        if !event.kind.is_whatsapp() {
            return false;
        }
        let Some(id) = event.entity_id.clone() else {
            return false;
        };
        if !self.sessions.contains(&id) {
            return false;
        }
        self.connect.on_event(event);

        match event.kind {
            EventKind::WppQrCode => {
                let qr = event.data_str("qr").map(str::to_string);
                self.sessions.update_local(&id, |session| {
                    session.status = SessionStatus::QrReady;
                    session.qr_code = qr;
                });
                let message = event
                    .data_str("message")
                    .unwrap_or("Pairing QR code ready, scan it from the phone");
                self.sessions.append_log(&id, LogLevel::Warning, message);
            }
            EventKind::WppStatusChange => {
                let raw = event.data_str("status").unwrap_or_default();
                let Ok(status) = raw.parse::<SessionStatus>() else {
                    warn!(event = "wpp_unknown_status", session = %id, status = raw);
                    return false;
                };
                let latency = event
                    .payload
                    .get("latency")
                    .and_then(Value::as_u64)
                    .or_else(|| self.gateway_rtt_ms.get(&id).copied());
                self.sessions.update_local(&id, |session| {
                    session.status = status;
                    if status == SessionStatus::Connected {
                        session.qr_code = None;
                        if let Some(latency) = latency {
                            session.latency_ms = latency;
                        }
                    }
                });
                let level = match status {
                    SessionStatus::Connected => LogLevel::Success,
                    SessionStatus::Error => LogLevel::Error,
                    SessionStatus::Scanning => LogLevel::Warning,
                    _ => LogLevel::Info,
                };
                let message = event
                    .data_str("message")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("Session state changed: {status}"));
                self.sessions.append_log(&id, level, message);
            }
            EventKind::WppTokenGenerated | EventKind::WppTokenCreated | EventKind::WppTokenRegenerated => {
                if let Some(token) = event.data_str("token") {
                    let token = token.to_string();
                    self.sessions
                        .update_local(&id, |session| session.api_token = Some(token));
                }
                self.sessions
                    .append_log(&id, LogLevel::Success, "Authentication finished, API token issued");
            }
            _ => return false,
        }
        true
    }

    fn begin_start(&mut self, name: &str) -> Result<(), PanelError> {
        if !self.sessions.contains(name) {
            return Err(PanelError::UnknownEntity(name.to_string()));
        }
        self.connect.begin(name)?;
        self.sessions.update_local(name, |session| {
            session.status = SessionStatus::Starting;
            session.qr_code = None;
        });
        self.sessions
            .append_log(name, LogLevel::Info, format!("Starting gateway session {name}"));
        Ok(())
    }

    fn finish_start(&mut self, name: &str, result: Result<Value, ApiError>, rtt: Duration) -> OpState {
        match result {
            Ok(body) => {
                self.gateway_rtt_ms
                    .insert(name.to_string(), rtt.as_millis() as u64);
                let state = self.connect.on_ack_body(name, &body);
                let qr = body
                    .pointer("/qrcode/base64")
                    .and_then(Value::as_str)
                    .filter(|qr| !qr.is_empty())
                    .map(str::to_string);
                let still_starting = self
                    .sessions
                    .value(name)
                    .is_some_and(|session| session.status == SessionStatus::Starting);
                if let (Some(qr), true) = (qr, still_starting) {
                    self.sessions.update_local(name, |session| {
                        session.status = SessionStatus::QrReady;
                        session.qr_code = Some(qr);
                    });
                    self.sessions
                        .append_log(name, LogLevel::Warning, "Gateway returned the pairing QR code");
                } else if let OpState::Error(failure) = &state {
                    let reason = failure.reason.clone();
                    self.mark_failed(name, &reason);
                }
                state
            }
            Err(err) => {
                let reason = err.user_message();
                warn!(event = "wpp_start_failed", session = name, error = %err);
                let state = self.connect.on_request_error(name, reason.clone());
                // A push event may already have finished the start.
                if matches!(state, OpState::Error(_)) {
                    self.mark_failed(name, &format!("Gateway start failed: {reason}"));
                }
                state
            }
        }
    }

    fn mark_failed(&mut self, name: &str, message: &str) {
        self.sessions
            .update_local(name, |session| session.status = SessionStatus::Error);
        self.sessions.append_log(name, LogLevel::Error, message);
    }

    fn mark_logged_out(&mut self, name: &str) {
        self.connect.reset(name);
        self.sessions.update_local(name, |session| {
            session.status = SessionStatus::Disconnected;
            session.qr_code = None;
        });
        self.sessions
            .append_log(name, LogLevel::Info, "Session logged out");
    }
}

/// WhatsApp gateway sessions: pairing lifecycle, tokens and per-session logs.
pub struct WhatsAppPanel {
    state: Arc<Mutex<WhatsAppState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl WhatsAppPanel {
    pub fn mount(service: &SyncService) -> Self {
        let config = service.config();
        let state = Arc::new(Mutex::new(WhatsAppState::new(
            config.log_cap,
            config.operation_timeout,
        )));
        let subscription = attach(service.bus(), &state, WhatsAppState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn snapshot(&self) -> WhatsAppState {
        lock(&self.state).clone()
    }

    pub fn session(&self, name: &str) -> Option<Tracked<WppSession>> {
        lock(&self.state).sessions.get(name).cloned()
    }

    pub fn sessions(&self) -> Vec<WppSession> {
        lock(&self.state).sessions.values()
    }

    pub fn connect_state(&self, name: &str) -> OpState {
        lock(&self.state).connect.state(name)
    }

    pub fn add_session(&self, name: &str) -> Result<(), PanelError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(PanelError::Invalid("session name cannot be empty".to_string()));
        }
        let mut state = lock(&self.state);
        if state.sessions.contains(name) {
            return Err(PanelError::Duplicate(name.to_string()));
        }
        state.sessions.insert_local(WppSession::named(name));
        Ok(())
    }

    /// Creates the gateway instance and asks it to connect. A QR code in the
    /// response completes the start at once; otherwise the op stays queued
    /// until the push channel reports progress.
    pub async fn start_gateway(&self, name: &str) -> Result<OpState, PanelError> {
        lock(&self.state).begin_start(name)?;
        info!(event = "wpp_start", session = name);
        let started = Instant::now();
        let result = self.open_gateway(name).await;
        let rtt = started.elapsed();
        let state = lock(&self.state).finish_start(name, result, rtt);
        Ok(state)
    }

    async fn open_gateway(&self, name: &str) -> Result<Value, ApiError> {
        self.api.create_instance(name).await?;
        self.api.connect_instance(name).await
    }

    /// Logs the session out and resets its pairing state. The local reset
    /// happens whatever the backend answers.
    pub async fn logout(&self, name: &str) -> Result<(), PanelError> {
        if !lock(&self.state).sessions.contains(name) {
            return Err(PanelError::UnknownEntity(name.to_string()));
        }
        let result = self.api.logout_instance(name).await;
        lock(&self.state).mark_logged_out(name);
        result.map(|_| ()).map_err(PanelError::from)
    }

    /// Removes a session locally after asking the gateway to log it out. The
    /// removal is not reverted when the logout call fails.
    pub async fn remove_session(&self, name: &str) -> Result<(), PanelError> {
        {
            let state = lock(&self.state);
            if !state.sessions.contains(name) {
                return Err(PanelError::UnknownEntity(name.to_string()));
            }
            if state.sessions.len() <= 1 {
                return Err(PanelError::LastSession);
            }
        }
        let result = self.api.logout_instance(name).await;
        {
            let mut state = lock(&self.state);
            state.sessions.remove(name);
            state.connect.reset(name);
            state.gateway_rtt_ms.remove(name);
        }
        if let Err(err) = &result {
            warn!(event = "wpp_logout_failed", session = name, error = %err);
        }
        result.map(|_| ()).map_err(PanelError::from)
    }

    pub async fn regenerate_token(&self, name: &str) -> Result<(), PanelError> {
        if !lock(&self.state).sessions.contains(name) {
            return Err(PanelError::UnknownEntity(name.to_string()));
        }
        let result = self.api.regenerate_token(name).await;
        let mut state = lock(&self.state);
        match result {
            Ok(_) => {
                state
                    .sessions
                    .append_log(name, LogLevel::Warning, "Token regeneration requested");
                Ok(())
            }
            Err(err) => {
                state.sessions.append_log(
                    name,
                    LogLevel::Error,
                    format!("Token regeneration failed: {}", err.user_message()),
                );
                Err(err.into())
            }
        }
    }

    /// Fails pairing attempts that got no answer within the operation timeout.
    pub fn expire_operations(&self) -> Vec<String> {
        let mut state = lock(&self.state);
        let expired = state.connect.expire(Instant::now());
        for name in &expired {
            state.mark_failed(name, "Gateway did not answer in time");
        }
        expired
    }
}

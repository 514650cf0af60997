use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::{ApiError, PanelError};
use crate::lock;
use crate::reconcile::{EntityStore, LogRing};
use crate::service::SyncService;
use crate::tracker::{McpConnectFlow, McpProbeFlow, OpState, OperationTracker};
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::{LogLevel, McpServer, McpServerStatus};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

const SYSTEM_SOURCE: &str = "System";

#[derive(Debug, Clone)]
pub struct McpState {
    pub servers: EntityStore<McpServer>,
    pub activity: LogRing,
    pub probes: OperationTracker<McpProbeFlow>,
    pub registrations: OperationTracker<McpConnectFlow>,
}

impl McpState {
    pub fn new(log_cap: usize, operation_timeout: Option<Duration>) -> Self {
        let mut activity = LogRing::new(log_cap);
        activity.push_from(
            LogLevel::Info,
            "MCP gateway initialized, listening for tool calls",
            SYSTEM_SOURCE,
        );
        Self {
            servers: EntityStore::new(log_cap),
            activity,
            probes: OperationTracker::new(McpProbeFlow).with_timeout(operation_timeout),
            registrations: OperationTracker::new(McpConnectFlow).with_timeout(operation_timeout),
        }
    }

    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        match event.kind {
            EventKind::McpNewServer => {
                let server: McpServer = match serde_json::from_value(event.payload.clone()) {
                    Ok(server) => server,
                    Err(err) => {
                        warn!(event = "mcp_announcement_rejected", error = %err);
                        return false;
                    }
                };
                let name = server.name.clone();
                if !self.servers.announce(server).changed() {
                    return false;
                }
                self.activity.push_from(
                    LogLevel::Info,
                    format!("New MCP server detected: {name}"),
                    SYSTEM_SOURCE,
                );
                true
            }
            EventKind::McpToolCall => {
                let tool = event.data_str("tool").unwrap_or("unknown");
                let source = event.data_str("server").unwrap_or(SYSTEM_SOURCE);
                self.activity
                    .push_from(LogLevel::Info, format!("Calling tool: {tool}"), source);
                true
            }
            EventKind::McpServerStatus => {
                let finished = self.probes.on_event(event);
                let merged = self.servers.apply_event(event);
                if let Some(id) = &finished {
                    let (level, message) = match self.probes.state(id) {
                        OpState::Error(failure) => (LogLevel::Error, failure.reason),
                        _ => (LogLevel::Success, format!("Server {id} answered the probe")),
                    };
                    self.activity.push_from(level, message, SYSTEM_SOURCE);
                }
                finished.is_some() || merged.changed()
            }
            EventKind::McpConnectionResult => {
                let Some(name) = event.entity_id.clone() else {
                    return false;
                };
                self.registrations.on_event(event);
                match event.data_str("status") {
                    Some("success") => self.activity.push_from(
                        LogLevel::Success,
                        format!("Connected to MCP server {name}"),
                        SYSTEM_SOURCE,
                    ),
                    _ => self.activity.push_from(
                        LogLevel::Error,
                        format!(
                            "Connection to {name} failed: {}",
                            event.data_str("error").unwrap_or("unknown error")
                        ),
                        SYSTEM_SOURCE,
                    ),
                };
                true
            }
            _ => false,
        }
    }

    fn begin_probe(&mut self, id: &str) -> Result<(), PanelError> {
        if !self.servers.contains(id) {
            return Err(PanelError::UnknownEntity(id.to_string()));
        }
        self.probes.begin(id)?;
        self.servers
            .update_local(id, |server| server.status = McpServerStatus::Syncing);
        self.activity
            .push_from(LogLevel::Info, format!("Pinging server {id}"), SYSTEM_SOURCE);
        Ok(())
    }

    fn finish_probe(&mut self, id: &str, result: Result<Value, ApiError>) -> OpState {
        let was_queued = self.probes.is_queued(id);
        let (state, latency) = match result {
            Ok(body) => (
                self.probes.on_ack_body(id, &body),
                body.get("latency").and_then(Value::as_u64),
            ),
            Err(err) => {
                warn!(event = "mcp_probe_failed", server = id, error = %err);
                (self.probes.on_request_error(id, err.user_message()), None)
            }
        };
        // A push event that already settled the probe owns the server status.
        if !was_queued {
            return state;
        }
        match &state {
            OpState::Success => {
                self.servers.update_local(id, |server| {
                    server.status = McpServerStatus::Online;
                    if let Some(latency) = latency {
                        server.latency_ms = latency;
                    }
                });
                self.activity.push_from(
                    LogLevel::Success,
                    format!("Server {id} answered the probe"),
                    SYSTEM_SOURCE,
                );
            }
            OpState::Error(failure) => {
                self.servers
                    .update_local(id, |server| server.status = McpServerStatus::Error);
                self.activity
                    .push_from(LogLevel::Error, failure.reason.clone(), SYSTEM_SOURCE);
            }
            _ => {}
        }
        state
    }

    fn finish_registration(&mut self, name: &str, result: Result<Value, ApiError>) -> OpState {
        let state = match result {
            Ok(body) => self.registrations.on_ack_body(name, &body),
            Err(err) => {
                warn!(event = "mcp_register_failed", server = name, error = %err);
                self.registrations.on_request_error(name, err.user_message())
            }
        };
        if let OpState::Error(failure) = &state {
            self.activity.push_from(
                LogLevel::Error,
                format!("Registering {name} failed: {}", failure.reason),
                SYSTEM_SOURCE,
            );
        }
        state
    }
}

/// MCP servers: registration form, connection probes and the tool-call feed.
pub struct McpPanel {
    state: Arc<Mutex<McpState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl McpPanel {
    pub fn mount(service: &SyncService) -> Self {
        let config = service.config();
        let state = Arc::new(Mutex::new(McpState::new(
            config.log_cap,
            config.operation_timeout,
        )));
        let subscription = attach(service.bus(), &state, McpState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn snapshot(&self) -> McpState {
        lock(&self.state).clone()
    }

    pub fn servers(&self) -> Vec<McpServer> {
        lock(&self.state).servers.values()
    }

    pub async fn refresh(&self) -> Result<usize, PanelError> {
        match self.api.list_mcp_servers().await {
            Ok(servers) => {
                let mut state = lock(&self.state);
                state.servers.replace_all(servers);
                Ok(state.servers.len())
            }
            Err(err) => {
                lock(&self.state).activity.push_from(
                    LogLevel::Error,
                    "Failed to fetch the server list",
                    SYSTEM_SOURCE,
                );
                Err(err.into())
            }
        }
    }

    /// Submits the registration form. The backend usually answers
    /// `processing`; the outcome then arrives as `MCP_CONNECTION_RESULT`.
    pub async fn register(&self, name: &str, url: &str) -> Result<OpState, PanelError> {
        let name = name.trim();
        let url = url.trim();
        if name.is_empty() || url.is_empty() {
            return Err(PanelError::Invalid("server name and url are required".to_string()));
        }
        {
            let mut state = lock(&self.state);
            state.registrations.begin(name)?;
            state.activity.push_from(
                LogLevel::Info,
                format!("Registering {name} at {url}"),
                SYSTEM_SOURCE,
            );
        }
        let result = self.api.connect_mcp(name, url).await;
        Ok(lock(&self.state).finish_registration(name, result))
    }

    pub fn registration_state(&self, name: &str) -> OpState {
        lock(&self.state).registrations.state(name)
    }

    pub async fn test_connection(&self, id: &str) -> Result<OpState, PanelError> {
        lock(&self.state).begin_probe(id)?;
        let result = self.api.test_mcp_server(id).await;
        Ok(lock(&self.state).finish_probe(id, result))
    }

    pub fn probe_state(&self, id: &str) -> OpState {
        lock(&self.state).probes.state(id)
    }

    pub async fn sync_connector(&self, id: &str) -> Result<(), PanelError> {
        let result = self.api.sync_connector(id).await;
        let mut state = lock(&self.state);
        match result {
            Ok(_) => {
                state.servers.update_local(id, |server| {
                    server.last_ping = Some("Just now".to_string());
                });
                state
                    .activity
                    .push_from(LogLevel::Success, format!("Connector {id} synced"), SYSTEM_SOURCE);
                Ok(())
            }
            Err(err) => {
                state.activity.push_from(
                    LogLevel::Error,
                    format!("Sync of {id} failed: {}", err.user_message()),
                    SYSTEM_SOURCE,
                );
                Err(err.into())
            }
        }
    }

    /// Drops the server locally, then asks the backend to delete it. A failed
    /// delete does not bring the server back.
    pub async fn remove_server(&self, id: &str) -> Result<(), PanelError> {
        {
            let mut state = lock(&self.state);
            if state.servers.remove(id).is_none() {
                return Err(PanelError::UnknownEntity(id.to_string()));
            }
            state.probes.reset(id);
        }
        self.api.delete_mcp_server(id).await?;
        Ok(())
    }

    pub fn expire_operations(&self) -> Vec<String> {
        let now = Instant::now();
        let mut state = lock(&self.state);
        let mut expired = state.registrations.expire(now);
        for id in state.probes.expire(now) {
            state
                .servers
                .update_local(&id, |server| server.status = McpServerStatus::Error);
            expired.push(id);
        }
        expired
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub mod push;

pub const DEFAULT_CLIENT_ID: &str = "admin_dash";
pub const DEFAULT_SESSION_NAME: &str = "BellaNapoli_Main";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Disconnected,
    Starting,
    QrReady,
    Scanning,
    Authenticated,
    Connected,
    Error,
}

impl Default for SessionStatus {
    fn default() -> Self {
        Self::Disconnected
    }
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::Starting => "starting",
            SessionStatus::QrReady => "qr_ready",
            SessionStatus::Scanning => "scanning",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Connected => "connected",
            SessionStatus::Error => "error",
        }
    }

    /// Forward edges of the pairing lifecycle. `error` is reachable from any
    /// state that is not already terminal and `disconnected` from anywhere
    /// (explicit logout).
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        use SessionStatus::*;
        match (self, next) {
            (_, Disconnected) => true,
            (Error, Error) => false,
            (_, Error) => true,
            (Disconnected | Error, Starting) => true,
            (Starting, QrReady) => true,
            (QrReady, Scanning | QrReady) => true,
            (Scanning, Authenticated | Connected) => true,
            (Authenticated, Connected) => true,
            // the gateway may report a reused pairing straight away
            (Starting | QrReady, Connected) => true,
            _ => false,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            SessionStatus::Starting | SessionStatus::QrReady | SessionStatus::Scanning
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "disconnected" => Ok(SessionStatus::Disconnected),
            "starting" => Ok(SessionStatus::Starting),
            "qr_ready" | "qrcode" => Ok(SessionStatus::QrReady),
            "scanning" => Ok(SessionStatus::Scanning),
            "authenticated" => Ok(SessionStatus::Authenticated),
            "connected" | "open" => Ok(SessionStatus::Connected),
            "error" => Ok(SessionStatus::Error),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum McpServerStatus {
    #[serde(alias = "connected")]
    Online,
    Offline,
    Error,
    Syncing,
}

impl Default for McpServerStatus {
    fn default() -> Self {
        Self::Offline
    }
}

impl McpServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            McpServerStatus::Online => "online",
            McpServerStatus::Offline => "offline",
            McpServerStatus::Error => "error",
            McpServerStatus::Syncing => "syncing",
        }
    }
}

impl FromStr for McpServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" | "connected" => Ok(McpServerStatus::Online),
            "offline" => Ok(McpServerStatus::Offline),
            "error" => Ok(McpServerStatus::Error),
            "syncing" => Ok(McpServerStatus::Syncing),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

/// A WhatsApp gateway session as shown on the integration panel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct WppSession {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: SessionStatus,
    #[serde(default)]
    pub qr_code: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
    #[serde(default, rename = "latency")]
    pub latency_ms: u64,
}

impl WppSession {
    pub fn named(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct McpServer {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub status: McpServerStatus,
    #[serde(default, rename = "latency")]
    pub latency_ms: u64,
    #[serde(default)]
    pub tools: Vec<McpTool>,
    #[serde(default)]
    pub last_ping: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LeadPotential {
    High,
    #[default]
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "user_name")]
    pub user_name: String,
    #[serde(default, alias = "phone_number")]
    pub phone_number: String,
    #[serde(default, alias = "last_intent")]
    pub last_intent: String,
    #[serde(default)]
    pub potential: LeadPotential,
    #[serde(default)]
    pub status: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "deserialize_id")]
    pub id: String,
    pub sender: Sender,
    pub text: String,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default)]
    pub phone_number: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub last_interaction: String,
    #[serde(default)]
    pub intervention_active: bool,
    #[serde(default)]
    pub status: String,
}

impl Conversation {
    pub fn opened(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: "active".to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MenuItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub available: bool,
    #[serde(default)]
    pub ingredients: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeStatus {
    Indexed,
    #[default]
    Processing,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    #[serde(default, alias = "file_name")]
    pub file_name: String,
    #[serde(default, alias = "file_type")]
    pub file_type: String,
    #[serde(default, alias = "upload_date")]
    pub upload_date: String,
    #[serde(default)]
    pub status: KnowledgeStatus,
    #[serde(default, alias = "token_count")]
    pub token_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DashboardStats {
    #[serde(default)]
    pub active_users: u64,
    #[serde(default)]
    pub leads: u64,
    /// Rendered as sent by the backend ("1.2s" or a bare number of seconds).
    #[serde(default, deserialize_with = "deserialize_text")]
    pub response_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Breadcrumb {
    pub id: String,
    pub label: String,
    pub scope: String,
}

impl Breadcrumb {
    pub fn root() -> Self {
        Self {
            id: "root".to_string(),
            label: "Overview".to_string(),
            scope: "overview".to_string(),
        }
    }

    pub fn is_overview(&self) -> bool {
        self.scope == "overview"
    }
}

/// One row of drill-down data returned by the analytics endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DrillItem {
    #[serde(default, deserialize_with = "deserialize_opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub drillable: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Success => "success",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogLine {
    pub seq: u64,
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {:<7} {}",
            self.at.format("%H:%M:%S"),
            self.level.as_str(),
            self.message
        )?;
        if let Some(source) = &self.source {
            write!(f, " ({source})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feedback {
    pub conversation_id: String,
    pub message_id: String,
    pub is_positive: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
}

/// Deserialize an id that can be either a string or a number into a String.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

pub(crate) fn deserialize_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(None),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        _ => Err(serde::de::Error::custom("expected string or number for id")),
    }
}

fn deserialize_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(String::new()),
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(format!("{n}s")),
        _ => Err(serde::de::Error::custom("expected string or number")),
    }
}

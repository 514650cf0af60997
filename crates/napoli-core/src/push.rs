use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;

/// Discriminator carried in the `type` field of every push frame.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatsUpdate,
    LeadUpdate,
    WppQrCode,
    WppStatusChange,
    WppTokenGenerated,
    WppTokenCreated,
    WppTokenRegenerated,
    McpNewServer,
    McpConnectionResult,
    McpToolCall,
    McpServerStatus,
    NewWhatsappMessage,
    InterventionToggled,
    OptimizationQueued,
    FeedbackReceived,
    MenuUpdate,
    KnowledgeFileDeleted,
    Other(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::StatsUpdate => "STATS_UPDATE",
            EventKind::LeadUpdate => "LEAD_UPDATE",
            EventKind::WppQrCode => "WPP_QR_CODE",
            EventKind::WppStatusChange => "WPP_STATUS_CHANGE",
            EventKind::WppTokenGenerated => "WPP_TOKEN_GENERATED",
            EventKind::WppTokenCreated => "WPP_TOKEN_CREATED",
            EventKind::WppTokenRegenerated => "WPP_TOKEN_REGENERATED",
            EventKind::McpNewServer => "MCP_NEW_SERVER",
            EventKind::McpConnectionResult => "MCP_CONNECTION_RESULT",
            EventKind::McpToolCall => "MCP_TOOL_CALL",
            EventKind::McpServerStatus => "MCP_SERVER_STATUS",
            EventKind::NewWhatsappMessage => "NEW_WHATSAPP_MESSAGE",
            EventKind::InterventionToggled => "INTERVENTION_TOGGLED",
            EventKind::OptimizationQueued => "OPTIMIZATION_QUEUED",
            EventKind::FeedbackReceived => "FEEDBACK_RECEIVED",
            EventKind::MenuUpdate => "MENU_UPDATE",
            EventKind::KnowledgeFileDeleted => "KNOWLEDGE_FILE_DELETED",
            EventKind::Other(raw) => raw.as_str(),
        }
    }

    pub fn is_whatsapp(&self) -> bool {
        matches!(
            self,
            EventKind::WppQrCode
                | EventKind::WppStatusChange
                | EventKind::WppTokenGenerated
                | EventKind::WppTokenCreated
                | EventKind::WppTokenRegenerated
        )
    }
}

impl From<&str> for EventKind {
    fn from(raw: &str) -> Self {
        match raw.trim() {
            "STATS_UPDATE" => EventKind::StatsUpdate,
            "LEAD_UPDATE" => EventKind::LeadUpdate,
            "WPP_QR_CODE" => EventKind::WppQrCode,
            "WPP_STATUS_CHANGE" => EventKind::WppStatusChange,
            "WPP_TOKEN_GENERATED" => EventKind::WppTokenGenerated,
            "WPP_TOKEN_CREATED" => EventKind::WppTokenCreated,
            "WPP_TOKEN_REGENERATED" => EventKind::WppTokenRegenerated,
            "MCP_NEW_SERVER" => EventKind::McpNewServer,
            "MCP_CONNECTION_RESULT" => EventKind::McpConnectionResult,
            "MCP_TOOL_CALL" => EventKind::McpToolCall,
            "MCP_SERVER_STATUS" => EventKind::McpServerStatus,
            "NEW_WHATSAPP_MESSAGE" => EventKind::NewWhatsappMessage,
            "INTERVENTION_TOGGLED" => EventKind::InterventionToggled,
            "OPTIMIZATION_QUEUED" => EventKind::OptimizationQueued,
            "FEEDBACK_RECEIVED" => EventKind::FeedbackReceived,
            "MENU_UPDATE" => EventKind::MenuUpdate,
            "KNOWLEDGE_FILE_DELETED" => EventKind::KnowledgeFileDeleted,
            other => EventKind::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EventKindVisitor;

        impl<'de> Visitor<'de> for EventKindVisitor {
            type Value = EventKind;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("an event type string")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value.trim().is_empty() {
                    return Err(E::custom("event type cannot be empty"));
                }
                Ok(EventKind::from(value))
            }
        }

        deserializer.deserialize_str(EventKindVisitor)
    }
}

/// JSON text frame as emitted by the backend broadcaster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[serde(deserialize_with = "crate::deserialize_opt_id")]
    pub session_id: Option<String>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// A decoded push notification with its correlation key resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct PushEvent {
    pub kind: EventKind,
    pub entity_id: Option<String>,
    pub session_id: Option<String>,
    pub payload: Value,
    pub timestamp: Option<String>,
    pub revision: Option<u64>,
}

impl PushEvent {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        Self::from(WireEvent {
            kind,
            session_id: None,
            data: payload,
            timestamp: None,
            revision: None,
        })
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self.entity_id = correlation_key(&self.kind, self.session_id.as_deref(), &self.payload);
        self
    }

    pub fn with_revision(mut self, revision: u64) -> Self {
        self.revision = Some(revision);
        self
    }

    pub fn data(&self) -> Option<&Map<String, Value>> {
        self.payload.as_object()
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.payload.get(key).and_then(Value::as_bool)
    }

    /// Reads a string-or-number identifier from the payload.
    pub fn data_id(&self, key: &str) -> Option<String> {
        self.payload.get(key).and_then(id_to_string)
    }

    pub fn is_correlated_to(&self, key: &str) -> bool {
        self.entity_id.as_deref() == Some(key)
    }

    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            kind: self.kind.clone(),
            session_id: self.session_id.clone(),
            data: self.payload.clone(),
            timestamp: self.timestamp.clone(),
            revision: self.revision,
        }
    }
}

impl From<WireEvent> for PushEvent {
    fn from(wire: WireEvent) -> Self {
        let entity_id = correlation_key(&wire.kind, wire.session_id.as_deref(), &wire.data);
        Self {
            kind: wire.kind,
            entity_id,
            session_id: wire.session_id,
            payload: wire.data,
            timestamp: wire.timestamp,
            revision: wire.revision,
        }
    }
}

pub fn correlation_key(kind: &EventKind, session_id: Option<&str>, data: &Value) -> Option<String> {
    let from_data = |key: &str| data.get(key).and_then(id_to_string);
    let session = || session_id.filter(|value| !value.trim().is_empty()).map(str::to_string);
    match kind {
        EventKind::WppQrCode
        | EventKind::WppStatusChange
        | EventKind::WppTokenGenerated
        | EventKind::WppTokenCreated
        | EventKind::WppTokenRegenerated => session().or_else(|| from_data("session_id")),
        EventKind::McpConnectionResult => from_data("name"),
        EventKind::McpNewServer | EventKind::McpServerStatus | EventKind::LeadUpdate => {
            from_data("id")
        }
        EventKind::McpToolCall => from_data("server"),
        EventKind::NewWhatsappMessage
        | EventKind::InterventionToggled
        | EventKind::OptimizationQueued
        | EventKind::FeedbackReceived => from_data("conversation_id"),
        EventKind::KnowledgeFileDeleted => from_data("file_id"),
        EventKind::MenuUpdate => from_data("id").or_else(|| from_data("deleted")),
        EventKind::StatsUpdate | EventKind::Other(_) => session(),
    }
}

pub(crate) fn id_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.trim().is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

pub fn encode_event(event: &PushEvent, max_frame_bytes: usize) -> Result<String, FrameError> {
    let encoded =
        serde_json::to_string(&event.to_wire()).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    Ok(encoded)
}

pub fn decode_event(frame: &str, max_frame_bytes: usize) -> Result<PushEvent, FrameError> {
    let raw = frame.trim_end_matches(['\n', '\r']);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    let wire: WireEvent =
        serde_json::from_str(raw).map_err(|err| FrameError::Decode(err.to_string()))?;
    Ok(PushEvent::from(wire))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_whatsapp_frame_with_top_level_session() {
        let event = decode_event(
            r#"{"type":"WPP_QR_CODE","session_id":"S1","data":{"qr":"data:image/png;base64,AAA"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(event.kind, EventKind::WppQrCode);
        assert_eq!(event.entity_id.as_deref(), Some("S1"));
        assert_eq!(event.data_str("qr"), Some("data:image/png;base64,AAA"));
    }

    #[test]
    fn token_created_falls_back_to_embedded_session_id() {
        let event = decode_event(
            r#"{"type":"WPP_TOKEN_CREATED","data":{"session_id":"BellaNapoli_Main"},"timestamp":"2026-02-07T21:00:00"}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(event.entity_id.as_deref(), Some("BellaNapoli_Main"));
        assert_eq!(event.timestamp.as_deref(), Some("2026-02-07T21:00:00"));
    }

    #[test]
    fn numeric_ids_become_decimal_strings() {
        let event = PushEvent::new(
            EventKind::McpServerStatus,
            json!({"id": 1, "status": "online"}),
        );
        assert_eq!(event.entity_id.as_deref(), Some("1"));
        assert!(event.is_correlated_to("1"));
        assert!(!event.is_correlated_to("2"));
    }

    #[test]
    fn mcp_connection_result_correlates_by_name() {
        let event = PushEvent::new(
            EventKind::McpConnectionResult,
            json!({"status": "error", "name": "postgres", "error": "handshake timeout"}),
        );
        assert_eq!(event.entity_id.as_deref(), Some("postgres"));
    }

    #[test]
    fn menu_delete_correlates_by_deleted_id() {
        let event = PushEvent::new(EventKind::MenuUpdate, json!({"deleted": "pz-4"}));
        assert_eq!(event.entity_id.as_deref(), Some("pz-4"));
    }

    #[test]
    fn unknown_kind_is_preserved_not_rejected() {
        let event = decode_event(
            r#"{"type":"REPORT_READY","data":{"id":"r1"}}"#,
            DEFAULT_MAX_FRAME_BYTES,
        )
        .expect("decode");
        assert_eq!(event.kind, EventKind::Other("REPORT_READY".to_string()));
        assert_eq!(event.kind.as_str(), "REPORT_READY");
        assert_eq!(event.entity_id, None);
    }

    #[test]
    fn missing_data_decodes_as_null() {
        let event = decode_event(r#"{"type":"STATS_UPDATE"}"#, DEFAULT_MAX_FRAME_BYTES)
            .expect("decode");
        assert_eq!(event.payload, Value::Null);
        assert!(event.data().is_none());
    }

    #[test]
    fn malformed_and_untyped_frames_are_decode_errors() {
        let malformed = decode_event("{\"type\":", DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(malformed, Err(FrameError::Decode(_))));

        let untyped = decode_event(r#"{"data":{"qr":"x"}}"#, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(untyped, Err(FrameError::Decode(_))));

        let empty_type = decode_event(r#"{"type":"  ","data":{}}"#, DEFAULT_MAX_FRAME_BYTES);
        assert!(matches!(empty_type, Err(FrameError::Decode(_))));
    }

    #[test]
    fn oversized_frame_is_rejected_before_parsing() {
        let frame = format!(
            r#"{{"type":"STATS_UPDATE","data":{{"blob":"{}"}}}}"#,
            "x".repeat(512)
        );
        let result = decode_event(&frame, 128);
        assert!(matches!(result, Err(FrameError::OversizedFrame { max: 128, .. })));
    }

    #[test]
    fn encoded_event_decodes_to_same_correlation() {
        let event = PushEvent::new(EventKind::WppStatusChange, json!({"status": "connected"}))
            .with_session("S1")
            .with_revision(4);
        let frame = encode_event(&event, DEFAULT_MAX_FRAME_BYTES).expect("encode");
        let decoded = decode_event(&frame, DEFAULT_MAX_FRAME_BYTES).expect("decode");
        assert_eq!(decoded, event);
    }
}

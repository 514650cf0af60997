use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::PanelError;
use crate::lock;
use crate::reconcile::{EntityStore, Tracked};
use crate::service::SyncService;
use chrono::Utc;
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::{ChatMessage, Conversation, Feedback, LogLevel, Sender};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ConversationsState {
    pub conversations: EntityStore<Conversation>,
}

impl ConversationsState {
    pub fn new(log_cap: usize) -> Self {
        Self {
            conversations: EntityStore::new(log_cap),
        }
    }

    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        let Some(id) = event.entity_id.clone() else {
            return false;
        };
        match event.kind {
            EventKind::NewWhatsappMessage => {
                let Some(raw) = event.payload.get("message") else {
                    return false;
                };
                let message: ChatMessage = match serde_json::from_value(raw.clone()) {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(event = "chat_message_rejected", conversation = %id, error = %err);
                        return false;
                    }
                };
                self.append_message(&id, message);
                true
            }
            EventKind::InterventionToggled => {
                let Some(active) = event.data_bool("active") else {
                    return false;
                };
                let changed = self
                    .conversations
                    .merge(&id, &json!({ "intervention_active": active }), event.revision)
                    .changed();
                if let Some(message) = event.data_str("message") {
                    self.conversations.append_log(&id, LogLevel::Info, message);
                }
                changed
            }
            _ => false,
        }
    }

    /// Appends to the conversation, opening it first when this is the first
    /// message seen for it.
    fn append_message(&mut self, id: &str, mut message: ChatMessage) {
        if !self.conversations.contains(id) {
            self.conversations.announce(Conversation::opened(id));
        }
        self.conversations.update_local(id, |conversation| {
            if message.id.is_empty() {
                message.id = format!("{}-{}", conversation.id, conversation.messages.len() + 1);
            }
            if message.timestamp.is_empty() {
                message.timestamp = Utc::now().to_rfc3339();
            }
            conversation.last_interaction = message.timestamp.clone();
            conversation.messages.push(message);
        });
    }
}

pub struct ConversationsPanel {
    state: Arc<Mutex<ConversationsState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl ConversationsPanel {
    pub fn mount(service: &SyncService) -> Self {
        let state = Arc::new(Mutex::new(ConversationsState::new(service.config().log_cap)));
        let subscription = attach(service.bus(), &state, ConversationsState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn conversation(&self, id: &str) -> Option<Tracked<Conversation>> {
        lock(&self.state).conversations.get(id).cloned()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        lock(&self.state).conversations.values()
    }

    /// Shows the operator reply at once and then sends it. A failed send
    /// leaves the reply in place.
    pub async fn send_message(&self, conversation_id: &str, text: &str) -> Result<Value, PanelError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(PanelError::Invalid("message text cannot be empty".to_string()));
        }
        lock(&self.state).append_message(
            conversation_id,
            ChatMessage {
                id: String::new(),
                sender: Sender::Agent,
                text: text.to_string(),
                timestamp: Utc::now().to_rfc3339(),
                sentiment: None,
                media_url: None,
            },
        );
        Ok(self.api.send_message(conversation_id, text, &[]).await?)
    }

    pub async fn set_intervention(&self, conversation_id: &str, active: bool) -> Result<(), PanelError> {
        self.api.intervene(conversation_id, active).await?;
        lock(&self.state).conversations.update_local(conversation_id, |conversation| {
            conversation.intervention_active = active;
        });
        Ok(())
    }

    pub async fn send_feedback(&self, feedback: &Feedback) -> Result<(), PanelError> {
        if !feedback.is_positive
            && feedback
                .correction
                .as_deref()
                .map_or(true, |text| text.trim().is_empty())
        {
            return Err(PanelError::Invalid(
                "negative feedback needs a correction".to_string(),
            ));
        }
        self.api.send_feedback(feedback).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn incoming(conversation: &str, text: &str) -> PushEvent {
        PushEvent::new(
            EventKind::NewWhatsappMessage,
            json!({
                "conversation_id": conversation,
                "message": {"sender": "user", "text": text, "timestamp": "2024-05-01T20:00:00"},
            }),
        )
    }

    #[test]
    fn first_message_opens_conversation() {
        let mut state = ConversationsState::new(50);
        assert!(state.apply_event(&incoming("5511999", "una margherita per favore")));
        assert!(state.apply_event(&incoming("5511999", "e una coca")));

        let conversation = state.conversations.value("5511999").expect("conversation");
        assert_eq!(conversation.status, "active");
        assert_eq!(conversation.messages.len(), 2);
        assert_eq!(conversation.messages[0].id, "5511999-1");
        assert_eq!(conversation.messages[1].id, "5511999-2");
        assert_eq!(conversation.messages[1].sender, Sender::User);
        assert_eq!(conversation.last_interaction, "2024-05-01T20:00:00");
    }

    #[test]
    fn intervention_toggle_merges_flag_only() {
        let mut state = ConversationsState::new(50);
        state.apply_event(&incoming("c1", "ciao"));
        let toggled = PushEvent::new(
            EventKind::InterventionToggled,
            json!({"conversation_id": "c1", "active": true, "message": "Human takeover activated"}),
        );
        assert!(state.apply_event(&toggled));
        let record = state.conversations.get("c1").expect("conversation");
        assert!(record.value.intervention_active);
        assert_eq!(record.value.messages.len(), 1);
        assert_eq!(
            record.logs.latest().expect("log").message,
            "Human takeover activated"
        );
    }

    #[test]
    fn toggle_for_unknown_conversation_is_ignored() {
        let mut state = ConversationsState::new(50);
        let toggled = PushEvent::new(
            EventKind::InterventionToggled,
            json!({"conversation_id": "ghost", "active": true}),
        );
        assert!(!state.apply_event(&toggled));
        assert!(state.conversations.is_empty());
    }

    #[test]
    fn message_without_body_is_dropped() {
        let mut state = ConversationsState::new(50);
        let event = PushEvent::new(
            EventKind::NewWhatsappMessage,
            json!({"conversation_id": "c1", "message": {"text": "no sender"}}),
        );
        assert!(!state.apply_event(&event));
        assert!(state.conversations.is_empty());
    }
}

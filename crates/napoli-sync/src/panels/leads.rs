use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::PanelError;
use crate::lock;
use crate::reconcile::EntityStore;
use crate::service::SyncService;
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::Lead;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Leads shown on the CRM card, newest first.
pub const RECENT_LEADS: usize = 10;

#[derive(Debug, Clone)]
pub struct LeadsState {
    pub leads: EntityStore<Lead>,
}

impl LeadsState {
    pub fn new(log_cap: usize) -> Self {
        Self {
            leads: EntityStore::new(log_cap),
        }
    }

    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        if event.kind != EventKind::LeadUpdate {
            return false;
        }
        let lead: Lead = match serde_json::from_value(event.payload.clone()) {
            Ok(lead) => lead,
            Err(err) => {
                warn!(event = "lead_update_rejected", error = %err);
                return false;
            }
        };
        self.leads.upsert_front(lead);
        self.leads.truncate(RECENT_LEADS);
        true
    }
}

pub struct LeadsPanel {
    state: Arc<Mutex<LeadsState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl LeadsPanel {
    pub fn mount(service: &SyncService) -> Self {
        let state = Arc::new(Mutex::new(LeadsState::new(service.config().log_cap)));
        let subscription = attach(service.bus(), &state, LeadsState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn leads(&self) -> Vec<Lead> {
        lock(&self.state).leads.values()
    }

    pub async fn refresh(&self) -> Result<usize, PanelError> {
        let leads = self.api.list_leads().await?;
        let mut state = lock(&self.state);
        state.leads.replace_all(leads);
        state.leads.truncate(RECENT_LEADS);
        Ok(state.leads.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use napoli_core::LeadPotential;
    use serde_json::json;

    fn lead_event(id: u64, intent: &str) -> PushEvent {
        PushEvent::new(
            EventKind::LeadUpdate,
            json!({
                "id": id,
                "phoneNumber": "+39 081 555 0101",
                "userName": "Giulia",
                "lastIntent": intent,
                "potential": "high",
                "status": "new",
            }),
        )
    }

    #[test]
    fn update_moves_lead_to_front() {
        let mut state = LeadsState::new(50);
        state.apply_event(&lead_event(1, "menu"));
        state.apply_event(&lead_event(2, "booking"));
        state.apply_event(&lead_event(1, "delivery"));
        assert_eq!(state.leads.ids(), ["1".to_string(), "2".to_string()]);
        let lead = state.leads.value("1").expect("lead");
        assert_eq!(lead.last_intent, "delivery");
        assert_eq!(lead.potential, LeadPotential::High);
    }

    #[test]
    fn keeps_only_recent_leads() {
        let mut state = LeadsState::new(50);
        for id in 0..15 {
            state.apply_event(&lead_event(id, "menu"));
        }
        assert_eq!(state.leads.len(), RECENT_LEADS);
        assert_eq!(state.leads.ids()[0], "14");
        assert!(!state.leads.contains("4"));
    }

    #[test]
    fn malformed_lead_is_dropped() {
        let mut state = LeadsState::new(50);
        let event = PushEvent::new(EventKind::LeadUpdate, json!({"potential": "enormous"}));
        assert!(!state.apply_event(&event));
        assert!(state.leads.is_empty());
    }
}

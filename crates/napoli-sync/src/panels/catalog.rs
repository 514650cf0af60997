use super::attach;
use crate::api::ApiClient;
use crate::bus::Subscription;
use crate::error::PanelError;
use crate::lock;
use crate::reconcile::EntityStore;
use crate::service::SyncService;
use napoli_core::push::{EventKind, PushEvent};
use napoli_core::{KnowledgeItem, MenuItem};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct CatalogState {
    pub menu: EntityStore<MenuItem>,
    pub knowledge: EntityStore<KnowledgeItem>,
}

impl CatalogState {
    pub fn new(log_cap: usize) -> Self {
        Self {
            menu: EntityStore::new(log_cap),
            knowledge: EntityStore::new(log_cap),
        }
    }

    pub fn apply_event(&mut self, event: &PushEvent) -> bool {
        match event.kind {
            EventKind::MenuUpdate => {
                if let Some(deleted) = event.data_id("deleted") {
                    return self.menu.remove(&deleted).is_some();
                }
                match serde_json::from_value::<MenuItem>(event.payload.clone()) {
                    Ok(item) => self.menu.upsert_front(item).changed(),
                    Err(err) => {
                        warn!(event = "menu_update_rejected", error = %err);
                        false
                    }
                }
            }
            EventKind::KnowledgeFileDeleted => match event.entity_id.as_deref() {
                Some(id) => {
                    let removed = self.knowledge.remove(id).is_some();
                    if removed {
                        info!(
                            event = "knowledge_removed",
                            file_id = id,
                            vectors = ?event.payload.get("vectors_removed").and_then(serde_json::Value::as_u64),
                        );
                    }
                    removed
                }
                None => false,
            },
            _ => false,
        }
    }
}

/// Menu items and knowledge-base documents.
pub struct CatalogPanel {
    state: Arc<Mutex<CatalogState>>,
    api: ApiClient,
    _subscription: Subscription,
}

impl CatalogPanel {
    pub fn mount(service: &SyncService) -> Self {
        let state = Arc::new(Mutex::new(CatalogState::new(service.config().log_cap)));
        let subscription = attach(service.bus(), &state, CatalogState::apply_event);
        Self {
            state,
            api: service.api().clone(),
            _subscription: subscription,
        }
    }

    pub fn menu(&self) -> Vec<MenuItem> {
        lock(&self.state).menu.values()
    }

    pub fn documents(&self) -> Vec<KnowledgeItem> {
        lock(&self.state).knowledge.values()
    }

    pub async fn refresh(&self) -> Result<(), PanelError> {
        let menu = self.api.list_menu().await?;
        let knowledge = self.api.list_knowledge().await?;
        let mut state = lock(&self.state);
        state.menu.replace_all(menu);
        state.knowledge.replace_all(knowledge);
        Ok(())
    }

    pub async fn create_menu_item(&self, item: &MenuItem) -> Result<(), PanelError> {
        if item.name.trim().is_empty() {
            return Err(PanelError::Invalid("menu item needs a name".to_string()));
        }
        self.api.create_menu_item(item).await?;
        Ok(())
    }

    /// Uploads a document and reloads the list so the new entry shows up
    /// with the id the backend assigned.
    pub async fn upload(&self, file_name: &str, bytes: Vec<u8>) -> Result<(), PanelError> {
        if bytes.is_empty() {
            return Err(PanelError::Invalid(format!("{file_name} is empty")));
        }
        self.api.upload_knowledge(file_name, bytes).await?;
        let knowledge = self.api.list_knowledge().await?;
        lock(&self.state).knowledge.replace_all(knowledge);
        Ok(())
    }

    pub async fn delete_menu_item(&self, id: &str) -> Result<(), PanelError> {
        self.api.delete_menu_item(id).await?;
        lock(&self.state).menu.remove(id);
        Ok(())
    }

    pub async fn delete_document(&self, id: &str) -> Result<(), PanelError> {
        self.api.delete_knowledge(id).await?;
        lock(&self.state).knowledge.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn pizza(id: &str, price: f64) -> Value {
        json!({"id": id, "name": "Margherita", "price": price, "category": "pizza", "available": true})
    }

    #[test]
    fn menu_update_upserts_and_deletes() {
        let mut state = CatalogState::new(50);
        assert!(state.apply_event(&PushEvent::new(EventKind::MenuUpdate, pizza("p1", 9.5))));
        assert!(state.apply_event(&PushEvent::new(EventKind::MenuUpdate, pizza("p1", 10.0))));
        assert_eq!(state.menu.len(), 1);
        assert_eq!(state.menu.value("p1").expect("item").price, 10.0);

        let deleted = PushEvent::new(EventKind::MenuUpdate, json!({"deleted": "p1"}));
        assert!(state.apply_event(&deleted));
        assert!(state.menu.is_empty());
        assert!(!state.apply_event(&deleted));
    }

    #[test]
    fn knowledge_delete_removes_document() {
        let mut state = CatalogState::new(50);
        state.knowledge.insert_local(KnowledgeItem {
            id: "42".to_string(),
            file_name: "menu.pdf".to_string(),
            ..KnowledgeItem::default()
        });
        let event = PushEvent::new(
            EventKind::KnowledgeFileDeleted,
            json!({"file_id": 42, "vectors_removed": 17}),
        );
        assert!(state.apply_event(&event));
        assert!(state.knowledge.is_empty());
    }
}

use crate::api::ApiClient;
use crate::drilldown::ViewStack;
use crate::error::PanelError;
use crate::lock;
use crate::service::SyncService;
use napoli_core::{Breadcrumb, DrillItem};
use std::sync::{Arc, Mutex};
use tracing::warn;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsightsState {
    pub stack: ViewStack,
    pub items: Vec<DrillItem>,
    pub last_error: Option<String>,
}

impl InsightsState {
    fn target(&self) -> Breadcrumb {
        self.stack.current().clone()
    }
}

/// Drill-down analytics. Every navigation reloads the rows of the top frame;
/// this panel has no push subscription.
pub struct InsightsPanel {
    state: Arc<Mutex<InsightsState>>,
    api: ApiClient,
}

impl InsightsPanel {
    pub fn mount(service: &SyncService) -> Self {
        Self {
            state: Arc::new(Mutex::new(InsightsState::default())),
            api: service.api().clone(),
        }
    }

    pub fn snapshot(&self) -> InsightsState {
        lock(&self.state).clone()
    }

    pub fn trail(&self) -> String {
        lock(&self.state).stack.trail()
    }

    /// Reloads the rows for the current frame.
    pub async fn load(&self) -> Result<usize, PanelError> {
        let target = lock(&self.state).target();
        let result = self.api.drilldown(&target.scope, &target.id).await;
        let mut state = lock(&self.state);
        if state.stack.current() != &target {
            // navigation moved on while the request was in flight
            return Ok(state.items.len());
        }
        match result {
            Ok(items) => {
                state.items = items;
                state.last_error = None;
                Ok(state.items.len())
            }
            Err(err) => {
                warn!(event = "insights_load_failed", scope = %target.scope, error = %err);
                state.items.clear();
                state.last_error = Some(err.user_message());
                Err(err.into())
            }
        }
    }

    pub async fn drill_down(&self, item: &DrillItem) -> Result<bool, PanelError> {
        if !lock(&self.state).stack.drill_down(item) {
            return Ok(false);
        }
        self.load().await?;
        Ok(true)
    }

    /// Drills into the row at `index` of the current data.
    pub async fn drill_into(&self, index: usize) -> Result<bool, PanelError> {
        let item = lock(&self.state).items.get(index).cloned();
        match item {
            Some(item) => self.drill_down(&item).await,
            None => Err(PanelError::Invalid(format!("no row at index {index}"))),
        }
    }

    pub async fn back(&self) -> Result<bool, PanelError> {
        if !lock(&self.state).stack.back() {
            return Ok(false);
        }
        self.load().await?;
        Ok(true)
    }

    pub async fn jump_to(&self, index: usize) -> Result<bool, PanelError> {
        if !lock(&self.state).stack.jump_to(index) {
            return Ok(false);
        }
        self.load().await?;
        Ok(true)
    }
}

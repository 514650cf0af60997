//! View-models of the dashboard screens. Each panel owns its state behind a
//! mutex, applies push events through one bus subscription and calls the
//! REST facade for user actions. Locks are never held across an await.

use crate::bus::{EventBus, Subscription};
use crate::lock;
use napoli_core::push::PushEvent;
use std::sync::{Arc, Mutex};

pub mod catalog;
pub mod conversations;
pub mod insights;
pub mod leads;
pub mod mcp;
pub mod stats;
pub mod whatsapp;

pub use catalog::{CatalogPanel, CatalogState};
pub use conversations::{ConversationsPanel, ConversationsState};
pub use insights::{InsightsPanel, InsightsState};
pub use leads::{LeadsPanel, LeadsState};
pub use mcp::{McpPanel, McpState};
pub use stats::{StatsPanel, StatsState};
pub use whatsapp::{WhatsAppPanel, WhatsAppState};

/// Routes every bus event into `apply` on the panel state. The listener only
/// holds a weak reference, so a dropped panel stops receiving writes even if
/// its subscription outlives it.
pub(crate) fn attach<S>(
    bus: &EventBus,
    state: &Arc<Mutex<S>>,
    apply: fn(&mut S, &PushEvent) -> bool,
) -> Subscription
where
    S: Send + 'static,
{
    let state = Arc::downgrade(state);
    bus.subscribe(move |event| {
        if let Some(state) = state.upgrade() {
            apply(&mut lock(&state), event);
        }
    })
}

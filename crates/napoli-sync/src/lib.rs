//! Real-time synchronization layer of the Napoli operator console: one push
//! channel fanned out over an event bus, per-panel entity reconciliation and
//! async-operation tracking, plus the REST facade the panels call.

use std::sync::{Mutex, MutexGuard};

pub mod api;
pub mod bus;
pub mod config;
pub mod connection;
pub mod drilldown;
pub mod error;
pub mod panels;
pub mod reconcile;
pub mod service;
pub mod tracker;

pub use api::{ApiClient, AssistTask};
pub use bus::{EventBus, Subscription};
pub use config::{ReconnectPolicy, SyncConfig};
pub use connection::{ConnectionManager, ConnectionState, ConnectionStats, Connector, WsConnector};
pub use drilldown::ViewStack;
pub use error::{ApiError, ConfigError, ConnectionError, PanelError, ServiceError, TrackerError};
pub use reconcile::{Entity, EntityStore, LogRing, MergeOutcome, MergePolicy, Tracked};
pub use service::SyncService;
pub use tracker::{Ack, FailureKind, OpFailure, OpState, OperationFlow, OperationTracker, Outcome};

/// Panel state is only ever held for a single synchronous transition, so a
/// poisoned lock still guards consistent data.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

use crate::api::ApiClient;
use crate::bus::EventBus;
use crate::config::SyncConfig;
use crate::connection::{ConnectionManager, ConnectionState, Connector, WsConnector};
use crate::error::ServiceError;
use std::sync::Arc;
use tokio::sync::watch;

/// The one synchronization service of a console process. Built by the
/// application root and lent to every panel.
pub struct SyncService {
    config: SyncConfig,
    bus: EventBus,
    connection: ConnectionManager,
    api: ApiClient,
}

impl SyncService {
    pub fn new(config: SyncConfig) -> Result<Self, ServiceError> {
        Self::with_connector(config, Arc::new(WsConnector))
    }

    pub fn with_connector(
        config: SyncConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ServiceError> {
        let api = ApiClient::new(config.api_base()?, config.request_timeout)?;
        let bus = EventBus::new();
        let connection = ConnectionManager::new(config.clone(), bus.clone(), connector);
        Ok(Self {
            config,
            bus,
            connection,
            api,
        })
    }

    /// Opens the push channel as the configured client. Idempotent.
    pub fn connect(&self) -> bool {
        self.connection.connect(&self.config.client_id)
    }

    pub fn connect_as(&self, client_id: &str) -> bool {
        self.connection.connect(client_id)
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn connection(&self) -> &ConnectionManager {
        &self.connection
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.connection.watch_state()
    }

    pub fn shutdown(&self) {
        self.connection.shutdown();
    }
}

//! Application state management

use std::sync::Arc;

use crate::config::Config;
use crate::service::SyncService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    service: SyncService,
}

impl AppState {
    pub fn new(config: Config, service: SyncService) -> Self {
        Self {
            inner: Arc::new(AppStateInner { config, service }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the sync service
    pub fn service(&self) -> &SyncService {
        &self.inner.service
    }
}

//! # Application State
//!
//! Shared state handed to every handler through Axum's `State` extractor.
//! All lifecycle behavior lives in [`LifecycleService`]; the state only
//! bundles it with the configuration the transport needs.

use std::sync::Arc;

use stayguard_core::JurisdictionRuleTable;

use crate::config::AppConfig;
use crate::service::LifecycleService;
use crate::store::MemoryStore;

#[derive(Debug, Clone)]
pub struct AppState {
    pub service: LifecycleService,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(service: LifecycleService, config: AppConfig) -> Self {
        Self {
            service,
            config: Arc::new(config),
        }
    }

    /// In-memory state with the seeded rule table and default configuration.
    pub fn in_memory() -> Self {
        let service = LifecycleService::new(
            Arc::new(MemoryStore::new()),
            Arc::new(JurisdictionRuleTable::seeded()),
        );
        Self::new(service, AppConfig::default())
    }
}

//! Application state management

use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::db;
use crate::error::Result;
use crate::sync::{
    AccessPolicy, HandlerOptions, MemoryStateStore, SqliteStateStore, StateStore, SyncHandler,
};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    sync: SyncHandler,
}

impl AppState {
    /// Create application state, opening the configured state store
    pub async fn new(config: Config) -> Result<Self> {
        let store: Arc<dyn StateStore> = match config.store.backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory state store");
                Arc::new(MemoryStateStore::new())
            }
            StoreBackend::Sqlite => {
                let pool = db::create_pool(&config.store.database_url).await?;
                let store = SqliteStateStore::new(pool);
                store.init().await?;
                tracing::info!("State store initialized at {}", config.store.database_url);
                Arc::new(store)
            }
        };

        Ok(Self::with_store(&config, store))
    }

    /// Create application state around an existing store
    pub fn with_store(config: &Config, store: Arc<dyn StateStore>) -> Self {
        let options = HandlerOptions {
            max_cas_retries: config.sync.max_cas_retries,
            max_batch_items: config.sync.max_batch_items,
            history_capacity: config.sync.history_capacity,
        };
        let sync = SyncHandler::new(store, AccessPolicy::default(), options);

        Self {
            inner: Arc::new(AppStateInner { sync }),
        }
    }

    /// Get the sync handler
    pub fn sync(&self) -> &SyncHandler {
        &self.inner.sync
    }
}

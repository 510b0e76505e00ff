//! Application state.

use std::sync::Arc;

use framefan_coordinator::{CoordinatorConfig, ProgressAggregator, RenderDispatcher};
use framefan_storage::{ObjectStore, S3Client};

use crate::config::ApiConfig;
use crate::hooks::LoggingHook;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub store: Arc<dyn ObjectStore>,
    pub dispatcher: RenderDispatcher,
}

impl AppState {
    /// Create new application state from the environment.
    pub async fn new(config: ApiConfig) -> Result<Self, Box<dyn std::error::Error>> {
        let store: Arc<dyn ObjectStore> = Arc::new(S3Client::from_env()?);
        let dispatcher = RenderDispatcher::from_config(CoordinatorConfig::from_env(), Arc::clone(&store))?
            .with_hook(Arc::new(LoggingHook));

        Ok(Self::with_parts(config, store, dispatcher))
    }

    /// Assemble state from already-built parts.
    pub fn with_parts(
        config: ApiConfig,
        store: Arc<dyn ObjectStore>,
        dispatcher: RenderDispatcher,
    ) -> Self {
        Self {
            config,
            store,
            dispatcher,
        }
    }

    pub fn aggregator(&self) -> &ProgressAggregator {
        self.dispatcher.aggregator()
    }
}

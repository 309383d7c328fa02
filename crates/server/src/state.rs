//! Application state shared across handlers.

use picvault_cache::CacheController;
use picvault_core::ImageId;
use picvault_core::config::AppConfig;
use std::sync::Arc;

/// Application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub cache: CacheController,
}

impl AppState {
    pub fn new(config: AppConfig, cache: CacheController) -> Self {
        Self {
            config: Arc::new(config),
            cache,
        }
    }

    /// URL at which an image is served.
    pub fn image_url(&self, id: &ImageId) -> String {
        match &self.config.server.public_base_url {
            Some(base) => format!("{}/images/{id}", base.trim_end_matches('/')),
            None => format!("/images/{id}"),
        }
    }
}

//! Application state for diagnostics service.

use std::sync::Arc;

use common::config::AppConfig;

use crate::service::DiagnosticsService;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<DiagnosticsService>,
}

impl AppState {
    /// Creates a new application state.
    pub fn new(config: AppConfig, service: DiagnosticsService) -> Self {
        Self {
            config,
            service: Arc::new(service),
        }
    }
}

// crates/server/src/state.rs
//! Application state for the Axum server.

use std::sync::Arc;
use std::time::Instant;

use async_report_jobs::Registry;

use crate::config::ManagerConfig;
use crate::session::{HeaderSessionResolver, SessionResolver};

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// The one job registry for this process.
    pub registry: Arc<Registry>,
    /// Maps requests to the principal that owns their jobs.
    pub sessions: Arc<dyn SessionResolver>,
    /// Settings advertised to clients at `/api/jobs/config`.
    pub manager: ManagerConfig,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    ///
    /// Sessions are resolved from the `x-session-id` header.
    pub fn new(registry: Arc<Registry>, manager: ManagerConfig) -> Arc<Self> {
        Self::with_sessions(registry, manager, Arc::new(HeaderSessionResolver))
    }

    /// Create with a custom session resolver.
    pub fn with_sessions(
        registry: Arc<Registry>,
        manager: ManagerConfig,
        sessions: Arc<dyn SessionResolver>,
    ) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            registry,
            sessions,
            manager,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_report_jobs::testing::ScriptedRenderer;
    use async_report_jobs::RegistryConfig;

    fn test_state() -> Arc<AppState> {
        let registry = Registry::new(
            Arc::new(ScriptedRenderer::new("text/csv", vec![])),
            RegistryConfig::default(),
        );
        AppState::new(Arc::new(registry), ManagerConfig::default())
    }

    #[test]
    fn test_app_state_new() {
        let state = test_state();
        assert!(state.uptime_secs() < 1);
        assert!(state.registry.is_empty());
    }

    #[test]
    fn test_app_state_clone_shares_registry() {
        let state = test_state();
        let cloned = state.clone();
        assert!(Arc::ptr_eq(&state.registry, &cloned.registry));
    }
}

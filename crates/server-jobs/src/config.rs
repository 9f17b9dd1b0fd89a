// crates/server-jobs/src/config.rs
//! Registry configuration.

use std::time::Duration;

use crate::content::StagingMode;

/// Default grace period a consumed or canceled job stays visible to pollers.
pub const DEFAULT_RETIRED_TTL: Duration = Duration::from_secs(5 * 60);

/// Default age after which a job nobody collected is reclaimed.
pub const DEFAULT_ABANDONED_TTL: Duration = Duration::from_secs(2 * 60 * 60);

/// Default hard cap on live registry entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Tunables for a [`Registry`](crate::Registry) instance.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Whether scheduled jobs exist and their output location can be
    /// changed. When off, schedule requests are acknowledged but jobs
    /// finish normally.
    pub scheduling_location_enabled: bool,
    /// Upper bound on renders running at once. `None` runs every job
    /// immediately.
    pub max_concurrent_renders: Option<usize>,
    pub staging: StagingMode,
    /// Largest output a single job may stage.
    pub max_content_bytes: Option<u64>,
    pub retired_ttl: Duration,
    pub abandoned_ttl: Duration,
    pub max_entries: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            scheduling_location_enabled: false,
            max_concurrent_renders: None,
            staging: StagingMode::Memory,
            max_content_bytes: None,
            retired_ttl: DEFAULT_RETIRED_TTL,
            abandoned_ttl: DEFAULT_ABANDONED_TTL,
            max_entries: DEFAULT_MAX_ENTRIES,
        }
    }
}

impl RegistryConfig {
    pub fn with_scheduling_location(mut self, enabled: bool) -> Self {
        self.scheduling_location_enabled = enabled;
        self
    }

    pub fn with_max_concurrent_renders(mut self, limit: usize) -> Self {
        self.max_concurrent_renders = Some(limit.max(1));
        self
    }

    pub fn with_staging(mut self, staging: StagingMode) -> Self {
        self.staging = staging;
        self
    }

    pub fn with_max_content_bytes(mut self, limit: u64) -> Self {
        self.max_content_bytes = Some(limit);
        self
    }

    pub fn with_retired_ttl(mut self, ttl: Duration) -> Self {
        self.retired_ttl = ttl;
        self
    }

    pub fn with_abandoned_ttl(mut self, ttl: Duration) -> Self {
        self.abandoned_ttl = ttl;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }
}

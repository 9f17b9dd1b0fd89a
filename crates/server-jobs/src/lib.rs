// crates/server-jobs/src/lib.rs
//! Asynchronous report job system.
//!
//! Provides:
//! - `Registry`: concurrent store of outstanding jobs; submit, query, cancel,
//!   retrieve content, relocate scheduled output
//! - `JobState`: immutable point-in-time snapshot of one job
//! - `TaskHandle`: cancellable, awaitable handle bound to a job
//! - `StreamingContent`: single-consumption handle to rendered output
//! - `ReportRenderer`: the rendering engine seam invoked by each task

pub mod config;
pub mod content;
pub mod id;
pub mod registry;
pub mod render;
pub mod session;
pub mod state;
pub mod task;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use config::RegistryConfig;
pub use content::{ContentStream, StagingError, StagingMode, StagingSink, StreamingContent};
pub use id::{JobId, JobIdError};
pub use registry::{ContentPoll, Registry, RegistryError, ScheduledLocation};
pub use render::{ProgressReporter, RenderError, RenderRequest, ReportRenderer};
pub use session::Session;
pub use state::{JobState, JobStatus};
pub use task::TaskHandle;

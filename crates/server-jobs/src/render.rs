// crates/server-jobs/src/render.rs
//! The rendering engine seam.
//!
//! The registry knows nothing about report formats. Each task calls a
//! [`ReportRenderer`] with the request, a [`ProgressReporter`] for publishing
//! progress, and a [`StagingSink`] to write output into.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::content::{StagingError, StagingSink};
use crate::state::{JobState, StateCell};

/// What to render: the report's resource path and its parameters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderRequest {
    pub path: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, String>,
}

impl RenderRequest {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }
}

/// Errors a render can end with. Recorded as the job's `errorMessage`.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("{0}")]
    Engine(String),

    #[error(transparent)]
    Staging(#[from] StagingError),
}

impl RenderError {
    pub fn engine(message: impl Into<String>) -> Self {
        Self::Engine(message.into())
    }
}

/// A report rendering engine.
#[async_trait]
pub trait ReportRenderer: Send + Sync + 'static {
    /// Output MIME type for `request`, published when rendering starts.
    fn mime_type(&self, request: &RenderRequest) -> String;

    /// Render `request` into `sink`, reporting progress as work proceeds.
    ///
    /// The future is dropped when the job is canceled; engines need no
    /// cancellation checks of their own beyond reaching `.await` points.
    async fn render(
        &self,
        request: &RenderRequest,
        reporter: &ProgressReporter,
        sink: &mut StagingSink,
    ) -> Result<(), RenderError>;
}

/// Publishes progress snapshots for one job.
///
/// Every call builds a fresh snapshot from the current one; calls made after
/// the job left WORKING are ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    cell: Arc<StateCell>,
    requested_page: Arc<AtomicU32>,
}

impl ProgressReporter {
    pub(crate) fn new(cell: Arc<StateCell>, requested_page: Arc<AtomicU32>) -> Self {
        Self {
            cell,
            requested_page,
        }
    }

    /// Percent complete, clamped to 100. Lower values than already
    /// published are ignored.
    pub fn set_progress(&self, percent: u8) {
        self.cell.update(|s| s.progress = Some(percent));
    }

    pub fn set_page(&self, page: u32, total_pages: u32) {
        self.cell.update(|s| {
            s.page = page;
            s.total_pages = total_pages;
        });
    }

    /// Highest page fully generated so far.
    pub fn set_generated_page(&self, page: u32) {
        self.cell.update(|s| s.generated_page = page);
    }

    pub fn set_rows(&self, row: u64, total_rows: u64) {
        self.cell.update(|s| {
            s.row = row;
            s.total_rows = total_rows;
        });
    }

    pub fn set_activity(&self, activity: impl Into<String>) {
        let activity = activity.into();
        self.cell.update(|s| s.activity = Some(activity));
    }

    /// Page most recently requested by the client (0 if none).
    pub fn requested_page(&self) -> u32 {
        self.requested_page.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Arc<JobState> {
        self.cell.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::JobId;
    use crate::state::JobStatus;

    fn reporter() -> (Arc<StateCell>, ProgressReporter) {
        let cell = Arc::new(StateCell::new(JobState::queued(JobId::new(), "/r.prpt")));
        let reporter = ProgressReporter::new(Arc::clone(&cell), Arc::new(AtomicU32::new(0)));
        (cell, reporter)
    }

    #[test]
    fn test_reporter_publishes_while_working() {
        let (cell, reporter) = reporter();
        cell.start("text/csv".to_string());

        reporter.set_progress(25);
        reporter.set_page(2, 9);
        reporter.set_rows(50, 200);
        reporter.set_activity("Paginating");

        let snap = reporter.snapshot();
        assert_eq!(snap.status, JobStatus::Working);
        assert_eq!(snap.progress, Some(25));
        assert_eq!((snap.page, snap.total_pages), (2, 9));
        assert_eq!((snap.row, snap.total_rows), (50, 200));
        assert_eq!(snap.activity.as_deref(), Some("Paginating"));
    }

    #[test]
    fn test_reporter_ignored_before_start() {
        let (_cell, reporter) = reporter();
        reporter.set_progress(80);
        assert_eq!(reporter.snapshot().progress, None);
        assert_eq!(reporter.snapshot().status, JobStatus::Queued);
    }

    #[test]
    fn test_render_request_parameters() {
        let request = RenderRequest::new("/public/steel-wheels/sales.prpt")
            .with_parameter("output-target", "table/csv;page-mode=stream")
            .with_parameter("region", "EMEA");
        assert_eq!(request.parameter("region"), Some("EMEA"));
        assert_eq!(request.parameter("missing"), None);

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["path"], "/public/steel-wheels/sales.prpt");
        assert_eq!(json["parameters"]["region"], "EMEA");
    }

    #[test]
    fn test_render_request_parameters_default_when_absent() {
        let request: RenderRequest = serde_json::from_str(r#"{"path":"/a.prpt"}"#).unwrap();
        assert!(request.parameters.is_empty());
    }
}

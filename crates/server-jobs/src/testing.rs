// crates/server-jobs/src/testing.rs
//! Deterministic renderer for tests.
//!
//! [`ScriptedRenderer`] plays back a fixed list of [`Step`]s for every job.
//! Tests drive it through a shared [`Gate`] so progress can be observed at
//! exact points without sleeping.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;

use crate::content::StagingSink;
use crate::render::{ProgressReporter, RenderError, RenderRequest, ReportRenderer};

/// One scripted action.
#[derive(Debug, Clone)]
pub enum Step {
    Progress(u8),
    Page { page: u32, total: u32 },
    Rows { row: u64, total: u64 },
    Activity(String),
    Write(Vec<u8>),
    /// Block until the test calls [`Gate::release`].
    WaitForRelease,
    Sleep(Duration),
    /// Publish the page last passed to `request_page` as the current page.
    EchoRequestedPage,
    Fail(String),
    Panic,
    /// Never complete; only cancellation ends the job.
    Hold,
}

/// Release valve shared between a test and its renderer.
#[derive(Debug, Clone)]
pub struct Gate {
    permits: Arc<Semaphore>,
}

impl Gate {
    /// Let `n` waiting [`Step::WaitForRelease`] steps proceed.
    pub fn release(&self, n: usize) {
        self.permits.add_permits(n);
    }
}

/// Renderer that replays the same script for every job.
#[derive(Debug, Clone)]
pub struct ScriptedRenderer {
    mime_type: String,
    steps: Vec<Step>,
    gate: Gate,
    interrupted: Arc<AtomicUsize>,
}

impl ScriptedRenderer {
    pub fn new(mime_type: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            mime_type: mime_type.into(),
            steps,
            gate: Gate {
                permits: Arc::new(Semaphore::new(0)),
            },
            interrupted: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn gate(&self) -> Gate {
        self.gate.clone()
    }

    /// Counts renders whose future was dropped before running to completion.
    pub fn interrupted_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.interrupted)
    }
}

struct InterruptGuard {
    counter: Arc<AtomicUsize>,
    armed: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ReportRenderer for ScriptedRenderer {
    fn mime_type(&self, _request: &RenderRequest) -> String {
        self.mime_type.clone()
    }

    async fn render(
        &self,
        _request: &RenderRequest,
        reporter: &ProgressReporter,
        sink: &mut StagingSink,
    ) -> Result<(), RenderError> {
        let mut guard = InterruptGuard {
            counter: Arc::clone(&self.interrupted),
            armed: true,
        };

        for step in &self.steps {
            match step {
                Step::Progress(percent) => reporter.set_progress(*percent),
                Step::Page { page, total } => reporter.set_page(*page, *total),
                Step::Rows { row, total } => reporter.set_rows(*row, *total),
                Step::Activity(activity) => reporter.set_activity(activity.clone()),
                Step::Write(bytes) => sink.write(bytes).await?,
                Step::WaitForRelease => {
                    let permit = self
                        .gate
                        .permits
                        .acquire()
                        .await
                        .map_err(|_| RenderError::engine("gate closed"))?;
                    permit.forget();
                }
                Step::Sleep(duration) => tokio::time::sleep(*duration).await,
                Step::EchoRequestedPage => {
                    let page = reporter.requested_page();
                    let total = reporter.snapshot().total_pages.max(page);
                    reporter.set_page(page, total);
                }
                Step::Fail(message) => {
                    guard.armed = false;
                    return Err(RenderError::engine(message.clone()));
                }
                Step::Panic => {
                    guard.armed = false;
                    panic!("scripted renderer panic");
                }
                Step::Hold => std::future::pending::<()>().await,
            }
        }

        guard.armed = false;
        Ok(())
    }
}

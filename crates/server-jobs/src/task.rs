// crates/server-jobs/src/task.rs
//! The asynchronous unit of work bound to each job.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Instant;

use futures_util::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::content::{StagingMode, StagingSink, StreamingContent};
use crate::id::JobId;
use crate::registry::ScheduledLocation;
use crate::render::{ProgressReporter, RenderError, RenderRequest, ReportRenderer};
use crate::session::Session;
use crate::state::{JobState, JobStatus, StateCell};

/// Where a job's finished output currently is.
pub(crate) enum ContentSlot {
    Empty,
    Ready(StreamingContent),
    Consumed,
}

/// Everything the registry keeps per job.
pub(crate) struct JobEntry {
    pub(crate) id: JobId,
    pub(crate) owner: Session,
    pub(crate) created_at: Instant,
    pub(crate) cell: Arc<StateCell>,
    pub(crate) cancel: CancellationToken,
    pub(crate) content: Mutex<ContentSlot>,
    pub(crate) requested_page: Arc<AtomicU32>,
    pub(crate) schedule_requested: AtomicBool,
    pub(crate) location: Mutex<Option<ScheduledLocation>>,
    /// Set when the caller collected the output or canceled the job.
    pub(crate) retired_at: OnceLock<Instant>,
}

impl JobEntry {
    pub(crate) fn new(id: JobId, owner: Session, path: &str) -> Self {
        Self {
            id,
            owner,
            created_at: Instant::now(),
            cell: Arc::new(StateCell::new(JobState::queued(id, path))),
            cancel: CancellationToken::new(),
            content: Mutex::new(ContentSlot::Empty),
            requested_page: Arc::new(AtomicU32::new(0)),
            schedule_requested: AtomicBool::new(false),
            location: Mutex::new(None),
            retired_at: OnceLock::new(),
        }
    }

    pub(crate) fn status(&self) -> JobStatus {
        self.cell.current().status
    }

    pub(crate) fn content_slot(&self) -> MutexGuard<'_, ContentSlot> {
        self.content.lock().unwrap_or_else(|poisoned| {
            tracing::error!(job_id = %self.id, "Content lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn location_slot(&self) -> MutexGuard<'_, Option<ScheduledLocation>> {
        self.location.lock().unwrap_or_else(|poisoned| {
            tracing::error!(job_id = %self.id, "Location lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub(crate) fn retire(&self) {
        let _ = self.retired_at.set(Instant::now());
    }

    /// Request cancellation. Only the call that moves the job to CANCELED
    /// fires the token; later calls and calls on terminal jobs are no-ops.
    pub(crate) fn request_cancel(&self) -> bool {
        if !self.cell.cancel() {
            return false;
        }
        self.cancel.cancel();
        *self.content_slot() = ContentSlot::Empty;
        self.retire();
        true
    }

    /// Stage `content` and publish the final status.
    ///
    /// Content is staged before the status flips so a poller that sees
    /// FINISHED always finds it. If a cancel won the race, the staged
    /// output is dropped.
    fn complete(&self, content: StreamingContent, scheduling_enabled: bool) -> bool {
        let location = ScheduledLocation::default_for(&self.cell.current().path);
        *self.content_slot() = ContentSlot::Ready(content);

        let schedule_requested = &self.schedule_requested;
        let published = self
            .cell
            .finish(|| scheduling_enabled && schedule_requested.load(Ordering::Acquire));

        if !published {
            *self.content_slot() = ContentSlot::Empty;
            return false;
        }
        if self.status() == JobStatus::Scheduled {
            self.location_slot().get_or_insert(location);
        }
        true
    }
}

/// Settings a task needs from its registry.
#[derive(Clone)]
pub(crate) struct RunContext {
    pub(crate) permits: Option<Arc<Semaphore>>,
    pub(crate) staging: StagingMode,
    pub(crate) max_content_bytes: Option<u64>,
    pub(crate) scheduling_enabled: bool,
}

/// Body of the spawned task: wait for a worker slot, render, stage, publish.
pub(crate) async fn run(
    entry: Arc<JobEntry>,
    renderer: Arc<dyn ReportRenderer>,
    request: RenderRequest,
    ctx: RunContext,
) {
    let _permit = match ctx.permits {
        Some(permits) => {
            tokio::select! {
                biased;
                _ = entry.cancel.cancelled() => {
                    tracing::debug!(job_id = %entry.id, "Canceled while queued");
                    return;
                }
                permit = permits.acquire_owned() => match permit {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        entry.cell.fail("executor is shutting down".to_string());
                        return;
                    }
                },
            }
        }
        None => None,
    };

    let mime_type = renderer.mime_type(&request);
    if !entry.cell.start(mime_type.clone()) {
        return;
    }
    tracing::debug!(job_id = %entry.id, mime_type = %mime_type, "Render started");

    let reporter = ProgressReporter::new(Arc::clone(&entry.cell), Arc::clone(&entry.requested_page));
    let work = async {
        let mut sink = StagingSink::open(ctx.staging, ctx.max_content_bytes).await?;
        renderer.render(&request, &reporter, &mut sink).await?;
        Ok::<_, RenderError>(sink.finish(mime_type).await?)
    };

    let outcome = tokio::select! {
        biased;
        _ = entry.cancel.cancelled() => None,
        result = AssertUnwindSafe(work).catch_unwind() => Some(result),
    };

    match outcome {
        None => tracing::debug!(job_id = %entry.id, "Render interrupted by cancellation"),
        Some(Ok(Ok(content))) => {
            let size = content.size();
            if entry.complete(content, ctx.scheduling_enabled) {
                tracing::info!(
                    job_id = %entry.id,
                    status = %entry.status(),
                    bytes = size,
                    "Render complete"
                );
            }
        }
        Some(Ok(Err(e))) => {
            if entry.cell.fail(e.to_string()) {
                tracing::warn!(job_id = %entry.id, error = %e, "Render failed");
            }
        }
        Some(Err(_panic)) => {
            if entry.cell.fail("renderer panicked".to_string()) {
                tracing::error!(job_id = %entry.id, "Renderer panicked");
            }
        }
    }
}

/// Cancellable, awaitable handle bound to one job.
///
/// Cloning is cheap; all clones refer to the same job.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) entry: Arc<JobEntry>,
}

impl TaskHandle {
    pub fn id(&self) -> JobId {
        self.entry.id
    }

    /// Latest snapshot, without waiting.
    pub fn snapshot(&self) -> Arc<JobState> {
        self.entry.cell.current()
    }

    pub fn is_done(&self) -> bool {
        self.snapshot().status.is_terminal()
    }

    /// Interrupt in-progress work. Returns `true` if this call canceled the
    /// job, `false` if it had already finished, failed or been canceled.
    pub fn cancel(&self) -> bool {
        let canceled = self.entry.request_cancel();
        if canceled {
            tracing::info!(job_id = %self.entry.id, "Job canceled");
        }
        canceled
    }

    /// Subscribe to snapshot changes.
    pub fn watch(&self) -> watch::Receiver<Arc<JobState>> {
        self.entry.cell.subscribe()
    }

    /// Wait until the job reaches a terminal status and return that snapshot.
    pub async fn wait(&self) -> Arc<JobState> {
        let mut rx = self.watch();
        // The sender lives in the entry we hold, so the error arm only
        // falls back to the last value.
        let terminal = match rx.wait_for(|s| s.status.is_terminal()).await {
            Ok(snapshot) => Arc::clone(&snapshot),
            Err(_) => self.snapshot(),
        };
        terminal
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("job_id", &self.entry.id)
            .field("status", &self.entry.status())
            .finish()
    }
}

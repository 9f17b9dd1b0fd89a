// crates/server-jobs/src/state.rs
//! Job status and immutable state snapshots.
//!
//! A job's state lives in a [`StateCell`]: a single slot holding an
//! `Arc<JobState>`. Writers never mutate a published snapshot; they build a
//! new one and swap it in. Readers clone the `Arc` and are never blocked by
//! the render in progress.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::id::JobId;

/// Execution status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Queued,
    Working,
    /// Output is held for a scheduled destination instead of being streamed.
    Scheduled,
    Finished,
    Failed,
    Canceled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Working => "WORKING",
            Self::Scheduled => "SCHEDULED",
            Self::Finished => "FINISHED",
            Self::Failed => "FAILED",
            Self::Canceled => "CANCELED",
        }
    }

    /// True once the job can no longer make progress.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Scheduled | Self::Finished | Self::Failed | Self::Canceled
        )
    }

    /// Allowed edges of the status machine.
    ///
    /// The only edge leaving a terminal status is FINISHED -> SCHEDULED,
    /// taken when a finished, unconsumed job is scheduled.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Working | Failed | Canceled)
                | (Working, Finished | Scheduled | Failed | Canceled)
                | (Finished, Scheduled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time description of one job. Never mutated once published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobState {
    pub id: JobId,
    /// Logical resource path of the report being generated.
    pub path: String,
    pub status: JobStatus,
    /// Percent complete; `None` while unknown.
    pub progress: Option<u8>,
    pub page: u32,
    pub total_pages: u32,
    pub generated_page: u32,
    pub row: u64,
    pub total_rows: u64,
    pub activity: Option<String>,
    pub mime_type: Option<String>,
    /// Present only when `status` is FAILED.
    pub error_message: Option<String>,
}

impl JobState {
    pub fn queued(id: JobId, path: impl Into<String>) -> Self {
        Self {
            id,
            path: path.into(),
            status: JobStatus::Queued,
            progress: None,
            page: 0,
            total_pages: 0,
            generated_page: 0,
            row: 0,
            total_rows: 0,
            activity: None,
            mime_type: None,
            error_message: None,
        }
    }
}

/// Atomically replaceable snapshot slot for a single job.
///
/// Backed by a `watch` channel so pollers can read the latest snapshot
/// without waiting and subscribers can await changes. Every transition runs
/// its check-and-swap under the channel's write lock, so two racing
/// transitions are linearized and the loser observes the winner's snapshot.
pub(crate) struct StateCell {
    tx: watch::Sender<Arc<JobState>>,
}

impl StateCell {
    pub(crate) fn new(initial: JobState) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(initial));
        Self { tx }
    }

    /// Latest published snapshot.
    pub(crate) fn current(&self) -> Arc<JobState> {
        Arc::clone(&self.tx.borrow())
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<Arc<JobState>> {
        self.tx.subscribe()
    }

    /// Derive and publish a new snapshot from the current one.
    ///
    /// `derive` returns `None` to leave the cell untouched. Returns whether a
    /// new snapshot was published.
    pub(crate) fn publish(&self, derive: impl FnOnce(&JobState) -> Option<JobState>) -> bool {
        self.tx.send_if_modified(|current| match derive(&**current) {
            Some(next) => {
                *current = Arc::new(next);
                true
            }
            None => false,
        })
    }

    /// Move to `next` if the status machine allows it, applying `edit` to the
    /// new snapshot.
    pub(crate) fn transition(&self, next: JobStatus, edit: impl FnOnce(&mut JobState)) -> bool {
        self.publish(|current| {
            if !current.status.can_transition_to(next) {
                return None;
            }
            let mut snapshot = current.clone();
            snapshot.status = next;
            edit(&mut snapshot);
            Some(snapshot)
        })
    }

    /// Apply a progress edit while the job is WORKING.
    ///
    /// Progress never moves backwards: a lower percentage than the one
    /// already published is ignored.
    pub(crate) fn update(&self, edit: impl FnOnce(&mut JobState)) -> bool {
        self.publish(|current| {
            if current.status != JobStatus::Working {
                return None;
            }
            let mut snapshot = current.clone();
            edit(&mut snapshot);
            snapshot.status = JobStatus::Working;
            snapshot.progress = match (current.progress, snapshot.progress) {
                (Some(prev), Some(next)) => Some(prev.max(next.min(100))),
                (Some(prev), None) => Some(prev),
                (None, next) => next.map(|p| p.min(100)),
            };
            (snapshot != *current).then_some(snapshot)
        })
    }

    pub(crate) fn start(&self, mime_type: String) -> bool {
        self.transition(JobStatus::Working, |s| {
            s.progress = Some(0);
            s.mime_type = Some(mime_type);
        })
    }

    /// Publish the final status of a successful render.
    ///
    /// `scheduled` is evaluated under the cell's lock, so a concurrent
    /// schedule request is either seen here or sees the finished job.
    pub(crate) fn finish(&self, scheduled: impl FnOnce() -> bool) -> bool {
        self.publish(|current| {
            let next = if scheduled() {
                JobStatus::Scheduled
            } else {
                JobStatus::Finished
            };
            if !current.status.can_transition_to(next) {
                return None;
            }
            let mut snapshot = current.clone();
            snapshot.status = next;
            snapshot.progress = Some(100);
            snapshot.activity = None;
            if snapshot.total_pages > 0 {
                snapshot.generated_page = snapshot.total_pages;
            }
            Some(snapshot)
        })
    }

    pub(crate) fn fail(&self, message: String) -> bool {
        self.transition(JobStatus::Failed, |s| {
            s.activity = None;
            s.error_message = Some(message);
        })
    }

    pub(crate) fn cancel(&self) -> bool {
        self.transition(JobStatus::Canceled, |s| s.activity = None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cell() -> StateCell {
        StateCell::new(JobState::queued(JobId::new(), "/public/report.prpt"))
    }

    #[test]
    fn test_job_state_lifecycle() {
        let cell = cell();

        let snap = cell.current();
        assert_eq!(snap.status, JobStatus::Queued);
        assert_eq!(snap.progress, None);
        assert_eq!(snap.mime_type, None);

        assert!(cell.start("text/csv".to_string()));
        let snap = cell.current();
        assert_eq!(snap.status, JobStatus::Working);
        assert_eq!(snap.progress, Some(0));
        assert_eq!(snap.mime_type.as_deref(), Some("text/csv"));

        assert!(cell.update(|s| {
            s.progress = Some(40);
            s.activity = Some("Generating content".to_string());
            s.row = 120;
            s.total_rows = 300;
        }));
        let snap = cell.current();
        assert_eq!(snap.progress, Some(40));
        assert_eq!(snap.row, 120);

        assert!(cell.finish(|| false));
        let snap = cell.current();
        assert_eq!(snap.status, JobStatus::Finished);
        assert_eq!(snap.progress, Some(100));
        assert_eq!(snap.activity, None);
        assert_eq!(snap.error_message, None);
    }

    #[test]
    fn test_published_snapshot_is_never_mutated() {
        let cell = cell();
        cell.start("application/pdf".to_string());
        let before = cell.current();

        cell.update(|s| s.progress = Some(50));

        assert_eq!(before.progress, Some(0));
        assert_eq!(cell.current().progress, Some(50));
    }

    #[test]
    fn test_progress_never_decreases() {
        let cell = cell();
        cell.start("text/html".to_string());
        cell.update(|s| s.progress = Some(60));
        assert!(!cell.update(|s| s.progress = Some(20)));
        assert_eq!(cell.current().progress, Some(60));

        cell.update(|s| s.progress = Some(250));
        assert_eq!(cell.current().progress, Some(100));
    }

    #[test]
    fn test_updates_ignored_outside_working() {
        let cell = cell();
        assert!(!cell.update(|s| s.progress = Some(10)));

        cell.start("text/csv".to_string());
        cell.finish(|| false);
        assert!(!cell.update(|s| s.activity = Some("late".to_string())));
        assert_eq!(cell.current().activity, None);
    }

    #[test]
    fn test_terminal_status_is_sticky() {
        let cell = cell();
        cell.start("text/csv".to_string());
        assert!(cell.cancel());

        assert!(!cell.finish(|| false));
        assert!(!cell.fail("boom".to_string()));
        assert!(!cell.start("text/csv".to_string()));
        assert!(!cell.cancel());
        assert_eq!(cell.current().status, JobStatus::Canceled);
    }

    #[test]
    fn test_failure_records_message() {
        let cell = cell();
        cell.start("text/csv".to_string());
        assert!(cell.fail("Connection timeout".to_string()));
        let snap = cell.current();
        assert_eq!(snap.status, JobStatus::Failed);
        assert_eq!(snap.error_message.as_deref(), Some("Connection timeout"));
    }

    #[test]
    fn test_finished_may_become_scheduled() {
        let cell = cell();
        cell.start("text/csv".to_string());
        cell.finish(|| false);
        assert!(cell.transition(JobStatus::Scheduled, |_| {}));
        assert!(!cell.transition(JobStatus::Finished, |_| {}));
    }

    #[test]
    fn test_status_machine_edges() {
        use JobStatus::*;
        assert!(Queued.can_transition_to(Working));
        assert!(Queued.can_transition_to(Canceled));
        assert!(!Queued.can_transition_to(Finished));
        assert!(Working.can_transition_to(Scheduled));
        assert!(!Failed.can_transition_to(Working));
        assert!(!Canceled.can_transition_to(Finished));
        assert!(!Scheduled.can_transition_to(Finished));
        assert!(Scheduled.is_terminal());
        assert!(!Working.is_terminal());
    }

    #[tokio::test]
    async fn test_subscribers_observe_swaps() {
        let cell = cell();
        let mut rx = cell.subscribe();

        cell.start("text/csv".to_string());

        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().status, JobStatus::Working);
    }

    #[test]
    fn test_terminal_wait_stays_pending_while_working() {
        use tokio_test::{assert_pending, assert_ready, task};

        let cell = cell();
        let mut rx = cell.subscribe();
        let mut wait = task::spawn(async move {
            rx.wait_for(|s| s.status.is_terminal()).await.ok().map(|s| s.status)
        });

        assert_pending!(wait.poll());
        cell.start("text/csv".to_string());
        cell.update(|s| s.progress = Some(30));
        assert_pending!(wait.poll());

        cell.cancel();
        assert!(wait.is_woken());
        assert_eq!(assert_ready!(wait.poll()), Some(JobStatus::Canceled));
    }

    #[test]
    fn test_job_state_serialize() {
        let id: JobId = "0b6c0c4e-5d8f-4b0e-9a53-7a3c3f0c2a11".parse().unwrap();
        let mut state = JobState::queued(id, "/home/admin/sales.prpt");
        state.status = JobStatus::Working;
        state.progress = Some(42);
        state.total_pages = 7;
        state.mime_type = Some("application/pdf".to_string());

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"id\":\"0b6c0c4e-5d8f-4b0e-9a53-7a3c3f0c2a11\""));
        assert!(json.contains("\"status\":\"WORKING\""));
        assert!(json.contains("\"progress\":42"));
        assert!(json.contains("\"totalPages\":7"));
        assert!(json.contains("\"mimeType\":\"application/pdf\""));
        assert!(json.contains("\"errorMessage\":null"));
    }
}

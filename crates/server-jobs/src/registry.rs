// crates/server-jobs/src/registry.rs
//! Central registry that owns every outstanding job.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::config::RegistryConfig;
use crate::content::StreamingContent;
use crate::id::JobId;
use crate::render::{RenderRequest, ReportRenderer};
use crate::session::Session;
use crate::state::{JobState, JobStatus};
use crate::task::{self, ContentSlot, JobEntry, RunContext, TaskHandle};

/// Failures reported synchronously to the caller of a registry operation.
///
/// Render failures are not among them: those end the job in FAILED and are
/// read from the snapshot's `errorMessage`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Never registered, already evicted, or owned by another session.
    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("operation not applicable to job {id} in status {status}")]
    NotApplicable { id: JobId, status: JobStatus },

    #[error("scheduling location support is disabled")]
    FeatureDisabled,

    #[error("job {0} was canceled")]
    Canceled(JobId),

    #[error("job {id} failed: {message}")]
    Failed { id: JobId, message: String },

    #[error("content of job {0} was already retrieved")]
    AlreadyConsumed(JobId),
}

/// Non-blocking content poll result.
#[derive(Debug)]
pub enum ContentPoll {
    Ready(StreamingContent),
    /// Not finished yet; ask again later.
    Pending,
}

/// Destination of a scheduled job's output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledLocation {
    /// Repository folder; `None` means the owner's default folder.
    pub folder_id: Option<String>,
    pub name: String,
}

impl ScheduledLocation {
    /// Location used until the owner picks one: the report's base name
    /// without extension, in the default folder.
    pub fn default_for(path: &str) -> Self {
        let base = path.rsplit('/').next().unwrap_or(path);
        let name = match base.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => base,
        };
        Self {
            folder_id: None,
            name: name.to_string(),
        }
    }
}

/// Concurrent store mapping job ids to live jobs.
///
/// Constructed once at startup and shared behind an `Arc`. Lookups clone the
/// entry's `Arc` out of the map, so no map lock is held while a job is read,
/// canceled or drained.
pub struct Registry {
    entries: DashMap<JobId, Arc<JobEntry>>,
    renderer: Arc<dyn ReportRenderer>,
    config: RegistryConfig,
    permits: Option<Arc<Semaphore>>,
}

impl Registry {
    pub fn new(renderer: Arc<dyn ReportRenderer>, config: RegistryConfig) -> Self {
        let permits = config
            .max_concurrent_renders
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            entries: DashMap::new(),
            renderer,
            config,
            permits,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of jobs currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Register a job and start rendering it in the background.
    ///
    /// Returns immediately with the new id; the job starts QUEUED. Must be
    /// called from within a Tokio runtime.
    pub fn submit(&self, request: RenderRequest, session: &Session) -> JobId {
        let (id, entry) = loop {
            let id = JobId::new();
            match self.entries.entry(id) {
                dashmap::mapref::entry::Entry::Occupied(_) => continue,
                dashmap::mapref::entry::Entry::Vacant(slot) => {
                    let entry = Arc::new(JobEntry::new(id, session.clone(), &request.path));
                    slot.insert(Arc::clone(&entry));
                    break (id, entry);
                }
            }
        };

        tracing::info!(
            job_id = %id,
            path = %request.path,
            principal = %session,
            "Job submitted"
        );

        let ctx = RunContext {
            permits: self.permits.clone(),
            staging: self.config.staging,
            max_content_bytes: self.config.max_content_bytes,
            scheduling_enabled: self.config.scheduling_location_enabled,
        };
        tokio::spawn(task::run(entry, Arc::clone(&self.renderer), request, ctx));
        id
    }

    fn lookup(&self, id: &JobId, session: &Session) -> Result<Arc<JobEntry>, RegistryError> {
        let entry = self
            .entries
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or(RegistryError::NotFound(*id))?;
        if entry.owner != *session {
            tracing::debug!(job_id = %id, principal = %session, "Job owned by another session");
            return Err(RegistryError::NotFound(*id));
        }
        Ok(entry)
    }

    /// Current snapshot of a job.
    pub fn get_state(&self, id: &JobId, session: &Session) -> Result<Arc<JobState>, RegistryError> {
        Ok(self.lookup(id, session)?.cell.current())
    }

    /// Handle to the task bound to `id`, for the session that owns it.
    pub fn get_future(&self, id: &JobId, session: &Session) -> Result<TaskHandle, RegistryError> {
        self.lookup(id, session).map(|entry| TaskHandle { entry })
    }

    /// Snapshots of every job owned by `session`, oldest first.
    pub fn list(&self, session: &Session) -> Vec<Arc<JobState>> {
        let mut owned: Vec<Arc<JobEntry>> = self
            .entries
            .iter()
            .filter(|e| e.value().owner == *session)
            .map(|e| Arc::clone(e.value()))
            .collect();
        owned.sort_by_key(|e| e.created_at);
        owned.iter().map(|e| e.cell.current()).collect()
    }

    /// Interrupt a job. Idempotent: returns `Ok(false)` when the job was
    /// already terminal.
    pub fn cancel(&self, id: &JobId, session: &Session) -> Result<bool, RegistryError> {
        Ok(self.get_future(id, session)?.cancel())
    }

    /// Hand over a finished job's output, exactly once.
    pub fn retrieve_content(&self, id: &JobId, session: &Session) -> Result<ContentPoll, RegistryError> {
        let entry = self.lookup(id, session)?;
        let mut slot = entry.content_slot();
        let snapshot = entry.cell.current();
        match snapshot.status {
            JobStatus::Queued | JobStatus::Working => Ok(ContentPoll::Pending),
            JobStatus::Canceled => Err(RegistryError::Canceled(*id)),
            JobStatus::Failed => Err(RegistryError::Failed {
                id: *id,
                message: snapshot.error_message.clone().unwrap_or_default(),
            }),
            JobStatus::Scheduled => Err(RegistryError::NotApplicable {
                id: *id,
                status: JobStatus::Scheduled,
            }),
            JobStatus::Finished => match std::mem::replace(&mut *slot, ContentSlot::Consumed) {
                ContentSlot::Ready(content) => {
                    drop(slot);
                    entry.retire();
                    tracing::info!(job_id = %id, bytes = content.size(), "Content retrieved");
                    Ok(ContentPoll::Ready(content))
                }
                ContentSlot::Consumed | ContentSlot::Empty => {
                    Err(RegistryError::AlreadyConsumed(*id))
                }
            },
        }
    }

    /// Record the page the client wants next. Returns the page unchanged.
    pub fn request_page(&self, id: &JobId, session: &Session, page: u32) -> Result<u32, RegistryError> {
        let entry = self.lookup(id, session)?;
        entry.requested_page.store(page, Ordering::Release);
        tracing::debug!(job_id = %id, page, "Page requested");
        Ok(page)
    }

    /// Mark a job's output for a scheduled destination.
    ///
    /// With scheduling support enabled, a running job will end SCHEDULED and
    /// a finished, uncollected job moves to SCHEDULED now. Without it the
    /// request is only recorded. Returns the job's status afterwards.
    pub fn schedule(&self, id: &JobId, session: &Session) -> Result<JobStatus, RegistryError> {
        let entry = self.lookup(id, session)?;
        let enabled = self.config.scheduling_location_enabled;

        let slot = entry.content_slot();
        let has_output = matches!(*slot, ContentSlot::Ready(_));
        let flag = &entry.schedule_requested;
        let moved = entry.cell.publish(|current| {
            flag.store(true, Ordering::Release);
            if !(enabled && has_output && current.status == JobStatus::Finished) {
                return None;
            }
            let mut snapshot = current.clone();
            snapshot.status = JobStatus::Scheduled;
            Some(snapshot)
        });
        drop(slot);

        let status = entry.status();
        if moved || status == JobStatus::Scheduled {
            entry
                .location_slot()
                .get_or_insert_with(|| ScheduledLocation::default_for(&entry.cell.current().path));
        }
        if !enabled {
            tracing::debug!(job_id = %id, "Schedule requested with scheduling support disabled");
        }
        tracing::info!(job_id = %id, status = %status, "Job scheduled");
        Ok(status)
    }

    /// Relocate a scheduled job's output.
    ///
    /// The status is checked first: FAILED, CANCELED and jobs nobody asked
    /// to schedule answer `NotApplicable` whatever the configuration. With
    /// scheduling support disabled, a job whose schedule request was only
    /// recorded answers `FeatureDisabled`.
    pub fn update_scheduling_location(
        &self,
        id: &JobId,
        session: &Session,
        folder_id: impl Into<String>,
        new_name: Option<String>,
    ) -> Result<ScheduledLocation, RegistryError> {
        let entry = self.lookup(id, session)?;
        let status = entry.status();
        if status != JobStatus::Scheduled {
            let recorded = entry.schedule_requested.load(Ordering::Acquire)
                && matches!(status, JobStatus::Queued | JobStatus::Working | JobStatus::Finished);
            if recorded && !self.config.scheduling_location_enabled {
                return Err(RegistryError::FeatureDisabled);
            }
            return Err(RegistryError::NotApplicable { id: *id, status });
        }
        if !self.config.scheduling_location_enabled {
            return Err(RegistryError::FeatureDisabled);
        }

        let mut location = entry.location_slot();
        let current = location
            .take()
            .unwrap_or_else(|| ScheduledLocation::default_for(&entry.cell.current().path));
        let updated = ScheduledLocation {
            folder_id: Some(folder_id.into()),
            name: new_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or(current.name),
        };
        *location = Some(updated.clone());
        tracing::info!(
            job_id = %id,
            folder_id = ?updated.folder_id,
            name = %updated.name,
            "Scheduling location updated"
        );
        Ok(updated)
    }

    /// Where a scheduled job's output will go.
    pub fn scheduled_location(&self, id: &JobId, session: &Session) -> Result<ScheduledLocation, RegistryError> {
        let entry = self.lookup(id, session)?;
        let status = entry.status();
        if status != JobStatus::Scheduled {
            return Err(RegistryError::NotApplicable { id: *id, status });
        }
        let location = entry
            .location_slot()
            .clone()
            .unwrap_or_else(|| ScheduledLocation::default_for(&entry.cell.current().path));
        Ok(location)
    }

    /// Reclaim jobs nobody will ask about again. Returns how many were removed.
    ///
    /// - retired jobs (collected or canceled) after `retired_ttl`
    /// - any job older than `abandoned_ttl`, canceling it if still running
    /// - the oldest terminal jobs beyond `max_entries`
    pub fn sweep(&self) -> usize {
        let retired_ttl = self.config.retired_ttl;
        let abandoned_ttl = self.config.abandoned_ttl;
        let before = self.entries.len();

        let mut abandoned = Vec::new();
        self.entries.retain(|_, entry| {
            let retired = entry
                .retired_at
                .get()
                .is_some_and(|at| at.elapsed() >= retired_ttl);
            if retired {
                return false;
            }
            if entry.created_at.elapsed() >= abandoned_ttl {
                abandoned.push(Arc::clone(entry));
                return false;
            }
            true
        });

        for entry in &abandoned {
            let status = entry.status();
            if entry.request_cancel() {
                tracing::warn!(job_id = %entry.id, "Evicted abandoned job while still running");
            } else if matches!(status, JobStatus::Finished | JobStatus::Scheduled) {
                tracing::warn!(job_id = %entry.id, status = %status, "Evicted uncollected job output");
            }
        }

        let overflow = self.entries.len().saturating_sub(self.config.max_entries);
        if overflow > 0 {
            let mut terminal: Vec<Arc<JobEntry>> = self
                .entries
                .iter()
                .filter(|e| e.value().status().is_terminal())
                .map(|e| Arc::clone(e.value()))
                .collect();
            terminal.sort_by_key(|e| e.created_at);
            for entry in terminal.into_iter().take(overflow) {
                self.entries.remove(&entry.id);
                tracing::warn!(job_id = %entry.id, "Evicted job over registry capacity");
            }
        }

        let removed = before.saturating_sub(self.entries.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.entries.len(), "Registry sweep");
        }
        removed
    }

    /// Run [`sweep`](Self::sweep) every `interval` until the registry is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let registry = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(registry) = registry.upgrade() else {
                    break;
                };
                registry.sweep();
            }
        })
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("jobs", &self.entries.len())
            .field("config", &self.config)
            .finish()
    }
}

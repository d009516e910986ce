//! Session reclamation.
//!
//! A session's age is the age of its directory's mtime. Each sweep removes
//! every session older than the TTL from disk and from both registries.
//! Sessions are reclaimed independently: one that cannot be removed is
//! logged and reported, and the sweep carries on with the rest.

use crate::config::ServiceConfig;
use crate::error::DocmillError;
use crate::registry::{FileRegistry, TaskRegistry};
use crate::storage::{dir_size, SessionEntry, Storage};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

const HOUR: u64 = 60 * 60;

/// Sweeper settings.
#[derive(Debug, Clone)]
pub struct CleanupConfig {
    /// Sessions older than this are reclaimed. Default: 24 h.
    pub ttl: Duration,
    /// Pause between scheduled sweeps. Default: 1 h.
    pub interval: Duration,
    /// Default budget for [`CleanupService::check_quota`]. Default: 100 GiB.
    pub quota: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self::from(&ServiceConfig::default())
    }
}

impl From<&ServiceConfig> for CleanupConfig {
    fn from(config: &ServiceConfig) -> Self {
        Self {
            ttl: config.session_ttl,
            interval: config.cleanup_interval,
            quota: config.disk_quota,
        }
    }
}

/// A session the sweep could not reclaim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepFailure {
    /// `None` when the data root itself could not be listed.
    pub session_id: Option<String>,
    pub error: String,
}

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Session directories looked at.
    pub scanned: usize,
    pub expired_sessions: Vec<String>,
    /// File records dropped from the registry.
    pub deleted_files: usize,
    pub freed_bytes: u64,
    pub failures: Vec<SweepFailure>,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct CleanupService {
    storage: Storage,
    files: Arc<FileRegistry>,
    tasks: Arc<TaskRegistry>,
    config: CleanupConfig,
    scheduler: Mutex<Option<JoinHandle<()>>>,
}

impl CleanupService {
    pub fn new(
        storage: Storage,
        files: Arc<FileRegistry>,
        tasks: Arc<TaskRegistry>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            storage,
            files,
            tasks,
            config,
            scheduler: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CleanupConfig {
        &self.config
    }

    // ── Scheduling ───────────────────────────────────────────────────────

    /// Sweep now, then every `interval`, on a background tokio task.
    ///
    /// Returns `false` (and does nothing) if the scheduler is already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut scheduler = self.scheduler();
        if scheduler.as_ref().is_some_and(|h| !h.is_finished()) {
            warn!(event = "cleanup.start.already_running", "cleanup scheduler already running");
            return false;
        }

        info!(event = "cleanup.start", ttl_secs = self.config.ttl.as_secs(), interval_secs = self.config.interval.as_secs(), "starting cleanup scheduler");
        // The loop only holds the service while a sweep runs, so dropping
        // the last owner ends the schedule through `Drop`.
        let this = Arc::downgrade(self);
        let period = self.config.interval.max(Duration::from_millis(1));
        *scheduler = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(service) = this.upgrade() else {
                    break;
                };
                service.run_sweep().await;
            }
        }));
        true
    }

    /// Stop the scheduler. Returns whether one was running.
    pub fn stop(&self) -> bool {
        match self.scheduler().take() {
            Some(handle) => {
                handle.abort();
                info!(event = "cleanup.stop", "cleanup scheduler stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.scheduler().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Manual sweep, outside the schedule.
    pub async fn trigger(&self) -> SweepReport {
        info!(event = "cleanup.manual", "manual cleanup triggered");
        self.run_sweep().await
    }

    // ── Sweeping ─────────────────────────────────────────────────────────

    pub async fn run_sweep(&self) -> SweepReport {
        self.run_sweep_at(SystemTime::now()).await
    }

    /// One sweep, judging session age against `now`.
    pub async fn run_sweep_at(&self, now: SystemTime) -> SweepReport {
        let started = Instant::now();
        let mut report = SweepReport::default();
        info!(event = "cleanup.run.start", "running cleanup process");

        let listing = match self.storage.list_sessions().await {
            Ok(listing) => listing,
            Err(e) => {
                error!(event = "cleanup.run.failed", error = %e, "cleanup process failed");
                report.failures.push(SweepFailure {
                    session_id: None,
                    error: e.to_string(),
                });
                return report;
            }
        };

        for (session_id, e) in listing.unreadable {
            report.scanned += 1;
            error!(event = "cleanup.session.failed", session_id = %session_id, error = %e, "failed to inspect session");
            report.failures.push(SweepFailure {
                session_id: Some(session_id),
                error: e.to_string(),
            });
        }

        for session in listing.sessions {
            report.scanned += 1;
            let age = now.duration_since(session.modified).unwrap_or_default();
            if age <= self.config.ttl {
                continue;
            }

            info!(event = "cleanup.session.expired", session_id = %session.session_id, age_hours = age.as_secs() / HOUR, ttl_hours = self.config.ttl.as_secs() / HOUR, "session expired, cleaning up");
            match self.reclaim(&session).await {
                Ok((files, bytes)) => {
                    report.deleted_files += files;
                    report.freed_bytes += bytes;
                    info!(event = "cleanup.session.complete", session_id = %session.session_id, files_deleted = files, freed_kb = bytes / 1024, "session cleanup complete");
                    report.expired_sessions.push(session.session_id);
                }
                Err(e) => {
                    error!(event = "cleanup.session.failed", session_id = %session.session_id, error = %e, "failed to delete session");
                    report.failures.push(SweepFailure {
                        session_id: Some(session.session_id),
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            event = "cleanup.run.complete",
            duration_ms = started.elapsed().as_millis() as u64,
            scanned = report.scanned,
            deleted_sessions = report.expired_sessions.len(),
            deleted_files = report.deleted_files,
            freed_mb = report.freed_bytes / (1024 * 1024),
            failures = report.failures.len(),
            "cleanup process complete"
        );
        report
    }

    /// Drop one session's registry entries and directory.
    /// Returns `(file records deleted, bytes on disk before deletion)`.
    async fn reclaim(&self, session: &SessionEntry) -> Result<(usize, u64), DocmillError> {
        let id = session.session_id.as_str();
        let bytes = match dir_size(&session.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(session_id = id, error = %e, "failed to calculate session size");
                0
            }
        };

        let files = self.files.cleanup_session(id);
        let tasks = self.tasks.cleanup_session(id);
        self.storage.remove_session(id).await?;

        info!(event = "cleanup.session.deleted", session_id = id, files_deleted = files, tasks_deleted = tasks, "session deleted");
        Ok((files, bytes))
    }

    // ── Quota ────────────────────────────────────────────────────────────

    /// Bytes currently used under the data root.
    pub async fn total_disk_usage(&self) -> Result<u64, DocmillError> {
        self.storage.total_size().await
    }

    /// Whether `incoming` more bytes fit under `limit` (default: the
    /// configured quota), given what is on disk right now.
    pub async fn check_quota(&self, incoming: u64, limit: Option<u64>) -> Result<bool, DocmillError> {
        let usage = self.total_disk_usage().await?;
        Ok(usage.saturating_add(incoming) <= limit.unwrap_or(self.config.quota))
    }

    fn scheduler(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scheduler.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CleanupService {
    fn drop(&mut self) {
        if let Some(handle) = self.scheduler().take() {
            handle.abort();
        }
    }
}

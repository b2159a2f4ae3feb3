//! Spool-directory persistence for pending export jobs.
//!
//! One pretty-printed JSON file per queued job. Every add and claim is
//! reflected on disk before it returns, so an acknowledged submission
//! survives a crash and a claimed job is never re-served after restart.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use bioexport_core::{ExportRequest, JobKind};
use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::job::ExportJob;

/// Result of an `add`: either a fresh entry, or the already-queued
/// equivalent job when the submission is a duplicate.
#[derive(Debug, Clone)]
pub enum AddOutcome {
    Added(ExportJob),
    Duplicate(ExportJob),
}

/// Durable queue of pending export jobs.
///
/// The in-memory pending list mirrors the spool directory; both are
/// mutated under one mutex so "find next matching + remove" is a single
/// critical section and two dispatchers can never claim the same job.
pub struct PersistentQueue {
    spool_dir: PathBuf,
    pending: Mutex<Vec<ExportJob>>,
    closed: AtomicBool,
}

impl PersistentQueue {
    /// Open the queue, creating the spool directory and loading any
    /// jobs left over from a previous run.
    pub fn open(spool_dir: impl Into<PathBuf>) -> Result<Self, QueueError> {
        let spool_dir = spool_dir.into();
        fs::create_dir_all(&spool_dir)?;
        let queue = Self {
            spool_dir,
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };
        let recovered = queue.reload_from_store()?;
        if recovered > 0 {
            info!(
                count = recovered,
                spool = %queue.spool_dir.display(),
                "recovered queued export jobs"
            );
        }
        Ok(queue)
    }

    fn job_path(&self, id: &str) -> PathBuf {
        self.spool_dir.join(format!("{id}.json"))
    }

    fn delete_file(&self, id: &str) -> Result<(), QueueError> {
        match fs::remove_file(self.job_path(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue a job, persisting it before returning. An equivalent job
    /// (same submitter, same normalized parameters) already queued is
    /// returned instead of adding a second entry.
    pub fn add(&self, job: ExportJob) -> Result<AddOutcome, QueueError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(QueueError::Closed);
        }
        let mut pending = self.pending.lock().unwrap();
        let key = job.request.dedup_key();
        if let Some(existing) = pending.iter().find(|j| j.request.dedup_key() == key) {
            debug!(job = %existing.id, "duplicate submission matches queued job");
            return Ok(AddOutcome::Duplicate(existing.clone()));
        }
        let path = self.job_path(&job.id);
        fs::write(&path, serde_json::to_string_pretty(&job)?)?;
        debug!(job = %job.id, path = %path.display(), "export job queued");
        pending.push(job.clone());
        Ok(AddOutcome::Added(job))
    }

    /// Dedup lookup without mutating the queue.
    pub fn find_equivalent(&self, request: &ExportRequest) -> Option<ExportJob> {
        let key = request.dedup_key();
        self.pending
            .lock()
            .unwrap()
            .iter()
            .find(|j| j.request.dedup_key() == key)
            .cloned()
    }

    /// Claim the oldest queued job whose estimated size fits under
    /// `max_records` (unset = any size) and whose kind matches `kind`
    /// (unset = any). The spool file is deleted before the job is
    /// handed out; on a deletion error the job stays queued.
    pub fn claim_next(
        &self,
        max_records: Option<u64>,
        kind: Option<JobKind>,
    ) -> Result<Option<ExportJob>, QueueError> {
        let mut pending = self.pending.lock().unwrap();
        // Oldest submission wins; index breaks same-instant ties in
        // insertion order.
        let idx = pending
            .iter()
            .enumerate()
            .filter(|(_, j)| max_records.map_or(true, |m| j.estimated_total <= m))
            .filter(|(_, j)| kind.map_or(true, |k| j.kind == k))
            .min_by_key(|(i, j)| (j.submitted_at, *i))
            .map(|(i, _)| i);
        let Some(idx) = idx else {
            return Ok(None);
        };
        let id = pending[idx].id.clone();
        self.delete_file(&id)?;
        let job = pending.remove(idx);
        debug!(job = %job.id, "export job claimed");
        Ok(Some(job))
    }

    /// Remove a queued job by id. Idempotent: absent ids return `None`.
    pub fn remove(&self, id: &str) -> Result<Option<ExportJob>, QueueError> {
        let mut pending = self.pending.lock().unwrap();
        let Some(idx) = pending.iter().position(|j| j.id == id) else {
            return Ok(None);
        };
        self.delete_file(id)?;
        let job = pending.remove(idx);
        debug!(job = %job.id, "export job removed from queue");
        Ok(Some(job))
    }

    pub fn total_queued(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Zero-based position in submission order.
    pub fn position(&self, id: &str) -> Option<usize> {
        let pending = self.pending.lock().unwrap();
        let mut jobs: Vec<_> = pending.iter().collect();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs.iter().position(|j| j.id == id)
    }

    /// Snapshot of the pending set in submission order.
    pub fn all(&self) -> Vec<ExportJob> {
        let mut jobs = self.pending.lock().unwrap().clone();
        jobs.sort_by_key(|j| j.submitted_at);
        jobs
    }

    /// Rebuild the pending set from the spool directory. Jobs already
    /// claimed by a dispatcher live in the active registry, not here,
    /// so a reload never resurrects them. Unreadable files are skipped,
    /// never deleted.
    pub fn reload_from_store(&self) -> Result<usize, QueueError> {
        let mut jobs = Vec::new();
        for entry in fs::read_dir(&self.spool_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(QueueError::from)
                .and_then(|s| serde_json::from_str::<ExportJob>(&s).map_err(QueueError::from));
            match parsed {
                Ok(job) => jobs.push(job),
                Err(e) => warn!(
                    path = %path.display(),
                    error = %e,
                    "skipping unreadable spool file"
                ),
            }
        }
        jobs.sort_by_key(|j| j.submitted_at);
        let count = jobs.len();
        *self.pending.lock().unwrap() = jobs;
        Ok(count)
    }

    /// Stop accepting new submissions. Entries already queued remain
    /// claimable until individually removed.
    pub fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!(
                queued = self.total_queued(),
                "persistent queue closed to new submissions"
            );
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

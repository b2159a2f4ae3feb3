//! Registry of jobs claimed from the queue and not yet finished.
//!
//! Interrupted jobs stay registered so an operator (or a restart hook)
//! can see and resubmit them; every other outcome removes the entry.

use std::collections::HashMap;
use std::sync::Mutex;

use bioexport_queue::ExportJob;

use crate::signal::Signal;

/// A claimed job together with its cancellation latch and the pool
/// that claimed it.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub job: ExportJob,
    pub cancel: Signal,
    pub pool: String,
}

/// Concurrent set of in-flight jobs, keyed by job id.
#[derive(Debug, Default)]
pub struct ActiveRegistry {
    jobs: Mutex<HashMap<String, ActiveJob>>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a claimed job, minting its cancellation latch. Returns
    /// the entry handed to the executor.
    pub fn insert(&self, job: ExportJob, pool: &str) -> ActiveJob {
        let entry = ActiveJob {
            job,
            cancel: Signal::new(),
            pool: pool.to_string(),
        };
        self.jobs
            .lock()
            .unwrap()
            .insert(entry.job.id.clone(), entry.clone());
        entry
    }

    /// Remove an entry. Exactly one caller observes `Some` per insert,
    /// no matter how completion and shutdown race.
    pub fn remove(&self, id: &str) -> Option<ActiveJob> {
        self.jobs.lock().unwrap().remove(id)
    }

    pub fn get(&self, id: &str) -> Option<ActiveJob> {
        self.jobs.lock().unwrap().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().unwrap().is_empty()
    }

    /// All in-flight jobs, oldest submission first.
    pub fn snapshot(&self) -> Vec<ActiveJob> {
        let mut entries: Vec<ActiveJob> = self.jobs.lock().unwrap().values().cloned().collect();
        entries.sort_by_key(|e| e.job.submitted_at);
        entries
    }

    pub fn count_for_pool(&self, pool: &str) -> usize {
        self.jobs
            .lock()
            .unwrap()
            .values()
            .filter(|e| e.pool == pool)
            .count()
    }

    /// Record where the finished archive landed, so status lookups of
    /// a still-running job can report it.
    pub fn set_output_path(&self, id: &str, path: &str) {
        if let Some(entry) = self.jobs.lock().unwrap().get_mut(id) {
            entry.job.output_path = Some(path.to_string());
        }
    }
}

//! Admission control: validate a request, estimate its size, and
//! either enqueue it, return the already-queued equivalent, or reject
//! it with a skip marker.

use std::sync::Arc;

use tracing::{info, warn};

use bioexport_core::{ExportConfig, ExportRequest, JobKind};
use bioexport_queue::{AddOutcome, ExportJob, PersistentQueue};

use crate::error::ServiceError;
use crate::status::{StatusRecord, StatusStore};
use crate::traits::SearchEngine;

/// What became of a submission.
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// A fresh job entered the queue.
    Queued {
        job: ExportJob,
        position: usize,
        total_queued: usize,
    },
    /// An equivalent job was already queued; it is returned instead of
    /// creating a second entry.
    AlreadyQueued {
        job: ExportJob,
        position: usize,
        total_queued: usize,
    },
    /// Over the record ceiling: a skip marker was written and nothing
    /// was queued.
    Skipped { job_id: String, message: String },
}

/// Validates and enqueues export requests.
pub struct AdmissionControl {
    queue: Arc<PersistentQueue>,
    search: Arc<dyn SearchEngine>,
    status: StatusStore,
    config: Arc<ExportConfig>,
}

impl AdmissionControl {
    pub fn new(
        queue: Arc<PersistentQueue>,
        search: Arc<dyn SearchEngine>,
        status: StatusStore,
        config: Arc<ExportConfig>,
    ) -> Self {
        Self {
            queue,
            search,
            status,
            config,
        }
    }

    pub async fn submit(
        &self,
        request: ExportRequest,
        kind: JobKind,
        source_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<SubmitOutcome, ServiceError> {
        validate(&request)?;

        // An equivalent pending job short-circuits before the count
        // call; `add` re-checks under the queue lock.
        if let Some(existing) = self.queue.find_equivalent(&request) {
            return Ok(self.already_queued(existing));
        }

        let total = self.search.count(&request).await?;
        let ceiling = self.config.limits.max_records;
        if total > ceiling {
            let job = ExportJob::new(request, kind, total);
            let message =
                format!("Requested too many records ({total}). The maximum is ({ceiling}).");
            self.status
                .write(&job.id, &StatusRecord::skipped(message.clone()))?;
            warn!(job = %job.id, total, ceiling, "export request over the record ceiling");
            return Ok(SubmitOutcome::Skipped {
                job_id: job.id,
                message,
            });
        }

        let job = ExportJob::new(request, kind, total).with_source(source_ip, user_agent);
        match self.queue.add(job)? {
            AddOutcome::Added(job) => {
                self.status.write(&job.id, &StatusRecord::queued())?;
                let position = self.queue.position(&job.id).unwrap_or(0);
                let total_queued = self.queue.total_queued();
                info!(job = %job.id, records = job.estimated_total, position, "export job queued");
                Ok(SubmitOutcome::Queued {
                    job,
                    position,
                    total_queued,
                })
            }
            AddOutcome::Duplicate(existing) => Ok(self.already_queued(existing)),
        }
    }

    fn already_queued(&self, job: ExportJob) -> SubmitOutcome {
        let position = self.queue.position(&job.id).unwrap_or(0);
        let total_queued = self.queue.total_queued();
        info!(job = %job.id, position, "equivalent export already queued");
        SubmitOutcome::AlreadyQueued {
            job,
            position,
            total_queued,
        }
    }
}

fn validate(request: &ExportRequest) -> Result<(), ServiceError> {
    let email = request.email.trim();
    if email.is_empty() {
        return Err(ServiceError::Validation(
            "a submitter email is required".into(),
        ));
    }
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(ServiceError::Validation(format!(
            "'{email}' is not a usable email address"
        )));
    }
    if request.query.trim().is_empty() {
        return Err(ServiceError::Validation("a search query is required".into()));
    }
    Ok(())
}

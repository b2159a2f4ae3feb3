//! Drives one claimed job through export, identifier minting,
//! statistics, and notification.
//!
//! Outcome handling:
//! - success: `finished` status, entry removed from the registry
//! - interrupted: entry left registered for post-restart resubmission,
//!   no notification
//! - cancelled: `cancelled` status, no notification, entry removed
//! - anything else: `failed` status, failure email, entry removed

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use bioexport_core::{EmailTemplate, ExportConfig, ExportRequest};
use bioexport_notify::{CompletionContext, FailureContext, Mailer, TemplateKind, TemplateRenderer};
use bioexport_queue::ExportJob;

use crate::error::ServiceError;
use crate::registry::{ActiveJob, ActiveRegistry};
use crate::signal::Signal;
use crate::status::{ExportStats, StatusRecord, StatusStore};
use crate::traits::{MintMetadata, MintingService, SearchEngine, SourceCounts};

pub struct JobExecutor {
    search: Arc<dyn SearchEngine>,
    minting: Arc<dyn MintingService>,
    mailer: Arc<dyn Mailer>,
    templates: TemplateRenderer,
    status: StatusStore,
    registry: Arc<ActiveRegistry>,
    config: Arc<ExportConfig>,
}

impl JobExecutor {
    pub fn new(
        search: Arc<dyn SearchEngine>,
        minting: Arc<dyn MintingService>,
        mailer: Arc<dyn Mailer>,
        templates: TemplateRenderer,
        status: StatusStore,
        registry: Arc<ActiveRegistry>,
        config: Arc<ExportConfig>,
    ) -> Self {
        Self {
            search,
            minting,
            mailer,
            templates,
            status,
            registry,
            config,
        }
    }

    /// Run one registered job to a terminal state.
    pub async fn run(&self, entry: ActiveJob, interrupt: &Signal) {
        let id = entry.job.id.clone();
        match self.execute(&entry, interrupt).await {
            Ok(stats) => {
                self.registry.remove(&id);
                info!(job = %id, records = stats.total_exported, "export finished");
            }
            Err(ServiceError::Interrupted) => {
                // Stays registered so it can be found and resubmitted
                // after restart; no notification.
                warn!(job = %id, "export interrupted by shutdown");
            }
            Err(ServiceError::Cancelled) => {
                if let Err(e) = self.status.write(&id, &StatusRecord::cancelled()) {
                    warn!(job = %id, error = %e, "could not record cancelled status");
                }
                self.registry.remove(&id);
                info!(job = %id, "export cancelled");
            }
            Err(e) => {
                error!(job = %id, error = %e, "export failed");
                if let Err(we) = self.status.write(&id, &StatusRecord::failed(e.to_string())) {
                    warn!(job = %id, error = %we, "could not record failed status");
                }
                self.send_failure_email(&entry.job).await;
                self.registry.remove(&id);
            }
        }
    }

    async fn execute(
        &self,
        entry: &ActiveJob,
        interrupt: &Signal,
    ) -> Result<ExportStats, ServiceError> {
        let job = &entry.job;
        let cancel = &entry.cancel;

        if interrupt.is_triggered() {
            return Err(ServiceError::Interrupted);
        }
        if cancel.is_triggered() {
            return Err(ServiceError::Cancelled);
        }

        let started_at = Utc::now();
        self.status.write(&job.id, &StatusRecord::running())?;

        let archive_name = format!("{}.zip", job.request.file_name);
        let dest = self.status.job_dir(&job.id)?.join(&archive_name);

        let source_counts = tokio::select! {
            result = self.search.export(job, &dest, cancel) => result?,
            _ = interrupt.triggered() => return Err(ServiceError::Interrupted),
            _ = cancel.triggered() => return Err(ServiceError::Cancelled),
        };
        self.registry
            .set_output_path(&job.id, &dest.to_string_lossy());

        let total_exported = if source_counts.is_empty() {
            job.estimated_total
        } else {
            source_counts.values().sum()
        };
        let download_url = self.download_url(&job.id, &archive_name)?;

        // Minting failure never aborts the job.
        let mut identifier = None;
        let mut mint_error = None;
        if job.request.mint_identifier && self.config.minting.is_enabled() {
            match self
                .mint(job, total_exported, &source_counts, &dest, interrupt)
                .await
            {
                Ok(minted) => identifier = Some(minted),
                Err(ServiceError::Interrupted) => return Err(ServiceError::Interrupted),
                Err(e) => {
                    warn!(job = %job.id, error = %e, "identifier minting failed");
                    mint_error = Some(e.to_string());
                }
            }
        }

        let stats = ExportStats {
            job_id: job.id.clone(),
            total_exported,
            source_counts,
            started_at,
            finished_at: Utc::now(),
            identifier: identifier.clone(),
            mint_error: mint_error.clone(),
        };
        if let Err(e) = self.status.write_stats(&job.id, &stats) {
            warn!(job = %job.id, error = %e, "could not write stats sidecar");
        }

        self.send_completion_email(
            job,
            &download_url,
            identifier.as_deref(),
            mint_error.is_some(),
            interrupt,
        )
        .await?;

        self.status.write(
            &job.id,
            &StatusRecord::finished(download_url.as_str(), total_exported, identifier),
        )?;
        Ok(stats)
    }

    async fn mint(
        &self,
        job: &ExportJob,
        total: u64,
        counts: &SourceCounts,
        archive: &Path,
        interrupt: &Signal,
    ) -> Result<String, ServiceError> {
        let metadata = MintMetadata {
            title: format!("Occurrence export {}", job.request.file_name),
            query: display_title(&job.request),
            search_url: self.search_link(&job.request),
            total_records: total,
            source_counts: counts.clone(),
            submitter: job.request.email.clone(),
        };
        let minted = tokio::select! {
            result = self.minting.mint(&metadata) => result?,
            _ = interrupt.triggered() => return Err(ServiceError::Interrupted),
        };
        // The identifier exists even if the archive upload fails, so a
        // failed attach only warns.
        if let Err(e) = self.minting.attach_file(&minted.identifier, archive).await {
            warn!(job = %job.id, identifier = %minted.identifier, error = %e, "could not attach archive to identifier");
        }
        info!(job = %job.id, identifier = %minted.identifier, "identifier minted");
        Ok(minted.identifier)
    }

    async fn send_completion_email(
        &self,
        job: &ExportJob,
        download_url: &str,
        identifier: Option<&str>,
        mint_failed: bool,
        interrupt: &Signal,
    ) -> Result<(), ServiceError> {
        if !self.config.email.enabled {
            debug!(job = %job.id, "notifications disabled, skipping completion email");
            return Ok(());
        }

        // Give the resolver time to learn a fresh identifier before
        // the submitter clicks it.
        if identifier.is_some() && self.config.minting.propagation_delay_ms > 0 {
            let delay = Duration::from_millis(self.config.minting.propagation_delay_ms);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = interrupt.triggered() => return Err(ServiceError::Interrupted),
            }
        }

        let kind = if identifier.is_some() || mint_failed {
            TemplateKind::Doi
        } else if job.request.template == EmailTemplate::Custom {
            TemplateKind::Custom
        } else {
            TemplateKind::Default
        };

        let ctx = CompletionContext {
            date: job.submitted_at.format("%-d %B %Y").to_string(),
            query_title: display_title(&job.request),
            search_url: self.search_link(&job.request),
            download_url: download_url.to_string(),
            official_doi_url: identifier
                .map(|id| format!("{}{}", self.config.minting.resolver_base, id)),
            doi_failure_message: mint_failed
                .then(|| self.config.minting.failure_message.clone()),
            hub_name: self.config.links.hub_name.clone(),
        };

        match self.templates.render_completion(kind, &ctx) {
            Ok(body) => {
                let subject = &self.config.email.completion_subject;
                if let Err(e) = self
                    .mailer
                    .send(&job.request.email, subject, &body, None)
                    .await
                {
                    warn!(job = %job.id, error = %e, "completion email not delivered");
                }
            }
            Err(e) => warn!(job = %job.id, error = %e, "completion template did not render"),
        }
        Ok(())
    }

    async fn send_failure_email(&self, job: &ExportJob) {
        if !self.config.email.enabled {
            return;
        }
        let ctx = FailureContext {
            date: job.submitted_at.format("%-d %B %Y").to_string(),
            query_title: display_title(&job.request),
            job_id: job.id.clone(),
            file_name: job.request.file_name.clone(),
            support: self.config.email.support.clone(),
            my_exports_url: self.config.links.my_exports_url.clone(),
            hub_name: self.config.links.hub_name.clone(),
        };
        match self.templates.render_failure(&ctx) {
            Ok(body) => {
                let cc = self.config.email.support.as_deref();
                let subject = &self.config.email.failure_subject;
                if let Err(e) = self
                    .mailer
                    .send(&job.request.email, subject, &body, cc)
                    .await
                {
                    warn!(job = %job.id, error = %e, "failure email not delivered");
                }
            }
            Err(e) => warn!(job = %job.id, error = %e, "failure template did not render"),
        }
    }

    fn download_url(&self, id: &str, archive_name: &str) -> Result<String, ServiceError> {
        let (submitter, stamp) = bioexport_core::parse_job_id(id)?;
        Ok(format!(
            "{}/{}/{}/{}",
            self.config.links.base_url.trim_end_matches('/'),
            submitter,
            stamp,
            archive_name
        ))
    }

    fn search_link(&self, request: &ExportRequest) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(request.query.as_bytes()).collect();
        format!("{}?q={}", self.config.links.search_ui_url, encoded)
    }
}

fn display_title(request: &ExportRequest) -> String {
    if request.filters.is_empty() {
        request.query.clone()
    } else {
        format!("{} ({})", request.query, request.filters.join(", "))
    }
}

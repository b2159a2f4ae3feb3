//! Service lifecycle: wiring, gated startup, and staged shutdown.
//!
//! `build()` composes the parts, `start()` brings up one dispatcher
//! per pool off the caller's critical path, and every public operation
//! waits on the ready gate so nothing races a half-started service.
//! Shutdown runs once (compare-and-set guard) and escalates: close the
//! queue, signal dispatchers, wait a short grace, wait a longer grace,
//! then interrupt whatever is still running.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use bioexport_core::{ExportConfig, ExportRequest, JobKind, JobStatus};
use bioexport_notify::{Mailer, TemplateRenderer};
use bioexport_queue::PersistentQueue;

use crate::admission::{AdmissionControl, SubmitOutcome};
use crate::dispatch::{PoolDispatcher, SharedPool};
use crate::error::ServiceError;
use crate::executor::JobExecutor;
use crate::pools;
use crate::registry::ActiveRegistry;
use crate::signal::Signal;
use crate::status::{StatusRecord, StatusReport, StatusStore};
use crate::traits::{MintingService, SearchEngine};

/// Grace for dispatch loops to notice the stop signal.
const STOP_GRACE: Duration = Duration::from_secs(2);
/// Further grace before in-flight work is interrupted.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);
/// Timed join per dispatcher handle while draining.
const JOIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Result of a cancel call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job was running; its cancellation latch was triggered and
    /// the executor will wind it down.
    Signalled,
    /// The job was still queued and has been removed outright.
    Removed,
    NotFound,
}

/// The composition root. Owns the queue, registry, dispatchers, and
/// shared execution pool.
pub struct ExportService {
    config: Arc<ExportConfig>,
    queue: Arc<PersistentQueue>,
    registry: Arc<ActiveRegistry>,
    status: StatusStore,
    admission: AdmissionControl,
    executor: Arc<JobExecutor>,
    shared: SharedPool,
    stop: Signal,
    interrupt: Signal,
    ready: Signal,
    started: AtomicBool,
    stopping: AtomicBool,
    dispatchers: Mutex<Vec<JoinHandle<()>>>,
}

impl ExportService {
    /// Wire the service. Opening the queue reloads any jobs spooled by
    /// a previous run.
    pub fn build(
        config: ExportConfig,
        search: Arc<dyn SearchEngine>,
        minting: Arc<dyn MintingService>,
        mailer: Arc<dyn Mailer>,
        templates: TemplateRenderer,
    ) -> Result<Arc<Self>, ServiceError> {
        let config = Arc::new(config);
        let queue = Arc::new(PersistentQueue::open(&config.paths.spool_dir)?);
        let registry = Arc::new(ActiveRegistry::new());
        let status = StatusStore::new(&config.paths.export_dir);
        let shared = SharedPool::new(config.limits.shared_pool_size);
        let executor = Arc::new(JobExecutor::new(
            search.clone(),
            minting,
            mailer,
            templates,
            status.clone(),
            registry.clone(),
            config.clone(),
        ));
        let admission =
            AdmissionControl::new(queue.clone(), search, status.clone(), config.clone());
        Ok(Arc::new(Self {
            config,
            queue,
            registry,
            status,
            admission,
            executor,
            shared,
            stop: Signal::new(),
            interrupt: Signal::new(),
            ready: Signal::new(),
            started: AtomicBool::new(false),
            stopping: AtomicBool::new(false),
            dispatchers: Mutex::new(Vec::new()),
        }))
    }

    /// Start one dispatcher per configured pool, off the caller's
    /// critical path, then open the ready gate. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }
        let service = self.clone();
        tokio::spawn(async move {
            let pool_set = pools::effective_pools(&service.config.limits);
            let count = pool_set.len();
            {
                let mut handles = service.dispatchers.lock().unwrap();
                for pool in pool_set {
                    let dispatcher = PoolDispatcher::new(
                        pool,
                        service.queue.clone(),
                        service.registry.clone(),
                        service.shared.clone(),
                        service.executor.clone(),
                        service.stop.clone(),
                        service.interrupt.clone(),
                    );
                    handles.push(dispatcher.spawn());
                }
            }
            service.ready.trigger();
            info!(
                pools = count,
                profile = %service.config.profile_label(),
                queued = service.queue.total_queued(),
                "export service ready"
            );
        });
    }

    /// Wait for the ready gate without performing an operation.
    pub async fn ready(&self) {
        self.ready.triggered().await;
    }

    pub async fn submit(
        &self,
        request: ExportRequest,
        kind: JobKind,
        source_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<SubmitOutcome, ServiceError> {
        self.ready.triggered().await;
        self.admission
            .submit(request, kind, source_ip, user_agent)
            .await
    }

    /// Look a job up. Precedence: running beats queued beats the
    /// on-disk record.
    pub async fn status(&self, id: &str) -> Result<Option<StatusReport>, ServiceError> {
        self.ready.triggered().await;
        if self.registry.get(id).is_some() {
            return Ok(Some(StatusReport {
                id: id.to_string(),
                status: JobStatus::Running,
                message: None,
                download_url: None,
                error: None,
                queue_position: None,
                total_queued: None,
            }));
        }
        if let Some(position) = self.queue.position(id) {
            return Ok(Some(StatusReport {
                id: id.to_string(),
                status: JobStatus::Queued,
                message: None,
                download_url: None,
                error: None,
                queue_position: Some(position),
                total_queued: Some(self.queue.total_queued()),
            }));
        }
        match self.status.read(id)? {
            Some(record) => Ok(Some(StatusReport {
                id: id.to_string(),
                status: record.status,
                message: record.message,
                download_url: record.download_url,
                error: record.error,
                queue_position: None,
                total_queued: None,
            })),
            None => Ok(None),
        }
    }

    /// Cancel a job: queued jobs are removed outright, running jobs
    /// get their cancellation latch triggered and wind down at the
    /// next suspension point.
    pub async fn cancel(&self, id: &str) -> Result<CancelOutcome, ServiceError> {
        self.ready.triggered().await;
        if let Some(entry) = self.registry.get(id) {
            entry.cancel.trigger();
            info!(job = %id, "cancellation requested");
            return Ok(CancelOutcome::Signalled);
        }
        if self.queue.remove(id)?.is_some() {
            self.status.write(id, &StatusRecord::cancelled())?;
            info!(job = %id, "queued job cancelled");
            return Ok(CancelOutcome::Removed);
        }
        Ok(CancelOutcome::NotFound)
    }

    /// Running jobs (oldest first), then queued jobs in claim order.
    pub async fn list(&self) -> Vec<StatusReport> {
        self.ready.triggered().await;
        let total_queued = self.queue.total_queued();
        let mut reports = Vec::new();
        for entry in self.registry.snapshot() {
            reports.push(StatusReport {
                id: entry.job.id.clone(),
                status: JobStatus::Running,
                message: None,
                download_url: None,
                error: None,
                queue_position: None,
                total_queued: None,
            });
        }
        for (position, job) in self.queue.all().into_iter().enumerate() {
            reports.push(StatusReport {
                id: job.id,
                status: JobStatus::Queued,
                message: None,
                download_url: None,
                error: None,
                queue_position: Some(position),
                total_queued: Some(total_queued),
            });
        }
        reports
    }

    /// Staged shutdown. Runs once; later calls return immediately.
    pub async fn shutdown(&self) {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("export service stopping");
        // Unblock anything still waiting on the gate; it will observe
        // the closed queue.
        self.ready.trigger();
        self.queue.shutdown();
        self.stop.trigger();

        let handles: Vec<JoinHandle<()>> =
            std::mem::take(&mut *self.dispatchers.lock().unwrap());

        tokio::time::sleep(STOP_GRACE).await;
        if self.still_busy(&handles) {
            tokio::time::sleep(INTERRUPT_GRACE).await;
            if self.still_busy(&handles) {
                warn!(active = self.registry.len(), "interrupting in-flight exports");
                self.interrupt.trigger();
            }
        }

        for handle in handles {
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "dispatcher task panicked"),
                Err(_) => warn!("dispatcher did not stop within the join timeout"),
            }
        }
        info!("export service stopped");
    }

    fn still_busy(&self, handles: &[JoinHandle<()>]) -> bool {
        !self.registry.is_empty() || handles.iter().any(|h| !h.is_finished())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use async_trait::async_trait;

    use bioexport_core::derive_job_id;
    use bioexport_queue::ExportJob;

    use crate::clients::DisabledMinting;
    use crate::signal::Signal;
    use crate::testutil::{self, FixedCountSearch, NullMailer};
    use crate::traits::{SearchEngine, SourceCounts};

    /// Export never finishes on its own; only interruption ends it.
    struct StalledSearch;

    #[async_trait]
    impl SearchEngine for StalledSearch {
        async fn count(&self, _request: &ExportRequest) -> Result<u64, ServiceError> {
            Ok(10)
        }

        async fn export(
            &self,
            _job: &ExportJob,
            _dest: &Path,
            _cancel: &Signal,
        ) -> Result<SourceCounts, ServiceError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(SourceCounts::new())
        }
    }

    fn build_service(
        dir: &Path,
        search: Arc<dyn SearchEngine>,
        pools_json: Option<&str>,
    ) -> Arc<ExportService> {
        let mut config = testutil::test_config(dir);
        config.email.enabled = false;
        config.limits.pools_json = pools_json.map(|s| s.to_string());
        ExportService::build(
            config,
            search,
            Arc::new(DisabledMinting),
            Arc::new(NullMailer),
            TemplateRenderer::default(),
        )
        .unwrap()
    }

    /// A pool set that only claims index-backed jobs, so store-backed
    /// submissions stay queued.
    const INDEX_ONLY_POOLS: &str = r#"[{"label": "idx", "kind": "index-backed", "pollDelayMs": 5}]"#;

    #[tokio::test]
    async fn operations_wait_for_the_ready_gate() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(dir.path(), Arc::new(FixedCountSearch(10)), None);

        let gated = service.clone();
        let id = derive_job_id("alice@example.org", chrono::Utc::now());
        let lookup = tokio::spawn(async move { gated.status(&id).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!lookup.is_finished(), "lookup should block before start");

        service.start();
        let report = tokio::time::timeout(Duration::from_secs(2), lookup)
            .await
            .expect("lookup should complete once started")
            .unwrap()
            .unwrap();
        assert!(report.is_none());
        service.shutdown().await;
    }

    #[tokio::test]
    async fn start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(
            dir.path(),
            Arc::new(FixedCountSearch(10)),
            Some(INDEX_ONLY_POOLS),
        );
        service.start();
        service.start();
        service.ready().await;
        assert_eq!(service.dispatchers.lock().unwrap().len(), 1);
        service.shutdown().await;
    }

    #[tokio::test]
    async fn queued_job_reports_position_and_cancels_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(
            dir.path(),
            Arc::new(FixedCountSearch(10)),
            Some(INDEX_ONLY_POOLS),
        );
        service.start();

        // Store-backed, so the index-only pool never claims it.
        let request = ExportRequest::new("genus:Acacia", "alice@example.org");
        let outcome = service
            .submit(request, JobKind::StoreBacked, None, None)
            .await
            .unwrap();
        let SubmitOutcome::Queued { job, .. } = outcome else {
            panic!("expected Queued, got {outcome:?}");
        };

        let report = service.status(&job.id).await.unwrap().unwrap();
        assert_eq!(report.status, JobStatus::Queued);
        assert_eq!(report.queue_position, Some(0));
        assert_eq!(report.total_queued, Some(1));

        let listed = service.list().await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, job.id);

        assert_eq!(
            service.cancel(&job.id).await.unwrap(),
            CancelOutcome::Removed
        );
        let report = service.status(&job.id).await.unwrap().unwrap();
        assert_eq!(report.status, JobStatus::Cancelled);
        assert_eq!(
            service.cancel(&job.id).await.unwrap(),
            CancelOutcome::NotFound
        );
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_closes_admissions() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(
            dir.path(),
            Arc::new(FixedCountSearch(10)),
            Some(INDEX_ONLY_POOLS),
        );
        service.start();
        service.ready().await;
        service.shutdown().await;

        let request = ExportRequest::new("genus:Acacia", "alice@example.org");
        let result = service
            .submit(request, JobKind::IndexBacked, None, None)
            .await;
        assert!(
            matches!(
                result,
                Err(ServiceError::Queue(bioexport_queue::QueueError::Closed))
            ),
            "expected closed-queue rejection, got {result:?}"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_shutdown_skips_the_interrupt_stage() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(
            dir.path(),
            Arc::new(FixedCountSearch(10)),
            Some(INDEX_ONLY_POOLS),
        );
        service.start();
        service.ready().await;

        service.shutdown().await;
        assert!(!service.interrupt.is_triggered());

        // Second call returns immediately.
        service.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_jobs_are_interrupted_after_both_graces() {
        let dir = tempfile::tempdir().unwrap();
        let service = build_service(
            dir.path(),
            Arc::new(StalledSearch),
            Some(r#"[{"label": "all", "pollDelayMs": 5}]"#),
        );
        service.start();

        let request = ExportRequest::new("genus:Acacia", "alice@example.org");
        service
            .submit(request, JobKind::IndexBacked, None, None)
            .await
            .unwrap();

        // Wait for the dispatcher to claim and register the job.
        for _ in 0..200 {
            if !service.registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(!service.registry.is_empty(), "job was never claimed");

        service.shutdown().await;
        assert!(service.interrupt.is_triggered());
        // Interrupted jobs stay registered for post-restart recovery.
        assert_eq!(service.registry.len(), 1);
    }
}

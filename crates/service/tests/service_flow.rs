//! End-to-end flows through the export service: admission, tier
//! routing, execution, and the notification and status surfaces.
//!
//! These tests drive the public `ExportService` API with stub
//! collaborators and assert on what a submitter would actually see:
//! the archive on disk, the status record, and the delivered email.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use bioexport_core::config::{
    EmailConfig, ExportConfig, LimitsConfig, LinksConfig, MintingConfig, PathsConfig, SearchConfig,
};
use bioexport_core::{ExportRequest, JobKind, JobStatus};
use bioexport_notify::{Mailer, NotifyError, TemplateRenderer};
use bioexport_queue::ExportJob;
use bioexport_service::{
    DisabledMinting, ExportService, MintMetadata, MintedId, MintingService, SearchEngine,
    ServiceError, Signal, SourceCounts, StatusReport, StatusStore, SubmitOutcome,
};

const DEADLINE: Duration = Duration::from_secs(10);
const POLL: Duration = Duration::from_millis(10);

// ── Test doubles ────────────────────────────────────────────────────

/// Counts 60 records for queries mentioning "rare" and 60 000 for
/// everything else, and records which worker served each export.
struct StubSearch {
    exports: Mutex<Vec<ExportCall>>,
}

struct ExportCall {
    query: String,
    worker: Option<String>,
}

impl StubSearch {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            exports: Mutex::new(Vec::new()),
        })
    }

    fn worker_for(&self, marker: &str) -> Option<String> {
        self.exports
            .lock()
            .unwrap()
            .iter()
            .find(|call| call.query.contains(marker))
            .and_then(|call| call.worker.clone())
    }
}

#[async_trait]
impl SearchEngine for StubSearch {
    async fn count(&self, request: &ExportRequest) -> Result<u64, ServiceError> {
        Ok(if request.query.contains("rare") { 60 } else { 60_000 })
    }

    async fn export(
        &self,
        job: &ExportJob,
        dest: &Path,
        _cancel: &Signal,
    ) -> Result<SourceCounts, ServiceError> {
        self.exports.lock().unwrap().push(ExportCall {
            query: job.request.query.clone(),
            worker: job.worker.clone(),
        });
        tokio::fs::write(dest, b"zip-bytes").await?;
        let mut counts = SourceCounts::new();
        counts.insert("Museum collection".to_string(), 40);
        counts.insert("Citizen science".to_string(), 20);
        Ok(counts)
    }
}

struct StubMint {
    fail: bool,
    attached: Mutex<Vec<String>>,
}

impl StubMint {
    fn succeeding() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            attached: Mutex::new(Vec::new()),
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            fail: true,
            attached: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl MintingService for StubMint {
    async fn mint(&self, _metadata: &MintMetadata) -> Result<MintedId, ServiceError> {
        if self.fail {
            return Err(ServiceError::External {
                service: "minting",
                message: "registry unavailable".to_string(),
            });
        }
        Ok(MintedId {
            identifier: "10.5555/OCC-1".to_string(),
        })
    }

    async fn attach_file(&self, identifier: &str, _archive: &Path) -> Result<(), ServiceError> {
        self.attached.lock().unwrap().push(identifier.to_string());
        Ok(())
    }
}

struct SentMail {
    to: String,
    subject: String,
    body: String,
}

#[derive(Default)]
struct CapturingMailer {
    sent: Mutex<Vec<SentMail>>,
}

#[async_trait]
impl Mailer for CapturingMailer {
    async fn send(
        &self,
        to: &str,
        subject: &str,
        html_body: &str,
        _cc: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(SentMail {
            to: to.to_string(),
            subject: subject.to_string(),
            body: html_body.to_string(),
        });
        Ok(())
    }
}

// ── Harness ─────────────────────────────────────────────────────────

/// One catch-all pool with a tight poll, for tests that just need jobs
/// to run promptly.
const FAST_POOL: &str = r#"[{"label": "main", "threads": 2, "pollDelayMs": 5}]"#;

fn base_config(dir: &Path, pools: &str) -> ExportConfig {
    ExportConfig {
        profile: String::new(),
        paths: PathsConfig {
            export_dir: dir.join("exports"),
            spool_dir: dir.join("spool"),
            template_dir: None,
        },
        limits: LimitsConfig {
            max_records: 1_000_000,
            shared_pool_size: 8,
            pools_json: Some(pools.to_string()),
        },
        email: EmailConfig {
            enabled: true,
            from: "exports@hub.example.org".to_string(),
            support: Some("ops@hub.example.org".to_string()),
            smtp_host: "localhost".to_string(),
            smtp_port: 25,
            completion_subject: "Your occurrence export is ready".to_string(),
            failure_subject: "Your occurrence export failed".to_string(),
        },
        minting: MintingConfig {
            service_url: None,
            resolver_base: "https://doi.org/".to_string(),
            propagation_delay_ms: 0,
            failure_message: "No citation identifier could be created for this export."
                .to_string(),
        },
        links: LinksConfig {
            base_url: "http://hub.example.org/exports".to_string(),
            search_ui_url: "http://hub.example.org/search".to_string(),
            my_exports_url: "http://hub.example.org/my-exports".to_string(),
            hub_name: "Test Hub".to_string(),
        },
        search: SearchConfig {
            service_url: "http://localhost:9".to_string(),
        },
    }
}

async fn start_service(
    config: ExportConfig,
    search: Arc<dyn SearchEngine>,
    minting: Arc<dyn MintingService>,
    mailer: Arc<CapturingMailer>,
) -> Arc<ExportService> {
    let service =
        ExportService::build(config, search, minting, mailer, TemplateRenderer::default())
            .unwrap();
    service.start();
    service.ready().await;
    service
}

fn submitted_job(outcome: SubmitOutcome) -> ExportJob {
    match outcome {
        SubmitOutcome::Queued { job, .. } => job,
        other => panic!("expected Queued, got {other:?}"),
    }
}

async fn wait_for(service: &ExportService, id: &str, want: JobStatus) -> StatusReport {
    let deadline = Instant::now() + DEADLINE;
    loop {
        if let Some(report) = service.status(id).await.unwrap() {
            if report.status == want {
                return report;
            }
        }
        assert!(Instant::now() < deadline, "timed out waiting for {want}");
        tokio::time::sleep(POLL).await;
    }
}

fn read_json(path: &Path) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

// ── Happy path ──────────────────────────────────────────────────────

#[tokio::test]
async fn finished_export_serves_archive_status_and_email() {
    let dir = tempfile::tempdir().unwrap();
    let search = StubSearch::new();
    let mailer = Arc::new(CapturingMailer::default());
    let service = start_service(
        base_config(dir.path(), FAST_POOL),
        search.clone(),
        Arc::new(DisabledMinting),
        mailer.clone(),
    )
    .await;

    let request = ExportRequest::new("genus:rare-orchid", "alice@example.org");
    let job = submitted_job(
        service
            .submit(request, JobKind::IndexBacked, None, None)
            .await
            .unwrap(),
    );

    let report = wait_for(&service, &job.id, JobStatus::Finished).await;
    let url = report
        .download_url
        .expect("finished report carries the download URL");
    assert!(url.starts_with("http://hub.example.org/exports/"));
    assert!(url.ends_with("/data.zip"));

    let job_dir = StatusStore::new(dir.path().join("exports"))
        .job_dir(&job.id)
        .unwrap();
    assert!(job_dir.join("data.zip").exists());

    let status = read_json(&job_dir.join("status.json"));
    assert_eq!(status["status"], "finished");
    assert_eq!(status["downloadUrl"], url.as_str());
    assert_eq!(status["totalRecords"], 60);

    let stats = read_json(&job_dir.join("stats.json"));
    assert_eq!(stats["totalExported"], 60);
    assert_eq!(stats["sourceCounts"]["Museum collection"], 40);

    {
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "alice@example.org");
        assert_eq!(sent[0].subject, "Your occurrence export is ready");
        assert!(sent[0].body.contains(&url));
    }

    service.shutdown().await;
}

// ── Tier routing ────────────────────────────────────────────────────

/// A small tier capped at 1000 records plus a catch-all with a slow
/// poll, so each job is claimed by exactly the tier that fits it.
const TIERED_POOLS: &str = r#"[
  {"label": "small", "threads": 2, "maxRecords": 1000, "kind": "index-backed", "pollDelayMs": 5},
  {"label": "rest", "threads": 2, "pollDelayMs": 400}
]"#;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn jobs_route_to_the_matching_tier() {
    let dir = tempfile::tempdir().unwrap();
    let search = StubSearch::new();
    let mut config = base_config(dir.path(), TIERED_POOLS);
    config.email.enabled = false;
    let service = start_service(
        config,
        search.clone(),
        Arc::new(DisabledMinting),
        Arc::new(CapturingMailer::default()),
    )
    .await;

    // Let both dispatchers pass their startup poll; the catch-all then
    // sleeps 400ms between claims while the small tier polls at 5ms.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let small = submitted_job(
        service
            .submit(
                ExportRequest::new("genus:rare-orchid", "a@example.org"),
                JobKind::IndexBacked,
                None,
                None,
            )
            .await
            .unwrap(),
    );
    let large = submitted_job(
        service
            .submit(
                ExportRequest::new("genus:eucalyptus", "b@example.org"),
                JobKind::IndexBacked,
                None,
                None,
            )
            .await
            .unwrap(),
    );
    assert_eq!(small.estimated_total, 60);
    assert_eq!(large.estimated_total, 60_000);

    wait_for(&service, &small.id, JobStatus::Finished).await;
    wait_for(&service, &large.id, JobStatus::Finished).await;

    let small_worker = search.worker_for("rare").expect("small export recorded");
    let large_worker = search
        .worker_for("eucalyptus")
        .expect("large export recorded");
    assert!(
        small_worker.starts_with("small-"),
        "small job served by {small_worker}"
    );
    assert!(
        large_worker.starts_with("rest-"),
        "large job served by {large_worker}"
    );

    service.shutdown().await;
}

// ── Identifier minting ──────────────────────────────────────────────

#[tokio::test]
async fn successful_mint_cites_the_resolver_in_the_email() {
    let dir = tempfile::tempdir().unwrap();
    let search = StubSearch::new();
    let mailer = Arc::new(CapturingMailer::default());
    let mint = StubMint::succeeding();
    let mut config = base_config(dir.path(), FAST_POOL);
    config.minting.service_url = Some("http://mint.invalid".to_string());
    let service = start_service(config, search, mint.clone(), mailer.clone()).await;

    let mut request = ExportRequest::new("genus:rare-banksia", "carol@example.org");
    request.mint_identifier = true;
    let job = submitted_job(
        service
            .submit(request, JobKind::IndexBacked, None, None)
            .await
            .unwrap(),
    );

    wait_for(&service, &job.id, JobStatus::Finished).await;

    {
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].body.contains("https://doi.org/10.5555/OCC-1"));
    }
    assert_eq!(
        mint.attached.lock().unwrap().as_slice(),
        ["10.5555/OCC-1"]
    );

    let job_dir = StatusStore::new(dir.path().join("exports"))
        .job_dir(&job.id)
        .unwrap();
    let status = read_json(&job_dir.join("status.json"));
    assert_eq!(status["identifier"], "10.5555/OCC-1");

    service.shutdown().await;
}

#[tokio::test]
async fn mint_failure_finishes_with_the_fallback_wording() {
    let dir = tempfile::tempdir().unwrap();
    let search = StubSearch::new();
    let mailer = Arc::new(CapturingMailer::default());
    let mint = StubMint::failing();
    let mut config = base_config(dir.path(), FAST_POOL);
    config.minting.service_url = Some("http://mint.invalid".to_string());
    let service = start_service(config, search, mint, mailer.clone()).await;

    let mut request = ExportRequest::new("genus:rare-acacia", "dave@example.org");
    request.mint_identifier = true;
    let job = submitted_job(
        service
            .submit(request, JobKind::IndexBacked, None, None)
            .await
            .unwrap(),
    );

    // The job still finishes; minting failure never fails an export.
    wait_for(&service, &job.id, JobStatus::Finished).await;

    {
        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0]
            .body
            .contains("No citation identifier could be created for this export."));
        assert!(!sent[0].body.contains("doi.org/10"));
    }

    let job_dir = StatusStore::new(dir.path().join("exports"))
        .job_dir(&job.id)
        .unwrap();
    let status = read_json(&job_dir.join("status.json"));
    assert!(status["identifier"].is_null());
    let stats = read_json(&job_dir.join("stats.json"));
    assert!(stats["mintError"]
        .as_str()
        .expect("stats record the mint error")
        .contains("minting"));

    service.shutdown().await;
}

// ── Durability ──────────────────────────────────────────────────────

#[tokio::test]
async fn spooled_jobs_survive_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    // A pool that only serves index-backed jobs, so a store-backed
    // submission stays spooled across the restart.
    const INDEX_ONLY: &str = r#"[{"label": "idx", "kind": "index-backed", "pollDelayMs": 5}]"#;

    let service = start_service(
        base_config(dir.path(), INDEX_ONLY),
        StubSearch::new(),
        Arc::new(DisabledMinting),
        Arc::new(CapturingMailer::default()),
    )
    .await;
    let job = submitted_job(
        service
            .submit(
                ExportRequest::new("genus:rare-acacia", "erin@example.org"),
                JobKind::StoreBacked,
                None,
                None,
            )
            .await
            .unwrap(),
    );
    service.shutdown().await;

    let revived = start_service(
        base_config(dir.path(), INDEX_ONLY),
        StubSearch::new(),
        Arc::new(DisabledMinting),
        Arc::new(CapturingMailer::default()),
    )
    .await;
    let report = revived
        .status(&job.id)
        .await
        .unwrap()
        .expect("job survived the restart");
    assert_eq!(report.status, JobStatus::Queued);
    assert_eq!(report.queue_position, Some(0));
    revived.shutdown().await;
}

//! Shared fixtures for this crate's unit tests.

use std::path::Path;

use async_trait::async_trait;

use bioexport_core::config::{
    EmailConfig, LimitsConfig, LinksConfig, MintingConfig, PathsConfig, SearchConfig,
};
use bioexport_core::{ExportConfig, ExportRequest};
use bioexport_notify::{Mailer, NotifyError};
use bioexport_queue::ExportJob;

use crate::error::ServiceError;
use crate::signal::Signal;
use crate::traits::{SearchEngine, SourceCounts};

/// Baseline config rooted at a temp directory. Tests mutate the
/// returned value for their scenario.
pub(crate) fn test_config(export_dir: &Path) -> ExportConfig {
    ExportConfig {
        profile: "test".into(),
        paths: PathsConfig {
            export_dir: export_dir.into(),
            spool_dir: export_dir.join("spool"),
            template_dir: None,
        },
        limits: LimitsConfig {
            max_records: 100_000,
            shared_pool_size: 10,
            pools_json: None,
        },
        email: EmailConfig {
            enabled: true,
            from: "exports@example.org".into(),
            support: Some("ops@example.org".into()),
            smtp_host: "localhost".into(),
            smtp_port: 25,
            completion_subject: "Your occurrence export is ready".into(),
            failure_subject: "Your occurrence export failed".into(),
        },
        minting: MintingConfig {
            service_url: None,
            resolver_base: "https://doi.org/".into(),
            propagation_delay_ms: 0,
            failure_message: "No identifier could be created for this export.".into(),
        },
        links: LinksConfig {
            base_url: "http://hub.example.org/exports".into(),
            search_ui_url: "http://hub.example.org/search".into(),
            my_exports_url: "http://hub.example.org/my-exports".into(),
            hub_name: "Test Hub".into(),
        },
        search: SearchConfig {
            service_url: "http://search.example.org/ws".into(),
        },
    }
}

/// Search engine whose count is fixed and whose export writes a
/// one-line archive.
pub(crate) struct FixedCountSearch(pub u64);

#[async_trait]
impl SearchEngine for FixedCountSearch {
    async fn count(&self, _request: &ExportRequest) -> Result<u64, ServiceError> {
        Ok(self.0)
    }

    async fn export(
        &self,
        _job: &ExportJob,
        dest: &Path,
        _cancel: &Signal,
    ) -> Result<SourceCounts, ServiceError> {
        tokio::fs::write(dest, b"archive").await?;
        Ok(SourceCounts::new())
    }
}

/// Mailer that accepts everything and records nothing.
pub(crate) struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(
        &self,
        _to: &str,
        _subject: &str,
        _html_body: &str,
        _cc: Option<&str>,
    ) -> Result<(), NotifyError> {
        Ok(())
    }
}

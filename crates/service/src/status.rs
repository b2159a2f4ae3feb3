//! Job status persistence.
//!
//! Each job owns a directory derived from its id; `status.json` inside
//! it is the document callers poll, written on every terminal state
//! and on skip. `stats.json` is a sidecar with export statistics so
//! reporting survives a crash of the in-memory registry.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bioexport_core::{parse_job_id, JobStatus};

use crate::error::ServiceError;
use crate::traits::SourceCounts;

/// The `status.json` document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl StatusRecord {
    fn bare(status: JobStatus) -> Self {
        Self {
            status,
            message: None,
            download_url: None,
            error: None,
            total_records: None,
            identifier: None,
            updated_at: Utc::now(),
        }
    }

    pub fn queued() -> Self {
        Self::bare(JobStatus::Queued)
    }

    pub fn running() -> Self {
        Self::bare(JobStatus::Running)
    }

    pub fn finished(
        download_url: impl Into<String>,
        total_records: u64,
        identifier: Option<String>,
    ) -> Self {
        Self {
            download_url: Some(download_url.into()),
            total_records: Some(total_records),
            identifier,
            ..Self::bare(JobStatus::Finished)
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::bare(JobStatus::Failed)
        }
    }

    pub fn skipped(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::bare(JobStatus::Skipped)
        }
    }

    pub fn cancelled() -> Self {
        Self::bare(JobStatus::Cancelled)
    }
}

/// The `stats.json` sidecar written after a successful export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportStats {
    pub job_id: String,
    pub total_exported: u64,
    pub source_counts: SourceCounts,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mint_error: Option<String>,
}

/// Consolidated answer to a status lookup, across registry, queue,
/// and disk.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_queued: Option<usize>,
}

/// Reads and writes per-job status files under a base directory.
#[derive(Debug, Clone)]
pub struct StatusStore {
    base_dir: PathBuf,
}

impl StatusStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Directory for one job: the submitter hash and submission stamp
    /// from the id become two path segments.
    pub fn job_dir(&self, id: &str) -> Result<PathBuf, ServiceError> {
        let (submitter, stamp) = parse_job_id(id)?;
        Ok(self.base_dir.join(submitter).join(stamp.to_string()))
    }

    pub fn write(&self, id: &str, record: &StatusRecord) -> Result<(), ServiceError> {
        let dir = self.job_dir(id)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(
            dir.join("status.json"),
            serde_json::to_string_pretty(record)?,
        )?;
        Ok(())
    }

    /// `Ok(None)` when no status has ever been written for this id.
    pub fn read(&self, id: &str) -> Result<Option<StatusRecord>, ServiceError> {
        let path = self.job_dir(id)?.join("status.json");
        match std::fs::read_to_string(&path) {
            Ok(body) => Ok(Some(serde_json::from_str(&body)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn write_stats(&self, id: &str, stats: &ExportStats) -> Result<(), ServiceError> {
        let dir = self.job_dir(id)?;
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join("stats.json"), serde_json::to_string_pretty(stats)?)?;
        Ok(())
    }
}

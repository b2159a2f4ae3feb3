use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

/// Which backing store serves an export job. Pools may restrict
/// themselves to one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    IndexBacked,
    StoreBacked,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::IndexBacked => write!(f, "index-backed"),
            JobKind::StoreBacked => write!(f, "store-backed"),
        }
    }
}

/// Lifecycle status of an export job. `finished`, `failed`, `skipped`
/// and `cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Finished,
    Failed,
    Skipped,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished | JobStatus::Failed | JobStatus::Skipped | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Finished => write!(f, "finished"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Skipped => write!(f, "skipped"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Tsv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Tsv => "tsv",
        }
    }
}

/// Which completion email the submitter gets. `Doi` is implied by a
/// successful mint regardless of the requested variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmailTemplate {
    #[default]
    Default,
    Doi,
    Custom,
}

fn default_file_name() -> String {
    "data".to_string()
}

/// Caller-supplied parameters of an export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRequest {
    /// Full-text query over the occurrence index.
    pub query: String,
    /// Additional filter clauses, order-insensitive.
    #[serde(default)]
    pub filters: Vec<String>,
    #[serde(default)]
    pub format: ExportFormat,
    #[serde(default = "default_file_name")]
    pub file_name: String,
    /// Recipient of completion and failure notifications. Required.
    pub email: String,
    /// Include records carrying sensitive-data restrictions.
    #[serde(default)]
    pub include_sensitive: bool,
    /// Mint a persistent identifier for the finished archive.
    #[serde(default)]
    pub mint_identifier: bool,
    #[serde(default)]
    pub template: EmailTemplate,
}

impl ExportRequest {
    pub fn new(query: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            filters: Vec::new(),
            format: ExportFormat::default(),
            file_name: default_file_name(),
            email: email.into(),
            include_sensitive: false,
            mint_identifier: false,
            template: EmailTemplate::default(),
        }
    }

    /// Canonical form used for duplicate detection: submitter email
    /// (lowercased), trimmed query, sorted and deduped filter list,
    /// format, and the sensitive/minting flags. Filter order and
    /// surrounding whitespace do not distinguish two requests; a
    /// different format or sensitivity selection does.
    pub fn dedup_key(&self) -> String {
        let mut filters: Vec<String> = self
            .filters
            .iter()
            .map(|f| f.trim().to_string())
            .filter(|f| !f.is_empty())
            .collect();
        filters.sort();
        filters.dedup();
        format!(
            "{}|{}|{}|{}|{}|{}",
            self.email.trim().to_lowercase(),
            self.query.trim(),
            filters.join("&"),
            self.format.as_str(),
            self.include_sensitive,
            self.mint_identifier,
        )
    }
}

/// Derive the stable job id for a submitter and submission instant:
/// the v5 UUID of the email joined with the millisecond timestamp.
/// Both inputs are persisted with the job, so the id survives restarts.
pub fn derive_job_id(email: &str, submitted_at: DateTime<Utc>) -> String {
    let uuid = Uuid::new_v5(
        &Uuid::NAMESPACE_URL,
        email.trim().to_lowercase().as_bytes(),
    );
    format!("{}-{}", uuid, submitted_at.timestamp_millis())
}

/// Split a job id back into its UUID and submission-millis parts.
/// The UUID segment is fixed-width, so the trailing millis can carry
/// no ambiguity.
pub fn parse_job_id(id: &str) -> Result<(String, i64), CoreError> {
    if id.len() < 38 {
        return Err(CoreError::InvalidJobId(id.to_string()));
    }
    let (uuid, rest) = id.split_at(36);
    Uuid::parse_str(uuid).map_err(|_| CoreError::InvalidJobId(id.to_string()))?;
    let millis = rest
        .strip_prefix('-')
        .and_then(|m| m.parse::<i64>().ok())
        .ok_or_else(|| CoreError::InvalidJobId(id.to_string()))?;
    Ok((uuid.to_string(), millis))
}

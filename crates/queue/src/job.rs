//! The durable unit of work carried from admission to completion.

use bioexport_core::{derive_job_id, ExportRequest, JobKind, JobStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One export job. Serialized verbatim into the spool, so every field
/// needed to resume after a restart lives here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportJob {
    /// Stable id derived from submitter and submission time.
    pub id: String,
    pub request: ExportRequest,
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    pub kind: JobKind,
    /// Result size estimated at admission; drives pool routing.
    pub estimated_total: u64,
    pub status: JobStatus,
    /// Output location, set once execution starts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// Identity of the claiming worker, set at claim time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<String>,
}

impl ExportJob {
    pub fn new(request: ExportRequest, kind: JobKind, estimated_total: u64) -> Self {
        Self::new_at(request, kind, estimated_total, Utc::now())
    }

    /// Construct with an explicit submission instant. The id is a pure
    /// function of email and instant, so callers controlling the clock
    /// get reproducible ids.
    pub fn new_at(
        request: ExportRequest,
        kind: JobKind,
        estimated_total: u64,
        submitted_at: DateTime<Utc>,
    ) -> Self {
        let id = derive_job_id(&request.email, submitted_at);
        Self {
            id,
            request,
            submitted_at,
            source_ip: None,
            user_agent: None,
            kind,
            estimated_total,
            status: JobStatus::Queued,
            output_path: None,
            worker: None,
        }
    }

    pub fn with_source(mut self, ip: Option<String>, agent: Option<String>) -> Self {
        self.source_ip = ip;
        self.user_agent = agent;
        self
    }
}

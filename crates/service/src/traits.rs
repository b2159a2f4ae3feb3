//! Seams to the external collaborators: occurrence search/export and
//! identifier minting. Production wiring lives in [`crate::clients`];
//! tests substitute mocks.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use bioexport_core::ExportRequest;
use bioexport_queue::ExportJob;

use crate::error::ServiceError;
use crate::signal::Signal;

/// Records exported per source data provider.
pub type SourceCounts = BTreeMap<String, u64>;

/// The occurrence search service.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Estimated result size for a request, retrieving zero rows.
    async fn count(&self, request: &ExportRequest) -> Result<u64, ServiceError>;

    /// Stream the export archive to `dest`, observing `cancel` at
    /// suspension points. Returns per-provider record counts.
    async fn export(
        &self,
        job: &ExportJob,
        dest: &Path,
        cancel: &Signal,
    ) -> Result<SourceCounts, ServiceError>;
}

/// Citation metadata sent when minting an identifier.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintMetadata {
    pub title: String,
    pub query: String,
    pub search_url: String,
    pub total_records: u64,
    pub source_counts: SourceCounts,
    pub submitter: String,
}

/// A successfully minted identifier.
#[derive(Debug, Clone, Deserialize)]
pub struct MintedId {
    pub identifier: String,
}

/// The external identifier-minting service.
#[async_trait]
pub trait MintingService: Send + Sync {
    async fn mint(&self, metadata: &MintMetadata) -> Result<MintedId, ServiceError>;

    /// Attach the finished archive to an already-minted identifier.
    async fn attach_file(&self, identifier: &str, file: &Path) -> Result<(), ServiceError>;
}

//! HTTP implementations of the external collaborators.

use std::path::Path;

use async_trait::async_trait;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

use bioexport_core::ExportRequest;
use bioexport_queue::ExportJob;

use crate::error::ServiceError;
use crate::signal::Signal;
use crate::traits::{MintMetadata, MintedId, MintingService, SearchEngine, SourceCounts};

// ── Occurrence search ────────────────────────────────────────────────

/// Occurrence search service spoken to over HTTP.
pub struct HttpSearchEngine {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSearchEngine {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str, request: &ExportRequest) -> Result<Url, ServiceError> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path
        ))
        .map_err(|e| ServiceError::external("search", e))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("q", &request.query);
            for filter in &request.filters {
                pairs.append_pair("fq", filter);
            }
        }
        Ok(url)
    }

    /// Per-provider record counts via a facet query. Callers treat a
    /// failure here as non-fatal.
    async fn source_counts(&self, request: &ExportRequest) -> Result<SourceCounts, ServiceError> {
        let mut url = self.endpoint("occurrences/facets", request)?;
        url.query_pairs_mut()
            .append_pair("facets", "dataResourceName");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::external("search", e))?;
        if !response.status().is_success() {
            return Err(ServiceError::external(
                "search",
                format!("facet call returned {}", response.status()),
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::external("search", e))?;
        Ok(parse_facet_counts(&body))
    }
}

/// Facet responses arrive as `[{"fieldResult": [{"label", "count"}]}]`.
fn parse_facet_counts(body: &serde_json::Value) -> SourceCounts {
    let mut counts = SourceCounts::new();
    let results = body
        .as_array()
        .and_then(|facets| facets.first())
        .and_then(|facet| facet["fieldResult"].as_array());
    if let Some(results) = results {
        for entry in results {
            if let (Some(label), Some(count)) = (entry["label"].as_str(), entry["count"].as_u64()) {
                counts.insert(label.to_string(), count);
            }
        }
    }
    counts
}

#[async_trait]
impl SearchEngine for HttpSearchEngine {
    async fn count(&self, request: &ExportRequest) -> Result<u64, ServiceError> {
        let mut url = self.endpoint("occurrences/search", request)?;
        url.query_pairs_mut().append_pair("pageSize", "0");

        debug!(%url, "count request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::external("search", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::external(
                "search",
                format!("count returned {status}: {body}"),
            ));
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ServiceError::external("search", e))?;
        body["totalRecords"].as_u64().ok_or_else(|| {
            ServiceError::external("search", "missing totalRecords in count response")
        })
    }

    async fn export(
        &self,
        job: &ExportJob,
        dest: &Path,
        cancel: &Signal,
    ) -> Result<SourceCounts, ServiceError> {
        let mut url = self.endpoint("occurrences/export", &job.request)?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("format", job.request.format.as_str());
            pairs.append_pair("fileName", &job.request.file_name);
            if job.request.include_sensitive {
                pairs.append_pair("includeSensitive", "true");
            }
        }

        debug!(job = %job.id, %url, "export request");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ServiceError::external("search", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Export(format!(
                "export returned {status}: {body}"
            )));
        }

        let mut stream = response.bytes_stream();
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            if cancel.is_triggered() {
                return Err(ServiceError::Cancelled);
            }
            let chunk = chunk.map_err(|e| ServiceError::Export(e.to_string()))?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;

        match self.source_counts(&job.request).await {
            Ok(counts) => Ok(counts),
            Err(e) => {
                warn!(job = %job.id, error = %e, "facet counts unavailable");
                Ok(SourceCounts::new())
            }
        }
    }
}

// ── Identifier minting ───────────────────────────────────────────────

/// Identifier minting service spoken to over HTTP.
pub struct HttpMintingService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpMintingService {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl MintingService for HttpMintingService {
    async fn mint(&self, metadata: &MintMetadata) -> Result<MintedId, ServiceError> {
        let url = self.endpoint("mint");
        debug!(%url, records = metadata.total_records, "mint request");
        let response = self
            .client
            .post(&url)
            .json(metadata)
            .send()
            .await
            .map_err(|e| ServiceError::external("minting", e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::external(
                "minting",
                format!("mint returned {status}: {body}"),
            ));
        }
        response
            .json()
            .await
            .map_err(|e| ServiceError::external("minting", e))
    }

    async fn attach_file(&self, identifier: &str, file: &Path) -> Result<(), ServiceError> {
        let bytes = tokio::fs::read(file).await?;
        let file_name = file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("export.zip")
            .to_string();
        let response = self
            .client
            .post(self.endpoint("attach"))
            .query(&[("identifier", identifier), ("fileName", file_name.as_str())])
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(bytes)
            .send()
            .await
            .map_err(|e| ServiceError::external("minting", e))?;
        if !response.status().is_success() {
            return Err(ServiceError::external(
                "minting",
                format!("attach returned {}", response.status()),
            ));
        }
        Ok(())
    }
}

/// Stands in when no minting service is configured. Every call fails,
/// which the executor's fallback path absorbs.
pub struct DisabledMinting;

#[async_trait]
impl MintingService for DisabledMinting {
    async fn mint(&self, _metadata: &MintMetadata) -> Result<MintedId, ServiceError> {
        Err(ServiceError::external(
            "minting",
            "minting service not configured",
        ))
    }

    async fn attach_file(&self, _identifier: &str, _file: &Path) -> Result<(), ServiceError> {
        Err(ServiceError::external(
            "minting",
            "minting service not configured",
        ))
    }
}

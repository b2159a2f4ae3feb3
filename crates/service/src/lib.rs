//! Export service: admission control, tiered dispatch, job execution,
//! and lifecycle management.
//!
//! The [`ExportService`] is the composition root. It owns the durable
//! queue, one dispatcher per configured pool, the shared execution
//! pool, and the executor that drives a claimed job through export,
//! identifier minting, and notification.

pub mod admission;
pub mod clients;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod pools;
pub mod registry;
pub mod service;
pub mod signal;
pub mod status;
#[cfg(test)]
pub(crate) mod testutil;
pub mod traits;

pub use admission::{AdmissionControl, SubmitOutcome};
pub use clients::{DisabledMinting, HttpMintingService, HttpSearchEngine};
pub use error::ServiceError;
pub use pools::PoolConfig;
pub use registry::{ActiveJob, ActiveRegistry};
pub use service::{CancelOutcome, ExportService};
pub use signal::Signal;
pub use status::{ExportStats, StatusRecord, StatusReport, StatusStore};
pub use traits::{MintMetadata, MintedId, MintingService, SearchEngine, SourceCounts};

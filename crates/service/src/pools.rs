//! Worker pool (tier) configuration.
//!
//! Pools with a finite record ceiling act as fast lanes so small
//! exports are not queued behind large ones; the unrestricted
//! catch-all pool guarantees every job is eventually eligible
//! somewhere. Configuration arrives as a JSON array; an invalid or
//! empty array degrades to a single unrestricted pool rather than
//! failing startup.

use serde::{Deserialize, Serialize};
use tracing::warn;

use bioexport_core::config::LimitsConfig;
use bioexport_core::JobKind;

use crate::error::ServiceError;

/// Pool set used when no configuration is supplied.
pub const DEFAULT_POOLS_JSON: &str = r#"[
  {"label": "small-index", "threads": 4, "maxRecords": 50000, "kind": "index-backed",
   "pollDelayMs": 10, "executionDelayMs": 10, "threadPriority": 5},
  {"label": "large-index", "threads": 1, "maxRecords": 100000000, "kind": "index-backed",
   "pollDelayMs": 100, "executionDelayMs": 100, "threadPriority": 1},
  {"label": "small-store", "threads": 1, "maxRecords": 50000, "kind": "store-backed",
   "pollDelayMs": 10, "executionDelayMs": 10, "threadPriority": 5},
  {"label": "default", "threads": 1,
   "pollDelayMs": 1000, "executionDelayMs": 100, "threadPriority": 1}
]"#;

fn default_threads() -> usize {
    1
}

fn default_poll_delay() -> u64 {
    10
}

fn default_priority() -> u8 {
    5
}

/// One dispatcher tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolConfig {
    pub label: String,
    /// Concurrency ceiling: at most this many jobs run at once.
    #[serde(default = "default_threads")]
    pub threads: usize,
    /// Only claim jobs whose estimated total is at or under this.
    /// Unset means any size.
    #[serde(default)]
    pub max_records: Option<u64>,
    /// Only claim jobs of this kind. Unset means any kind.
    #[serde(default)]
    pub kind: Option<JobKind>,
    /// Idle sleep between empty queue polls.
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
    /// Throttle between claiming a job and starting its heavy work.
    #[serde(default)]
    pub execution_delay_ms: u64,
    /// Advisory only; logged at dispatcher start.
    #[serde(default = "default_priority")]
    pub thread_priority: u8,
}

impl PoolConfig {
    /// A pool with no ceiling and no kind filter claims anything.
    pub fn is_catch_all(&self) -> bool {
        self.max_records.is_none() && self.kind.is_none()
    }

    /// The single unrestricted pool synthesized when configuration is
    /// missing, empty, or invalid.
    pub fn fallback() -> Self {
        Self {
            label: "default".to_string(),
            threads: 1,
            max_records: None,
            kind: None,
            poll_delay_ms: 1000,
            execution_delay_ms: 0,
            thread_priority: default_priority(),
        }
    }
}

/// Parse and validate a pool configuration array.
pub fn parse_pools(json: &str) -> Result<Vec<PoolConfig>, ServiceError> {
    let pools: Vec<PoolConfig> =
        serde_json::from_str(json).map_err(|e| ServiceError::Pools(e.to_string()))?;
    validate(&pools)?;
    Ok(pools)
}

fn validate(pools: &[PoolConfig]) -> Result<(), ServiceError> {
    let mut seen = std::collections::HashSet::new();
    for pool in pools {
        if pool.label.trim().is_empty() {
            return Err(ServiceError::Pools("pool label must not be empty".into()));
        }
        if pool.threads == 0 {
            return Err(ServiceError::Pools(format!(
                "pool '{}' must have at least one thread",
                pool.label
            )));
        }
        if !(1..=10).contains(&pool.thread_priority) {
            return Err(ServiceError::Pools(format!(
                "pool '{}' priority {} is outside 1..=10",
                pool.label, pool.thread_priority
            )));
        }
        if !seen.insert(pool.label.clone()) {
            return Err(ServiceError::Pools(format!(
                "duplicate pool label '{}'",
                pool.label
            )));
        }
    }

    let catch_alls = pools.iter().filter(|p| p.is_catch_all()).count();
    if catch_alls == 0 && !pools.is_empty() {
        warn!("no catch-all pool configured; oversized jobs will never be claimed");
    }
    if catch_alls > 1 {
        warn!(count = catch_alls, "more than one catch-all pool configured");
    }
    Ok(())
}

/// Resolve the pool set to run: the configured JSON if present and
/// valid, the built-in default set otherwise, and a single
/// unrestricted pool when the configuration is unusable.
pub fn effective_pools(limits: &LimitsConfig) -> Vec<PoolConfig> {
    let source = limits.pools_json.as_deref().unwrap_or(DEFAULT_POOLS_JSON);
    match parse_pools(source) {
        Ok(pools) if !pools.is_empty() => pools,
        Ok(_) => {
            warn!("pool configuration is empty, synthesizing one unrestricted pool");
            vec![PoolConfig::fallback()]
        }
        Err(e) => {
            warn!(error = %e, "pool configuration unusable, synthesizing one unrestricted pool");
            vec![PoolConfig::fallback()]
        }
    }
}

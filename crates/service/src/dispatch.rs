//! Per-pool dispatch loops.
//!
//! Each configured pool runs one dispatcher: acquire a pool permit,
//! claim the next matching job, register it, then hand it to the
//! shared execution pool. The permit travels with the job and is
//! released only when the job reaches a terminal state, so in-flight
//! jobs per pool never exceed the pool's thread count.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use bioexport_core::JobStatus;
use bioexport_queue::{ExportJob, PersistentQueue};

use crate::executor::JobExecutor;
use crate::pools::PoolConfig;
use crate::registry::ActiveRegistry;
use crate::signal::Signal;

/// Bounded pool shared by every dispatcher for the heavy export work.
#[derive(Clone)]
pub struct SharedPool {
    permits: Arc<Semaphore>,
}

impl SharedPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// `None` only if the semaphore is closed, which this crate never
    /// does.
    async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        self.permits.clone().acquire_owned().await.ok()
    }
}

/// One claim loop bound to one pool configuration.
pub struct PoolDispatcher {
    pool: PoolConfig,
    queue: Arc<PersistentQueue>,
    registry: Arc<ActiveRegistry>,
    shared: SharedPool,
    executor: Arc<JobExecutor>,
    stop: Signal,
    interrupt: Signal,
    claims: AtomicU64,
}

impl PoolDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PoolConfig,
        queue: Arc<PersistentQueue>,
        registry: Arc<ActiveRegistry>,
        shared: SharedPool,
        executor: Arc<JobExecutor>,
        stop: Signal,
        interrupt: Signal,
    ) -> Self {
        Self {
            pool,
            queue,
            registry,
            shared,
            executor,
            stop,
            interrupt,
            claims: AtomicU64::new(0),
        }
    }

    /// Spawn the dispatch loop onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        info!(
            pool = %self.pool.label,
            threads = self.pool.threads,
            ceiling = ?self.pool.max_records,
            kind = ?self.pool.kind,
            priority = self.pool.thread_priority,
            "dispatcher started"
        );
        let permits = Arc::new(Semaphore::new(self.pool.threads));

        loop {
            if self.stop.is_triggered() {
                break;
            }
            let permit = tokio::select! {
                acquired = permits.clone().acquire_owned() => match acquired {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = self.stop.triggered() => break,
            };

            match self.queue.claim_next(self.pool.max_records, self.pool.kind) {
                Ok(Some(job)) => self.dispatch(job, permit).await,
                Ok(None) => {
                    drop(permit);
                    if self.idle_sleep().await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(pool = %self.pool.label, error = %e, "claim failed");
                    if self.idle_sleep().await {
                        break;
                    }
                }
            }
        }
        info!(pool = %self.pool.label, "dispatcher stopped");
    }

    /// Returns true when the stop signal ended the sleep.
    async fn idle_sleep(&self) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_millis(self.pool.poll_delay_ms)) => false,
            _ = self.stop.triggered() => true,
        }
    }

    async fn dispatch(&self, mut job: ExportJob, permit: OwnedSemaphorePermit) {
        let seq = self.claims.fetch_add(1, Ordering::SeqCst) + 1;
        job.status = JobStatus::Running;
        job.worker = Some(format!("{}-{}", self.pool.label, seq));
        let entry = self.registry.insert(job, &self.pool.label);
        debug!(
            pool = %self.pool.label,
            job = %entry.job.id,
            active = self.registry.count_for_pool(&self.pool.label),
            "job dispatched"
        );

        // Deliberate throttle before heavy work, distinct from the
        // idle poll sleep.
        if self.pool.execution_delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.pool.execution_delay_ms)).await;
        }

        let executor = self.executor.clone();
        let interrupt = self.interrupt.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            // Held until the job reaches a terminal state.
            let _pool_permit = permit;
            tokio::select! {
                acquired = shared.acquire() => {
                    if let Some(_shared_permit) = acquired {
                        executor.run(entry, &interrupt).await;
                    }
                }
                _ = interrupt.triggered() => {
                    warn!(job = %entry.job.id, "interrupted while waiting for the shared pool");
                }
            }
        });
    }
}

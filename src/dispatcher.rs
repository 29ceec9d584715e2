// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Background job scheduling.
//!
//! Work that must not block a handler (delayed flushes) is wrapped in a
//! [`Job`] and handed to a [`Dispatcher`]. The engine only needs
//! `schedule(job, delay)`; an embedding engine can route jobs onto its own
//! executor by implementing the trait.
//!
//! [`TokioDispatcher`] spawns each job as a tokio task and keeps its handle so
//! shutdown can wait for outstanding work.

use crate::metrics;
use crate::store::StoreResult;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type JobFuture = Pin<Box<dyn Future<Output = StoreResult<()>> + Send + 'static>>;

/// A unit of deferred work with a human-readable description.
pub struct Job {
    description: String,
    future: JobFuture,
}

impl Job {
    pub fn new(
        description: impl Into<String>,
        future: impl Future<Output = StoreResult<()>> + Send + 'static,
    ) -> Self {
        Self {
            description: description.into(),
            future: Box::pin(future),
        }
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the job to completion, logging failure.
    pub async fn run(self) {
        match self.future.await {
            Ok(()) => {
                debug!(job = %self.description, "Job completed");
                metrics::record_dispatcher_job("completed");
            }
            Err(e) => {
                warn!(job = %self.description, error = %e, "Job failed");
                metrics::record_dispatcher_job("failed");
            }
        }
    }
}

impl std::fmt::Debug for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Something that can run jobs later.
pub trait Dispatcher: Send + Sync + 'static {
    /// Run `job` after `delay`. Must not block the caller.
    fn schedule(&self, job: Job, delay: Duration);

    /// Wait up to `timeout` for scheduled jobs. Returns how many finished.
    ///
    /// Default implementation has nothing to wait for.
    fn drain(&self, _timeout: Duration) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async { 0 })
    }

    /// Number of jobs scheduled and not yet finished.
    fn pending(&self) -> usize {
        0
    }
}

/// Dispatcher backed by `tokio::spawn`.
///
/// Must be used from within a tokio runtime.
#[derive(Default)]
pub struct TokioDispatcher {
    next_id: AtomicU64,
    handles: DashMap<u64, JoinHandle<()>>,
}

impl TokioDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn prune_finished(&self) {
        self.handles.retain(|_, handle| !handle.is_finished());
    }
}

impl Dispatcher for TokioDispatcher {
    fn schedule(&self, job: Job, delay: Duration) {
        self.prune_finished();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(job = %job.description(), delay = ?delay, "Scheduling job");
        let handle = tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            job.run().await;
        });
        self.handles.insert(id, handle);
    }

    fn drain(&self, timeout: Duration) -> Pin<Box<dyn Future<Output = usize> + Send + '_>> {
        Box::pin(async move {
            let ids: Vec<u64> = self.handles.iter().map(|e| *e.key()).collect();
            let handles: Vec<_> = ids
                .into_iter()
                .filter_map(|id| self.handles.remove(&id).map(|(_, h)| h))
                .collect();

            let deadline = tokio::time::Instant::now() + timeout;
            let mut finished = 0;
            for (i, mut handle) in handles.into_iter().enumerate() {
                match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(Ok(())) => finished += 1,
                    Ok(Err(e)) => {
                        warn!(job = i + 1, error = %e, "Job panicked during drain");
                    }
                    Err(_) => {
                        warn!(job = i + 1, "Job timed out during drain, aborting");
                        handle.abort();
                        metrics::record_dispatcher_job("timed_out");
                    }
                }
            }
            finished
        })
    }

    fn pending(&self) -> usize {
        self.prune_finished();
        self.handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_job_runs_after_delay() {
        tokio::time::pause();
        let dispatcher = TokioDispatcher::new();
        let ran = Arc::new(AtomicUsize::new(0));
        let ran_clone = Arc::clone(&ran);

        dispatcher.schedule(
            Job::new("count", async move {
                ran_clone.fetch_add(1, Ordering::SeqCst);
                Ok::<(), StoreError>(())
            }),
            Duration::from_secs(5),
        );

        tokio::time::advance(Duration::from_secs(1)).await;
        tokio::task::yield_now().await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.pending(), 1);

        assert_eq!(dispatcher.drain(Duration::from_secs(10)).await, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_job_still_counts_as_finished() {
        let dispatcher = TokioDispatcher::new();
        dispatcher.schedule(
            Job::new("fails", async { Err::<(), _>(StoreError("boom".into())) }),
            Duration::ZERO,
        );
        assert_eq!(dispatcher.drain(Duration::from_secs(1)).await, 1);
    }

    #[tokio::test]
    async fn test_drain_times_out_and_aborts() {
        tokio::time::pause();
        let dispatcher = TokioDispatcher::new();
        dispatcher.schedule(
            Job::new("forever", std::future::pending::<StoreResult<()>>()),
            Duration::ZERO,
        );
        assert_eq!(dispatcher.drain(Duration::from_millis(50)).await, 0);
        assert_eq!(dispatcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_drain_empty() {
        let dispatcher = TokioDispatcher::new();
        assert_eq!(dispatcher.drain(Duration::from_millis(1)).await, 0);
    }

    #[test]
    fn test_job_debug_shows_description() {
        let job = Job::new("flush vb 3", async { Ok::<(), StoreError>(()) });
        assert_eq!(job.description(), "flush vb 3");
        assert!(format!("{:?}", job).contains("flush vb 3"));
    }
}

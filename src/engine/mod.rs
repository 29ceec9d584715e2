// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication engine facade.
//!
//! The entry point the dispatch layer calls once per decoded event. Each
//! call:
//! 1. Checks the engine is running and the handler is enabled
//! 2. Looks up (or lazily creates) the connection's [`Consumer`]
//! 3. Runs the handler
//! 4. Translates the outcome into a [`Status`]
//!
//! Nothing here returns an error or panics: every failure becomes a status.
//! On [`Status::Disconnect`] the caller is expected to drop the connection
//! and call [`disconnect()`](ReplicationEngine::disconnect).
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_consumer::{ReplicationConfig, ReplicationEngine, Status};
//! use replica_consumer::events::MutationEvent;
//! use replica_consumer::item::Vbid;
//!
//! # async fn example() -> replica_consumer::Result<()> {
//! let engine = ReplicationEngine::new(ReplicationConfig::for_testing("node-1"))?;
//!
//! let conn = 17;
//! assert_eq!(engine.open_stream(conn, 1, Vbid(0), 0).await, Status::Success);
//! let event = MutationEvent::new("user:1", b"{}".to_vec(), Vbid(0)).with_rev_seqno(3);
//! assert_eq!(engine.mutation(conn, event).await, Status::Success);
//!
//! engine.disconnect(conn).await;
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod types;

pub use types::{EngineState, HealthCheck};

use crate::cas::CasGenerator;
use crate::config::ReplicationConfig;
use crate::consumer::{ConnectionId, Consumer, ConsumerContext};
use crate::dispatcher::{Dispatcher, TokioDispatcher};
use crate::error::{ReplicationError, Result, Status};
use crate::events::{DeletionEvent, EventKind, MutationEvent};
use crate::item::{VBucketState, Vbid};
use crate::metrics;
use crate::registry::ConnectionRegistry;
use crate::store::{MemoryStore, VBucketStore};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How long shutdown waits for scheduled jobs before aborting them.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// The replication consumer engine.
///
/// Owns the connection registry and the collaborators every consumer
/// shares: the store, the CAS generator and the dispatcher.
pub struct ReplicationEngine<S: VBucketStore = MemoryStore> {
    config: ReplicationConfig,

    /// Local storage (passed in by the embedding engine)
    store: Arc<S>,

    /// CAS source shared by all consumers
    cas: Arc<CasGenerator>,

    /// Runs delayed flushes
    dispatcher: Arc<dyn Dispatcher>,

    registry: ConnectionRegistry<S>,

    /// Engine state (broadcast to watchers)
    state_tx: watch::Sender<EngineState>,

    /// Engine state receiver (for internal use)
    state_rx: watch::Receiver<EngineState>,
}

impl ReplicationEngine<MemoryStore> {
    /// Create an engine over an in-memory store (standalone mode and tests).
    pub fn new(config: ReplicationConfig) -> Result<Self> {
        Self::with_store(config, Arc::new(MemoryStore::new()))
    }
}

impl<S: VBucketStore> ReplicationEngine<S> {
    /// Create an engine over the embedding engine's store.
    ///
    /// Delayed jobs run on the current tokio runtime.
    pub fn with_store(config: ReplicationConfig, store: Arc<S>) -> Result<Self> {
        Self::with_parts(
            config,
            store,
            Arc::new(TokioDispatcher::new()),
            Arc::new(CasGenerator::new()),
        )
    }

    /// Create an engine with every collaborator supplied.
    ///
    /// Use this to share a CAS generator with local client writes or to run
    /// jobs on the embedding engine's own scheduler.
    pub fn with_parts(
        config: ReplicationConfig,
        store: Arc<S>,
        dispatcher: Arc<dyn Dispatcher>,
        cas: Arc<CasGenerator>,
    ) -> Result<Self> {
        config.validate()?;

        let context = ConsumerContext {
            store: Arc::clone(&store),
            cas: Arc::clone(&cas),
            dispatcher: Arc::clone(&dispatcher),
            flush_delay: config.settings.flush_delay_duration(),
            enforce_snapshot_order: config.settings.enforce_snapshot_order,
            pending_flushes: Arc::default(),
        };
        let registry = ConnectionRegistry::new(context, config.registry.max_connections);
        let (state_tx, state_rx) = watch::channel(EngineState::Running);

        info!(
            node_id = %config.node_id,
            flush_delay = %config.settings.flush_delay,
            disabled_events = ?config.settings.disabled_events,
            max_connections = config.registry.max_connections,
            "Replication engine ready"
        );
        metrics::set_engine_state("Running");

        Ok(Self {
            config,
            store,
            cas,
            dispatcher,
            registry,
            state_tx,
            state_rx,
        })
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Event entry points
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn open_stream(&self, conn: ConnectionId, opaque: u32, vbucket: Vbid, flags: u32) -> Status {
        self.with_consumer(conn, EventKind::OpenStream, move |c| async move {
            c.open_stream(opaque, vbucket, flags).await
        })
        .await
    }

    pub async fn close_stream(&self, conn: ConnectionId, vbucket: Vbid) -> Status {
        self.with_existing(conn, EventKind::CloseStream, move |c| async move {
            match c {
                Some(c) => c.close_stream(vbucket).await,
                None => Ok(()),
            }
        })
        .await
    }

    pub async fn stream_end(&self, conn: ConnectionId, opaque: u32, vbucket: Vbid, flags: u32) -> Status {
        self.with_existing(conn, EventKind::StreamEnd, move |c| async move {
            match c {
                Some(c) => c.stream_end(opaque, vbucket, flags).await,
                None => Ok(()),
            }
        })
        .await
    }

    pub async fn snapshot_marker(&self, conn: ConnectionId, opaque: u32, vbucket: Vbid) -> Status {
        self.with_existing(conn, EventKind::SnapshotMarker, move |c| async move {
            match c {
                Some(c) => c.snapshot_marker(opaque, vbucket).await,
                None => {
                    metrics::record_protocol_violation("marker_without_stream");
                    Err(ReplicationError::protocol(
                        vbucket,
                        "snapshot marker on a connection with no streams",
                    ))
                }
            }
        })
        .await
    }

    pub async fn mutation(&self, conn: ConnectionId, event: MutationEvent) -> Status {
        self.with_consumer(conn, EventKind::Mutation, move |c| async move {
            c.mutation(event).await.map(|_| ())
        })
        .await
    }

    pub async fn deletion(&self, conn: ConnectionId, event: DeletionEvent) -> Status {
        self.with_consumer(conn, EventKind::Deletion, move |c| async move {
            c.deletion(event).await.map(|_| ())
        })
        .await
    }

    pub async fn expiration(&self, conn: ConnectionId, event: DeletionEvent) -> Status {
        self.with_consumer(conn, EventKind::Expiration, move |c| async move {
            c.expiration(event).await.map(|_| ())
        })
        .await
    }

    /// Flush every vbucket. `vbucket` identifies the requesting stream only.
    pub async fn flush(&self, conn: ConnectionId, opaque: u32, vbucket: Vbid) -> Status {
        self.with_consumer(conn, EventKind::Flush, move |c| async move {
            c.flush(opaque, vbucket).await
        })
        .await
    }

    pub async fn set_vbucket_state(
        &self,
        conn: ConnectionId,
        opaque: u32,
        vbucket: Vbid,
        state: VBucketState,
    ) -> Status {
        self.with_consumer(conn, EventKind::SetVbucketState, move |c| async move {
            c.set_vbucket_state(opaque, vbucket, state).await
        })
        .await
    }

    /// Tear down the consumer for `conn`. Idempotent.
    pub async fn disconnect(&self, conn: ConnectionId) -> Status {
        if !self.is_running() {
            return Status::Disconnect;
        }
        match self.registry.remove(conn).await {
            Some(_) => debug!(conn, "Connection disconnected"),
            None => debug!(conn, "Disconnect for unknown connection"),
        }
        Status::Success
    }

    fn admit(&self, kind: EventKind) -> Result<()> {
        if !self.is_running() {
            return Err(ReplicationError::Shutdown);
        }
        if !self.config.settings.is_enabled(kind) {
            return Err(ReplicationError::Unsupported(kind));
        }
        Ok(())
    }

    /// Run a handler that needs a consumer, creating it on first use.
    async fn with_consumer<F, Fut>(&self, conn: ConnectionId, kind: EventKind, handler: F) -> Status
    where
        F: FnOnce(Arc<Consumer<S>>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        metrics::record_event_received(kind);
        let start = Instant::now();
        let result: Result<()> = match self
            .admit(kind)
            .and_then(|()| self.registry.get_or_create(conn))
        {
            Ok(consumer) => handler(consumer).await,
            Err(e) => Err(e),
        };
        self.finish(conn, kind, start, result)
    }

    /// Run a handler against the existing consumer, if any.
    async fn with_existing<F, Fut>(&self, conn: ConnectionId, kind: EventKind, handler: F) -> Status
    where
        F: FnOnce(Option<Arc<Consumer<S>>>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        metrics::record_event_received(kind);
        let start = Instant::now();
        let result: Result<()> = match self.admit(kind) {
            Ok(()) => handler(self.registry.get(conn)).await,
            Err(e) => Err(e),
        };
        self.finish(conn, kind, start, result)
    }

    fn finish(&self, conn: ConnectionId, kind: EventKind, start: Instant, result: Result<()>) -> Status {
        let status = match result {
            Ok(()) => Status::Success,
            Err(e) => {
                metrics::record_error(kind, e.kind());
                if e.is_fatal() {
                    warn!(conn, %kind, error = %e, "Event failed, connection must be dropped");
                } else {
                    debug!(conn, %kind, error = %e, "Event rejected");
                }
                e.status()
            }
        };
        metrics::record_event_status(kind, status);
        metrics::record_event_latency(kind, start.elapsed());
        status
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Get current engine state.
    pub fn state(&self) -> EngineState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<EngineState> {
        self.state_rx.clone()
    }

    /// Check if engine is running.
    pub fn is_running(&self) -> bool {
        matches!(self.state(), EngineState::Running)
    }

    /// Get health status for monitoring endpoints.
    ///
    /// No store I/O beyond the backpressure hint.
    pub async fn health_check(&self) -> HealthCheck {
        let state = self.state();
        let store_accepting_writes = self.store.should_accept_writes();
        let ready = state == EngineState::Running;

        HealthCheck {
            state,
            ready,
            healthy: ready && store_accepting_writes,
            store_accepting_writes,
            active_connections: self.registry.len(),
            max_connections: self.registry.max_connections(),
            open_streams: self.registry.open_stream_count().await,
            pending_jobs: self.dispatcher.pending(),
            consumers_created_total: self.registry.created_total(),
        }
    }

    /// Shut the engine down gracefully.
    ///
    /// 1. Stop admitting events (they get `Disconnect`)
    /// 2. Wait for scheduled jobs (with timeout)
    /// 3. Tear down every consumer
    pub async fn shutdown(&self) {
        if !self.is_running() {
            debug!(state = %self.state(), "Shutdown already in progress or complete");
            return;
        }
        info!("Shutting down replication engine");
        let _ = self.state_tx.send(EngineState::ShuttingDown);
        metrics::set_engine_state("ShuttingDown");

        let pending = self.dispatcher.pending();
        if pending > 0 {
            info!(pending, "Waiting for scheduled jobs");
        }
        let finished = self.dispatcher.drain(DRAIN_TIMEOUT).await;

        let removed = self.registry.clear().await;
        metrics::set_active_connections(0);

        let _ = self.state_tx.send(EngineState::Stopped);
        metrics::set_engine_state("Stopped");
        info!(jobs_finished = finished, consumers_removed = removed, "Replication engine stopped");
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accessors
    // ═══════════════════════════════════════════════════════════════════════

    pub fn config(&self) -> &ReplicationConfig {
        &self.config
    }

    pub fn node_id(&self) -> &str {
        &self.config.node_id
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn cas_generator(&self) -> &Arc<CasGenerator> {
        &self.cas
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    /// Get the connection registry (for diagnostics).
    pub fn registry(&self) -> &ConnectionRegistry<S> {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> ReplicationEngine {
        ReplicationEngine::new(ReplicationConfig::for_testing("test-node")).unwrap()
    }

    #[test]
    fn test_engine_initial_state() {
        let engine = engine();
        assert_eq!(engine.state(), EngineState::Running);
        assert!(engine.is_running());
        assert_eq!(engine.node_id(), "test-node");
        assert!(engine.registry().is_empty());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut config = ReplicationConfig::for_testing("bad");
        config.settings.flush_delay = "whenever".to_string();
        let err = ReplicationEngine::new(config).err().unwrap();
        assert!(matches!(err, ReplicationError::Config(_)));
    }

    #[tokio::test]
    async fn test_disabled_event_not_supported_without_side_effects() {
        let mut config = ReplicationConfig::for_testing("n");
        config.settings.disabled_events = vec![EventKind::Mutation];
        let engine = ReplicationEngine::new(config).unwrap();

        let status = engine
            .mutation(1, MutationEvent::new("k", b"v".to_vec(), Vbid(0)))
            .await;
        assert_eq!(status, Status::NotSupported);
        // No consumer was created and nothing stored
        assert!(engine.registry().is_empty());
        assert!(engine.store().is_empty());
    }

    #[tokio::test]
    async fn test_close_on_unknown_connection_is_success() {
        let engine = engine();
        assert_eq!(engine.close_stream(9, Vbid(0)).await, Status::Success);
        assert_eq!(engine.stream_end(9, 1, Vbid(0), 0).await, Status::Success);
        assert!(engine.registry().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_marker_on_unknown_connection_disconnects() {
        let engine = engine();
        assert_eq!(engine.snapshot_marker(9, 1, Vbid(0)).await, Status::Disconnect);
    }

    #[tokio::test]
    async fn test_shutdown_then_everything_disconnects() {
        let engine = engine();
        engine.open_stream(1, 1, Vbid(0), 0).await;
        engine.shutdown().await;

        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(engine.registry().is_empty());
        assert_eq!(
            engine.mutation(1, MutationEvent::new("k", b"v".to_vec(), Vbid(0))).await,
            Status::Disconnect
        );
        assert_eq!(engine.open_stream(2, 1, Vbid(0), 0).await, Status::Disconnect);
        assert_eq!(engine.disconnect(1).await, Status::Disconnect);

        // Second shutdown is a no-op
        engine.shutdown().await;
        assert_eq!(engine.state(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_state_receiver_sees_shutdown() {
        let engine = engine();
        let rx = engine.state_receiver();
        assert_eq!(*rx.borrow(), EngineState::Running);
        engine.shutdown().await;
        assert_eq!(*rx.borrow(), EngineState::Stopped);
    }

    #[tokio::test]
    async fn test_health_check() {
        let engine = engine();
        engine.open_stream(1, 1, Vbid(0), 0).await;
        engine.open_stream(1, 2, Vbid(1), 0).await;
        engine.open_stream(2, 3, Vbid(0), 0).await;

        let health = engine.health_check().await;
        assert!(health.ready);
        assert!(health.healthy);
        assert_eq!(health.active_connections, 2);
        assert_eq!(health.open_streams, 3);
        assert_eq!(health.consumers_created_total, 2);
        assert_eq!(health.pending_jobs, 0);

        engine.shutdown().await;
        let health = engine.health_check().await;
        assert!(!health.ready);
        assert_eq!(health.active_connections, 0);
    }
}

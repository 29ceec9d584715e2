// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-connection replication consumer.
//!
//! A [`Consumer`] owns the stream state of one producer connection and
//! applies its events to the local [`VBucketStore`]:
//! - Tracks open streams per vbucket (explicit open or implicit on first data)
//! - Assigns CAS values when the producer sends none, once the write has won
//! - Defaults missing revision sequence numbers
//! - Lets the store run conflict resolution inside its per-key lock
//!
//! # Delayed flush
//!
//! With a non-zero `flush_delay` a flush is acknowledged before it runs.
//! Until the scheduled flush completes, every data event on every
//! connection sharing the context is refused with `TemporaryFailure`, so no
//! acknowledged write can be erased by a flush it followed.
//!
//! # Serialization
//!
//! All handlers take the consumer's stream table lock for their whole
//! duration. Teardown takes the same lock and marks the table closed, so an
//! event still in flight when its connection disconnects either finishes
//! first or fails with `ConnectionClosed`. It never re-opens a stream on a
//! consumer that has left the registry.

mod stream;

pub use stream::StreamState;

use crate::cas::CasGenerator;
use crate::conflict::{ConflictResolver, Resolution};
use crate::dispatcher::{Dispatcher, Job};
use crate::error::{ReplicationError, Result};
use crate::events::{DeletionEvent, EventKind, MutationEvent};
use crate::item::{Item, ItemMetadata, VBucketState, Vbid};
use crate::metrics;
use crate::store::{MemoryStore, VBucketStore};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, instrument, warn};

/// Opaque handle identifying a producer connection.
pub type ConnectionId = u64;

/// Shared collaborators handed to every consumer.
pub struct ConsumerContext<S: VBucketStore = MemoryStore> {
    pub store: Arc<S>,
    pub cas: Arc<CasGenerator>,
    pub dispatcher: Arc<dyn Dispatcher>,
    /// Zero flushes inline.
    pub flush_delay: Duration,
    pub enforce_snapshot_order: bool,
    /// Delayed flushes scheduled and not yet finished.
    pub pending_flushes: Arc<AtomicUsize>,
}

impl<S: VBucketStore> Clone for ConsumerContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cas: Arc::clone(&self.cas),
            dispatcher: Arc::clone(&self.dispatcher),
            flush_delay: self.flush_delay,
            enforce_snapshot_order: self.enforce_snapshot_order,
            pending_flushes: Arc::clone(&self.pending_flushes),
        }
    }
}

/// Holds a slot in `pending_flushes` until the flush job is dropped,
/// whether it ran to completion, failed or was aborted.
struct PendingFlush(Arc<AtomicUsize>);

impl PendingFlush {
    fn enter(pending: &Arc<AtomicUsize>) -> Self {
        pending.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(pending))
    }
}

impl Drop for PendingFlush {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Snapshot of a consumer's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub mutations: u64,
    pub deletions: u64,
    pub expirations: u64,
    /// Mutations and deletions dropped by conflict resolution.
    pub ignored: u64,
    pub snapshot_markers: u64,
    pub streams_opened: u64,
    pub flushes: u64,
}

#[derive(Default)]
struct Counters {
    mutations: AtomicU64,
    deletions: AtomicU64,
    expirations: AtomicU64,
    ignored: AtomicU64,
    snapshot_markers: AtomicU64,
    streams_opened: AtomicU64,
    flushes: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

#[derive(Default)]
struct StreamTable {
    streams: HashMap<Vbid, StreamState>,
    /// Set once by teardown; no handler runs after it.
    closed: bool,
}

/// Replication consumer for a single producer connection.
pub struct Consumer<S: VBucketStore = MemoryStore> {
    connection: ConnectionId,
    ctx: ConsumerContext<S>,
    resolver: ConflictResolver,
    table: Mutex<StreamTable>,
    counters: Counters,
}

impl<S: VBucketStore> Consumer<S> {
    pub fn new(connection: ConnectionId, ctx: ConsumerContext<S>) -> Self {
        Self {
            connection,
            resolver: ConflictResolver::with_cas_generator(Arc::clone(&ctx.cas)),
            ctx,
            table: Mutex::new(StreamTable::default()),
            counters: Counters::default(),
        }
    }

    pub fn connection(&self) -> ConnectionId {
        self.connection
    }

    async fn lock(&self) -> Result<MutexGuard<'_, StreamTable>> {
        let table = self.table.lock().await;
        if table.closed {
            return Err(ReplicationError::ConnectionClosed {
                connection: self.connection,
            });
        }
        Ok(table)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Stream lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    /// Open a stream for `vbucket`.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn open_stream(&self, opaque: u32, vbucket: Vbid, flags: u32) -> Result<()> {
        let mut table = self.lock().await?;
        match table.streams.entry(vbucket) {
            Entry::Occupied(existing) => {
                debug!(
                    existing_opaque = existing.get().opaque,
                    "Stream already open"
                );
                Err(ReplicationError::StreamAlreadyOpen { vbucket })
            }
            Entry::Vacant(slot) => {
                slot.insert(StreamState::explicit(opaque, flags));
                bump(&self.counters.streams_opened);
                metrics::record_stream_opened(false);
                info!("Stream opened");
                Ok(())
            }
        }
    }

    /// Close the stream for `vbucket`. Closing a stream that is not open is a no-op.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn close_stream(&self, vbucket: Vbid) -> Result<()> {
        let mut table = self.lock().await?;
        self.release(&mut table, vbucket, "close");
        Ok(())
    }

    /// Producer-initiated end of stream.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn stream_end(&self, opaque: u32, vbucket: Vbid, flags: u32) -> Result<()> {
        let mut table = self.lock().await?;
        self.release(&mut table, vbucket, "end");
        Ok(())
    }

    fn release(&self, table: &mut StreamTable, vbucket: Vbid, reason: &'static str) {
        match table.streams.remove(&vbucket) {
            Some(stream) => {
                metrics::record_stream_closed(reason, 1);
                info!(
                    reason,
                    last_by_seqno = stream.last_by_seqno,
                    implicit = stream.implicit,
                    "Stream closed"
                );
            }
            None => debug!(reason, "No open stream, nothing to release"),
        }
    }

    /// Start a snapshot window on an open stream.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn snapshot_marker(&self, opaque: u32, vbucket: Vbid) -> Result<()> {
        let mut table = self.lock().await?;
        let Some(stream) = table.streams.get_mut(&vbucket) else {
            metrics::record_protocol_violation("marker_without_stream");
            return Err(ReplicationError::protocol(
                vbucket,
                "snapshot marker without an open stream",
            ));
        };
        stream.begin_snapshot();
        bump(&self.counters.snapshot_markers);
        metrics::record_snapshot_marker();
        debug!("Snapshot window started");
        Ok(())
    }

    /// Release every stream and refuse further events.
    ///
    /// Waits for an in-flight handler to finish first. Returns the number of
    /// streams released.
    pub async fn close_all(&self) -> usize {
        let mut table = self.table.lock().await;
        table.closed = true;
        let streams = std::mem::take(&mut table.streams);
        let released = streams.len();
        for (vbucket, stream) in streams {
            debug!(
                conn = self.connection,
                vbucket = %vbucket,
                last_by_seqno = stream.last_by_seqno,
                "Releasing stream on disconnect"
            );
        }
        metrics::record_stream_closed("disconnect", released);
        released
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Data events
    // ═══════════════════════════════════════════════════════════════════════

    /// Apply a mutation, opening the stream implicitly if needed.
    #[instrument(
        skip(self, event),
        fields(conn = self.connection, vbucket = %event.vbucket, key = %event.key, opaque = event.opaque)
    )]
    pub async fn mutation(&self, event: MutationEvent) -> Result<Resolution> {
        let MutationEvent {
            opaque,
            key,
            value,
            cas,
            vbucket,
            flags,
            datatype,
            by_seqno,
            rev_seqno,
            expiration,
            lock_time: _,
        } = event;

        let mut table = self.lock().await?;
        self.ensure_writable(vbucket).await?;
        let stream = self.stream_for_write(&mut table, vbucket, opaque, by_seqno)?;

        self.observe_cas(cas);
        let meta = ItemMetadata::new(cas, rev_seqno, flags, expiration).with_default_rev_seqno();
        let item = Item {
            key,
            vbucket,
            value,
            datatype,
            by_seqno,
            meta,
        };

        let resolution = self
            .ctx
            .store
            .set_with_meta(item, self.resolver.clone())
            .await
            .map_err(|e| ReplicationError::store("set_with_meta", e))?;

        stream.advance(by_seqno);
        bump(&self.counters.mutations);
        self.note_resolution(EventKind::Mutation, resolution, &meta);
        Ok(resolution)
    }

    /// Apply a deletion, opening the stream implicitly if needed.
    pub async fn deletion(&self, event: DeletionEvent) -> Result<Resolution> {
        self.apply_deletion(event, EventKind::Deletion).await
    }

    /// Expirations are applied exactly like deletions.
    pub async fn expiration(&self, event: DeletionEvent) -> Result<Resolution> {
        self.apply_deletion(event, EventKind::Expiration).await
    }

    #[instrument(
        skip(self, event),
        fields(conn = self.connection, vbucket = %event.vbucket, key = %event.key, opaque = event.opaque)
    )]
    async fn apply_deletion(&self, event: DeletionEvent, kind: EventKind) -> Result<Resolution> {
        let DeletionEvent {
            opaque,
            key,
            cas,
            vbucket,
            by_seqno,
            rev_seqno,
        } = event;

        let mut table = self.lock().await?;
        self.ensure_writable(vbucket).await?;
        let stream = self.stream_for_write(&mut table, vbucket, opaque, by_seqno)?;

        self.observe_cas(cas);
        let meta = ItemMetadata::new(cas, rev_seqno, 0, 0).with_default_rev_seqno();
        let resolution = self
            .ctx
            .store
            .delete_with_meta(vbucket, key, meta, self.resolver.clone())
            .await
            .map_err(|e| ReplicationError::store("delete_with_meta", e))?;

        stream.advance(by_seqno);
        match kind {
            EventKind::Expiration => bump(&self.counters.expirations),
            _ => bump(&self.counters.deletions),
        }
        self.note_resolution(kind, resolution, &meta);
        Ok(resolution)
    }

    /// Explicit CAS values raise the generator floor. A zero CAS is left for
    /// the store to stamp if the write wins.
    fn observe_cas(&self, cas: u64) {
        if cas != 0 {
            self.ctx.cas.observe(cas);
        }
    }

    fn note_resolution(&self, kind: EventKind, resolution: Resolution, meta: &ItemMetadata) {
        metrics::record_resolution(kind, resolution);
        if resolution == Resolution::Ignore {
            bump(&self.counters.ignored);
            debug!(
                cas = meta.cas,
                rev_seqno = meta.rev_seqno,
                "Ignored: local copy is same or newer"
            );
        }
    }

    async fn ensure_writable(&self, vbucket: Vbid) -> Result<()> {
        if self.ctx.pending_flushes.load(Ordering::Acquire) > 0 {
            return Err(ReplicationError::NotAcceptingWrites {
                vbucket,
                reason: "flush pending".to_string(),
            });
        }
        if !self.ctx.store.should_accept_writes() {
            return Err(ReplicationError::NotAcceptingWrites {
                vbucket,
                reason: "store is applying backpressure".to_string(),
            });
        }
        let state = self
            .ctx
            .store
            .vbucket_state(vbucket)
            .await
            .map_err(|e| ReplicationError::store("vbucket_state", e))?;
        match state {
            Some(state) if !state.accepts_replication() => Err(ReplicationError::NotAcceptingWrites {
                vbucket,
                reason: format!("vbucket is {}", state),
            }),
            _ => Ok(()),
        }
    }

    /// Stream for a data event: auto-open, then the snapshot order check.
    fn stream_for_write<'a>(
        &self,
        table: &'a mut StreamTable,
        vbucket: Vbid,
        opaque: u32,
        by_seqno: u64,
    ) -> Result<&'a mut StreamState> {
        let stream = table.streams.entry(vbucket).or_insert_with(|| {
            bump(&self.counters.streams_opened);
            metrics::record_stream_opened(true);
            debug!(opaque, "Stream opened implicitly by data event");
            StreamState::implicit(opaque)
        });

        if self.ctx.enforce_snapshot_order {
            if let Err(last) = stream.check_order(by_seqno) {
                metrics::record_protocol_violation("seqno_regression");
                return Err(ReplicationError::protocol(
                    vbucket,
                    format!("by_seqno {} not after {} inside snapshot", by_seqno, last),
                ));
            }
        }
        Ok(stream)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Bucket-wide events
    // ═══════════════════════════════════════════════════════════════════════

    /// Flush the whole keyspace.
    ///
    /// The flush is not scoped to `vbucket`: every partition is truncated.
    /// With a non-zero `flush_delay` the flush is handed to the dispatcher
    /// and this returns immediately; data events are refused until it has run.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn flush(&self, opaque: u32, vbucket: Vbid) -> Result<()> {
        let _table = self.lock().await?;
        let delay = self.ctx.flush_delay;

        if delay.is_zero() {
            self.ctx
                .store
                .flush_all()
                .await
                .map_err(|e| ReplicationError::store("flush_all", e))?;
            metrics::record_flush(false);
            info!("Flushed all vbuckets");
        } else {
            let store = Arc::clone(&self.ctx.store);
            let pending = PendingFlush::enter(&self.ctx.pending_flushes);
            let job = Job::new(
                format!(
                    "Flushing all vbuckets (connection {}, vbucket {})",
                    self.connection, vbucket
                ),
                async move {
                    let _pending = pending;
                    store.flush_all().await
                },
            );
            self.ctx.dispatcher.schedule(job, delay);
            metrics::record_flush(true);
            info!(delay = ?delay, "Scheduled flush of all vbuckets");
        }

        bump(&self.counters.flushes);
        Ok(())
    }

    /// Move `vbucket` to `state`. Setting the current state again is a no-op.
    #[instrument(skip(self), fields(conn = self.connection))]
    pub async fn set_vbucket_state(&self, opaque: u32, vbucket: Vbid, state: VBucketState) -> Result<()> {
        let _table = self.lock().await?;
        let previous = self
            .ctx
            .store
            .set_vbucket_state(vbucket, state)
            .await
            .map_err(|e| ReplicationError::store("set_vbucket_state", e))?;

        if previous == Some(state) {
            debug!("Vbucket already in requested state");
        } else {
            metrics::record_vbucket_state_change(state);
            match previous {
                Some(VBucketState::Dead) => warn!(%state, "Reviving dead vbucket"),
                _ => info!(previous = ?previous, %state, "Vbucket state changed"),
            }
        }
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Introspection
    // ═══════════════════════════════════════════════════════════════════════

    /// Vbuckets with an open stream, ascending.
    pub async fn open_vbuckets(&self) -> Vec<Vbid> {
        let table = self.table.lock().await;
        let mut vbuckets: Vec<Vbid> = table.streams.keys().copied().collect();
        vbuckets.sort_unstable();
        vbuckets
    }

    pub async fn is_open(&self, vbucket: Vbid) -> bool {
        self.table.lock().await.streams.contains_key(&vbucket)
    }

    /// Copy of the stream state for `vbucket`, if open.
    pub async fn stream(&self, vbucket: Vbid) -> Option<StreamState> {
        self.table.lock().await.streams.get(&vbucket).cloned()
    }

    /// Highest applied `by_seqno` on an open stream.
    ///
    /// This is the position a flow-control acknowledgement would report.
    pub async fn last_by_seqno(&self, vbucket: Vbid) -> Option<u64> {
        self.table
            .lock()
            .await
            .streams
            .get(&vbucket)
            .map(|s| s.last_by_seqno)
    }

    /// Whether teardown has run.
    pub async fn is_closed(&self) -> bool {
        self.table.lock().await.closed
    }

    pub fn stats(&self) -> ConsumerStats {
        let c = &self.counters;
        ConsumerStats {
            mutations: c.mutations.load(Ordering::Relaxed),
            deletions: c.deletions.load(Ordering::Relaxed),
            expirations: c.expirations.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            snapshot_markers: c.snapshot_markers.load(Ordering::Relaxed),
            streams_opened: c.streams_opened.load(Ordering::Relaxed),
            flushes: c.flushes.load(Ordering::Relaxed),
        }
    }
}

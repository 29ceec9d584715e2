// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Connection registry.
//!
//! Maps each producer connection to its [`Consumer`]. Consumers are created
//! lazily on the connection's first event and destroyed on disconnect.
//!
//! The map is sharded (`DashMap`), so events on unrelated connections never
//! contend. Creation runs inside the shard's entry lock: when several tasks
//! race on a brand-new connection exactly one consumer is built and every
//! racer gets that one.

use crate::consumer::{Consumer, ConsumerContext, ConnectionId};
use crate::error::{ReplicationError, Result};
use crate::metrics;
use crate::store::{MemoryStore, VBucketStore};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Registry of live consumers keyed by connection.
pub struct ConnectionRegistry<S: VBucketStore = MemoryStore> {
    consumers: DashMap<ConnectionId, Arc<Consumer<S>>>,
    context: ConsumerContext<S>,
    max_connections: usize,
    /// Live entry count, kept beside the map so capacity can be checked
    /// while a shard lock is held.
    live: AtomicUsize,
    created_total: AtomicU64,
}

impl<S: VBucketStore> ConnectionRegistry<S> {
    pub fn new(context: ConsumerContext<S>, max_connections: usize) -> Self {
        Self {
            consumers: DashMap::new(),
            context,
            max_connections,
            live: AtomicUsize::new(0),
            created_total: AtomicU64::new(0),
        }
    }

    /// Existing consumer for `connection`, or a freshly created one.
    pub fn get_or_create(&self, connection: ConnectionId) -> Result<Arc<Consumer<S>>> {
        if let Some(existing) = self.consumers.get(&connection) {
            return Ok(Arc::clone(existing.value()));
        }

        let entry = self
            .consumers
            .entry(connection)
            .or_try_insert_with(|| self.create(connection))?;
        Ok(Arc::clone(entry.value()))
    }

    fn create(&self, connection: ConnectionId) -> Result<Arc<Consumer<S>>> {
        let max = self.max_connections;
        let reserved = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1));

        let live = match reserved {
            Ok(previous) => previous + 1,
            Err(_) => {
                metrics::record_consumer_created(false);
                warn!(conn = connection, max_connections = max, "Connection registry full");
                return Err(ReplicationError::ConsumerCreation {
                    connection,
                    message: format!("registry at capacity ({} connections)", max),
                });
            }
        };

        self.created_total.fetch_add(1, Ordering::Relaxed);
        metrics::record_consumer_created(true);
        metrics::set_active_connections(live);
        info!(conn = connection, live, "Consumer created");
        Ok(Arc::new(Consumer::new(connection, self.context.clone())))
    }

    /// Lookup without creation.
    pub fn get(&self, connection: ConnectionId) -> Option<Arc<Consumer<S>>> {
        self.consumers.get(&connection).map(|r| Arc::clone(r.value()))
    }

    /// Detach the consumer for `connection` and release its streams.
    ///
    /// Returns `None` if the connection had no consumer. Calling it twice is
    /// harmless.
    pub async fn remove(&self, connection: ConnectionId) -> Option<Arc<Consumer<S>>> {
        let (_, consumer) = self.consumers.remove(&connection)?;
        let live = self.live.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        metrics::set_active_connections(live);

        let released = consumer.close_all().await;
        info!(conn = connection, released, live, "Consumer removed");
        Some(consumer)
    }

    /// Remove every consumer. Returns how many were removed.
    pub async fn clear(&self) -> usize {
        let connections = self.connections();
        let mut removed = 0;
        for connection in connections {
            if self.remove(connection).await.is_some() {
                removed += 1;
            }
        }
        debug!(removed, "Registry cleared");
        removed
    }

    /// Connection handles with a live consumer.
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.consumers.iter().map(|r| *r.key()).collect()
    }

    /// All live consumers.
    pub fn all(&self) -> Vec<Arc<Consumer<S>>> {
        self.consumers.iter().map(|r| Arc::clone(r.value())).collect()
    }

    /// Total open streams across all consumers.
    pub async fn open_stream_count(&self) -> usize {
        let mut total = 0;
        for consumer in self.all() {
            total += consumer.open_vbuckets().await.len();
        }
        total
    }

    pub fn len(&self) -> usize {
        self.consumers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty()
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Consumers constructed over the registry's lifetime.
    pub fn created_total(&self) -> u64 {
        self.created_total.load(Ordering::Relaxed)
    }
}

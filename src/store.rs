// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! VBucket store integration trait.
//!
//! Defines what the consumer needs from the local storage engine. The engine
//! that embeds this crate implements [`VBucketStore`] over its hash index;
//! [`MemoryStore`] is a self-contained implementation for standalone mode and
//! tests.
//!
//! # Compare-and-apply
//!
//! Replicated writes race with local client traffic on the same keys, so the
//! store, not the consumer, runs the [`ConflictResolver`]: `set_with_meta`
//! and `delete_with_meta` read the existing metadata, decide and write while
//! holding the store's own per-key lock. A write that arrived without a CAS
//! is stamped through [`ConflictResolver::stamp`] only after it has won,
//! still under that lock.
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_consumer::store::{BoxFuture, StoredMeta, VBucketStore};
//! use replica_consumer::conflict::{ConflictResolver, Resolution};
//! use replica_consumer::item::{Item, ItemMetadata, VBucketState, Vbid};
//!
//! struct MyBackend { /* ... */ }
//!
//! impl VBucketStore for MyBackend {
//!     fn get(&self, _vb: Vbid, _key: &str) -> BoxFuture<'_, Option<Item>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn get_meta(&self, _vb: Vbid, _key: &str) -> BoxFuture<'_, Option<StoredMeta>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn set_with_meta(&self, _item: Item, _r: ConflictResolver) -> BoxFuture<'_, Resolution> {
//!         Box::pin(async move { Ok(Resolution::Apply) })
//!     }
//!     fn delete_with_meta(
//!         &self,
//!         _vb: Vbid,
//!         _key: String,
//!         _meta: ItemMetadata,
//!         _r: ConflictResolver,
//!     ) -> BoxFuture<'_, Resolution> {
//!         Box::pin(async move { Ok(Resolution::Apply) })
//!     }
//!     fn flush_all(&self) -> BoxFuture<'_, ()> {
//!         Box::pin(async move { Ok(()) })
//!     }
//!     fn vbucket_state(&self, _vb: Vbid) -> BoxFuture<'_, Option<VBucketState>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//!     fn set_vbucket_state(&self, _vb: Vbid, _s: VBucketState) -> BoxFuture<'_, Option<VBucketState>> {
//!         Box::pin(async move { Ok(None) })
//!     }
//! }
//! ```

use crate::conflict::{ConflictResolver, Resolution};
use crate::item::{Item, ItemMetadata, VBucketState, Vbid};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::future::Future;
use std::pin::Pin;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = StoreResult<T>> + Send + 'a>>;

/// Simplified error for store operations.
#[derive(Debug, Clone)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for StoreError {}

/// Metadata of a stored record, live or deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredMeta {
    pub meta: ItemMetadata,
    pub deleted: bool,
}

/// Trait defining what the consumer needs from local storage.
pub trait VBucketStore: Send + Sync + 'static {
    /// Check if the store is accepting writes (backpressure check).
    ///
    /// Default implementation returns `true`.
    fn should_accept_writes(&self) -> bool {
        true
    }

    /// Fetch a live item.
    fn get(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<Item>>;

    /// Fetch metadata, including deleted records that still carry it.
    fn get_meta(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<StoredMeta>>;

    /// Store `item` if `resolver` says it is newer than the current record.
    ///
    /// A zero CAS must be replaced via `resolver.stamp` before the write lands.
    fn set_with_meta(&self, item: Item, resolver: ConflictResolver) -> BoxFuture<'_, Resolution>;

    /// Delete `key` if `resolver` says `meta` is newer than the current record.
    fn delete_with_meta(
        &self,
        vbucket: Vbid,
        key: String,
        meta: ItemMetadata,
        resolver: ConflictResolver,
    ) -> BoxFuture<'_, Resolution>;

    /// Remove every item in every vbucket.
    fn flush_all(&self) -> BoxFuture<'_, ()>;

    /// Current state of a vbucket, `None` if the store has no record of it.
    fn vbucket_state(&self, vbucket: Vbid) -> BoxFuture<'_, Option<VBucketState>>;

    /// Set a vbucket's state, returning the previous one.
    fn set_vbucket_state(
        &self,
        vbucket: Vbid,
        state: VBucketState,
    ) -> BoxFuture<'_, Option<VBucketState>>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    meta: ItemMetadata,
    /// `None` marks a deletion that still holds metadata.
    value: Option<Vec<u8>>,
    datatype: u8,
    by_seqno: u64,
}

/// In-memory vbucket store.
///
/// Items live in a sharded map keyed by `(vbucket, key)`; the shard lock held
/// by `entry()` is the per-key critical section for compare-and-apply.
/// Deletions leave tombstones so a replayed older mutation cannot resurrect
/// a deleted key.
#[derive(Default)]
pub struct MemoryStore {
    items: DashMap<(Vbid, String), StoredValue>,
    states: DashMap<Vbid, VBucketState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store with the given vbuckets pre-registered in `state`.
    pub fn with_vbuckets(vbuckets: impl IntoIterator<Item = Vbid>, state: VBucketState) -> Self {
        let store = Self::new();
        for vb in vbuckets {
            store.states.insert(vb, state);
        }
        store
    }

    /// Number of live items across all vbuckets.
    pub fn len(&self) -> usize {
        self.items.iter().filter(|e| e.value().value.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of live items in one vbucket.
    pub fn vbucket_len(&self, vbucket: Vbid) -> usize {
        self.items
            .iter()
            .filter(|e| e.key().0 == vbucket && e.value().value.is_some())
            .count()
    }

    /// Number of deletion records still held.
    pub fn tombstone_count(&self) -> usize {
        self.items.iter().filter(|e| e.value().value.is_none()).count()
    }
}

impl VBucketStore for MemoryStore {
    fn get(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<Item>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self.items.get(&(vbucket, key.clone())).and_then(|sv| {
                sv.value.as_ref().map(|value| Item {
                    key,
                    vbucket,
                    value: value.clone(),
                    datatype: sv.datatype,
                    by_seqno: sv.by_seqno,
                    meta: sv.meta,
                })
            }))
        })
    }

    fn get_meta(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<StoredMeta>> {
        let key = key.to_string();
        Box::pin(async move {
            Ok(self.items.get(&(vbucket, key)).map(|sv| StoredMeta {
                meta: sv.meta,
                deleted: sv.value.is_none(),
            }))
        })
    }

    fn set_with_meta(&self, item: Item, resolver: ConflictResolver) -> BoxFuture<'_, Resolution> {
        Box::pin(async move {
            let mut stored = StoredValue {
                meta: item.meta,
                value: Some(item.value),
                datatype: item.datatype,
                by_seqno: item.by_seqno,
            };
            let resolution = match self.items.entry((item.vbucket, item.key)) {
                Entry::Occupied(mut entry) => {
                    let resolution = resolver.resolve(&entry.get().meta, &stored.meta);
                    if resolution.is_apply() {
                        resolver.stamp(&mut stored.meta);
                        entry.insert(stored);
                    }
                    resolution
                }
                Entry::Vacant(entry) => {
                    resolver.stamp(&mut stored.meta);
                    entry.insert(stored);
                    Resolution::Apply
                }
            };
            Ok(resolution)
        })
    }

    fn delete_with_meta(
        &self,
        vbucket: Vbid,
        key: String,
        meta: ItemMetadata,
        resolver: ConflictResolver,
    ) -> BoxFuture<'_, Resolution> {
        Box::pin(async move {
            let mut tombstone = StoredValue {
                meta,
                value: None,
                datatype: 0,
                by_seqno: 0,
            };
            let resolution = match self.items.entry((vbucket, key)) {
                Entry::Occupied(mut entry) => {
                    let resolution = resolver.resolve(&entry.get().meta, &meta);
                    if resolution.is_apply() {
                        resolver.stamp(&mut tombstone.meta);
                        entry.insert(tombstone);
                    }
                    resolution
                }
                Entry::Vacant(entry) => {
                    resolver.stamp(&mut tombstone.meta);
                    entry.insert(tombstone);
                    Resolution::Apply
                }
            };
            Ok(resolution)
        })
    }

    fn flush_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let removed = self.items.len();
            self.items.clear();
            tracing::debug!(removed, "MemoryStore: flushed all vbuckets");
            Ok(())
        })
    }

    fn vbucket_state(&self, vbucket: Vbid) -> BoxFuture<'_, Option<VBucketState>> {
        Box::pin(async move { Ok(self.states.get(&vbucket).map(|s| *s)) })
    }

    fn set_vbucket_state(
        &self,
        vbucket: Vbid,
        state: VBucketState,
    ) -> BoxFuture<'_, Option<VBucketState>> {
        Box::pin(async move { Ok(self.states.insert(vbucket, state)) })
    }
}

//! Mock VBucketStore for testing.
//!
//! Delegates storage to a real `MemoryStore` so conflict resolution behaves
//! exactly as in production, while recording every write call for assertions.
//! Failures and backpressure can be switched on per test.

use replica_consumer::conflict::{ConflictResolver, Resolution};
use replica_consumer::item::{Item, ItemMetadata, VBucketState, Vbid};
use replica_consumer::store::{BoxFuture, MemoryStore, StoreError, StoredMeta, VBucketStore};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// A recorded set_with_meta() call.
#[derive(Debug, Clone)]
pub struct SetCall {
    pub vbucket: Vbid,
    pub key: String,
    pub cas: u64,
    pub rev_seqno: u64,
    pub resolution: Resolution,
}

/// A recorded delete_with_meta() call.
#[derive(Debug, Clone)]
pub struct DeleteCall {
    pub vbucket: Vbid,
    pub key: String,
    pub cas: u64,
    pub rev_seqno: u64,
    pub resolution: Resolution,
}

/// Mock implementation of VBucketStore that records all writes.
///
/// # Example
/// ```rust,ignore
/// let mock = MockStore::new();
/// mock.fail_after(2);
///
/// // Use in tests...
///
/// let sets = mock.sets().await;
/// assert_eq!(sets.len(), 2);
/// ```
pub struct MockStore {
    inner: MemoryStore,
    sets: RwLock<Vec<SetCall>>,
    deletes: RwLock<Vec<DeleteCall>>,
    flushes: AtomicUsize,
    /// Writes (set/delete) fail once this many have been attempted
    fail_after_writes: AtomicUsize,
    write_count: AtomicUsize,
    fail_flush: AtomicBool,
    accepting_writes: AtomicBool,
    /// Artificial latency per write, in milliseconds
    write_delay_ms: AtomicUsize,
}

impl MockStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            sets: RwLock::new(Vec::new()),
            deletes: RwLock::new(Vec::new()),
            flushes: AtomicUsize::new(0),
            fail_after_writes: AtomicUsize::new(usize::MAX),
            write_count: AtomicUsize::new(0),
            fail_flush: AtomicBool::new(false),
            accepting_writes: AtomicBool::new(true),
            write_delay_ms: AtomicUsize::new(0),
        }
    }

    // =========================================================================
    // Failure Injection
    // =========================================================================

    /// Configure writes to fail after N attempts.
    pub fn fail_after(&self, n: usize) {
        self.fail_after_writes.store(n, Ordering::SeqCst);
    }

    #[allow(dead_code)]
    pub fn set_fail_flush(&self, fail: bool) {
        self.fail_flush.store(fail, Ordering::SeqCst);
    }

    /// Toggle the backpressure hint.
    #[allow(dead_code)]
    pub fn set_accepting_writes(&self, accepting: bool) {
        self.accepting_writes.store(accepting, Ordering::SeqCst);
    }

    /// Slow every write down (for interleaving tests).
    #[allow(dead_code)]
    pub fn set_write_delay(&self, delay: Duration) {
        self.write_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    async fn before_write(&self) -> Result<(), StoreError> {
        let delay = self.write_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        let count = self.write_count.fetch_add(1, Ordering::SeqCst);
        if count >= self.fail_after_writes.load(Ordering::SeqCst) {
            return Err(StoreError("Simulated failure".to_string()));
        }
        Ok(())
    }

    /// Metadata as stored, so calls record the CAS stamped on applied writes.
    async fn written_meta(
        &self,
        vbucket: Vbid,
        key: &str,
        incoming: ItemMetadata,
        resolution: Resolution,
    ) -> Result<ItemMetadata, StoreError> {
        if !resolution.is_apply() {
            return Ok(incoming);
        }
        Ok(self
            .inner
            .get_meta(vbucket, key)
            .await?
            .map_or(incoming, |stored| stored.meta))
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Get all recorded set_with_meta() calls.
    pub async fn sets(&self) -> Vec<SetCall> {
        self.sets.read().await.clone()
    }

    /// Get all recorded delete_with_meta() calls.
    pub async fn deletes(&self) -> Vec<DeleteCall> {
        self.deletes.read().await.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Underlying store, for direct inspection.
    pub fn memory(&self) -> &MemoryStore {
        &self.inner
    }
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VBucketStore for MockStore {
    fn should_accept_writes(&self) -> bool {
        self.accepting_writes.load(Ordering::SeqCst)
    }

    fn get(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<Item>> {
        self.inner.get(vbucket, key)
    }

    fn get_meta(&self, vbucket: Vbid, key: &str) -> BoxFuture<'_, Option<StoredMeta>> {
        self.inner.get_meta(vbucket, key)
    }

    fn set_with_meta(&self, item: Item, resolver: ConflictResolver) -> BoxFuture<'_, Resolution> {
        Box::pin(async move {
            self.before_write().await?;
            let vbucket = item.vbucket;
            let key = item.key.clone();
            let meta = item.meta;
            let resolution = self.inner.set_with_meta(item, resolver).await?;
            let meta = self.written_meta(vbucket, &key, meta, resolution).await?;
            self.sets.write().await.push(SetCall {
                vbucket,
                key,
                cas: meta.cas,
                rev_seqno: meta.rev_seqno,
                resolution,
            });
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
            self.before_write().await?;
            let resolution = self
                .inner
                .delete_with_meta(vbucket, key.clone(), meta, resolver)
                .await?;
            let meta = self.written_meta(vbucket, &key, meta, resolution).await?;
            self.deletes.write().await.push(DeleteCall {
                vbucket,
                key,
                cas: meta.cas,
                rev_seqno: meta.rev_seqno,
                resolution,
            });
            Ok(resolution)
        })
    }

    fn flush_all(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            if self.fail_flush.load(Ordering::SeqCst) {
                return Err(StoreError("Simulated flush failure".to_string()));
            }
            self.flushes.fetch_add(1, Ordering::SeqCst);
            self.inner.flush_all().await
        })
    }

    fn vbucket_state(&self, vbucket: Vbid) -> BoxFuture<'_, Option<VBucketState>> {
        self.inner.vbucket_state(vbucket)
    }

    fn set_vbucket_state(
        &self,
        vbucket: Vbid,
        state: VBucketState,
    ) -> BoxFuture<'_, Option<VBucketState>> {
        self.inner.set_vbucket_state(vbucket, state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str) -> Item {
        Item::new(key, Vbid(0), b"v".to_vec(), ItemMetadata::new(1, 1, 0, 0))
    }

    #[tokio::test]
    async fn test_mock_records_sets() {
        let mock = MockStore::new();
        mock.set_with_meta(item("key1"), ConflictResolver::new())
            .await
            .unwrap();

        let sets = mock.sets().await;
        assert_eq!(sets.len(), 1);
        assert_eq!(sets[0].key, "key1");
        assert_eq!(sets[0].resolution, Resolution::Apply);
    }

    #[tokio::test]
    async fn test_mock_fail_after() {
        let mock = MockStore::new();
        mock.fail_after(2);
        let r = ConflictResolver::new();

        assert!(mock.set_with_meta(item("k1"), r.clone()).await.is_ok());
        assert!(mock.set_with_meta(item("k2"), r.clone()).await.is_ok());
        assert!(mock.set_with_meta(item("k3"), r).await.is_err());
        assert_eq!(mock.sets().await.len(), 2);
    }
}

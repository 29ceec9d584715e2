//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - Mock VBucketStore for recording calls and injecting failures
//! - Engine construction helpers

pub mod mock_store;

pub use mock_store::*;

use replica_consumer::{ReplicationConfig, ReplicationEngine};
use std::sync::Arc;

/// Engine over a fresh recording mock store.
#[allow(dead_code)] // Not every test binary uses every helper
pub fn engine_with_mock() -> (ReplicationEngine<MockStore>, Arc<MockStore>) {
    engine_with_config(ReplicationConfig::for_testing("test-node"))
}

/// Engine over a fresh recording mock store with a custom config.
#[allow(dead_code)]
pub fn engine_with_config(config: ReplicationConfig) -> (ReplicationEngine<MockStore>, Arc<MockStore>) {
    let store = Arc::new(MockStore::new());
    let engine = ReplicationEngine::with_store(config, Arc::clone(&store)).unwrap();
    (engine, store)
}

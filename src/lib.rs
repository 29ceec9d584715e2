//! # Replica Consumer
//!
//! The consumer side of intra-cluster replication for a partitioned
//! key-value engine: applies a producer's stream of mutations, deletions,
//! snapshots, flushes and vbucket-state changes to local storage.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                           replica-consumer                                │
//! │                                                                           │
//! │  decoded    ┌───────────────────┐   ┌────────────────────┐                │
//! │  event ────►│ ReplicationEngine │──►│ ConnectionRegistry │                │
//! │             │ (status mapping)  │   │ (conn → Consumer)  │                │
//! │             └───────────────────┘   └─────────┬──────────┘                │
//! │                                               ▼                           │
//! │  ┌──────────────┐   ┌──────────────────────────────────┐                  │
//! │  │ CasGenerator │◄──│ Consumer (streams per vbucket,   │                  │
//! │  └──────────────┘   │ snapshot windows, CAS/rev rules) │                  │
//! │                     └──────────────┬───────────────────┘                  │
//! │                                    ▼                                      │
//! │  ┌────────────┐      ┌──────────────────────────────────┐                 │
//! │  │ Dispatcher │◄─────│ VBucketStore (compare-and-apply  │                 │
//! │  │ (delayed   │      │ with ConflictResolver per key)   │                 │
//! │  │  flush)    │      └──────────────────────────────────┘                 │
//! │  └────────────┘                                                           │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Conflict Resolution
//!
//! A replicated write replaces local state only when its revision sequence
//! number is higher, or equal with a higher CAS. A write sent without a CAS
//! needs a strictly higher revision and is stamped only once it has won.
//! Replaying a stream is therefore harmless: duplicates are acknowledged and
//! ignored.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_consumer::{ReplicationConfig, ReplicationEngine, Status};
//! use replica_consumer::events::DeletionEvent;
//! use replica_consumer::item::Vbid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = ReplicationEngine::new(ReplicationConfig::default())
//!         .expect("valid config");
//!
//!     let status = engine.deletion(1, DeletionEvent::new("k2", Vbid(0)).with_cas(42)).await;
//!     assert_eq!(status, Status::Success);
//!
//!     engine.shutdown().await;
//! }
//! ```

pub mod cas;
pub mod config;
pub mod conflict;
pub mod consumer;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod events;
pub mod item;
pub mod metrics;
pub mod registry;
pub mod store;

// Re-exports for convenience
pub use cas::CasGenerator;
pub use config::{ConsumerSettings, RegistryConfig, ReplicationConfig};
pub use conflict::{ConflictResolver, Resolution};
pub use consumer::{ConnectionId, Consumer, ConsumerStats};
pub use dispatcher::{Dispatcher, Job, TokioDispatcher};
pub use engine::{EngineState, HealthCheck, ReplicationEngine};
pub use error::{ReplicationError, Result, Status};
pub use events::{DeletionEvent, EventKind, MutationEvent};
pub use item::{Item, ItemMetadata, VBucketState, Vbid, DEFAULT_REV_SEQNO};
pub use registry::ConnectionRegistry;
pub use store::{MemoryStore, StoreError, VBucketStore};

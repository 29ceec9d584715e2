//! Engine state types.
//!
//! # State Transitions
//!
//! ```text
//!              new()
//!   ─────────────────→ Running
//!                         │
//!               shutdown()│
//!                         ↓
//!                   ShuttingDown ──→ Stopped
//! ```
//!
//! # State Descriptions
//!
//! - **Running**: Accepting events. The state right after construction.
//! - **ShuttingDown**: `shutdown()` called. Pending jobs are draining and
//!   consumers are being torn down; new events get `Disconnect`.
//! - **Stopped**: Shutdown complete. Every call returns `Disconnect`.

/// State of the replication engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Accepting and applying events.
    Running,

    /// Shutting down gracefully.
    ///
    /// Transitions to `Stopped` when complete.
    ShuttingDown,

    /// Stopped. Safe to drop.
    Stopped,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineState::Running => write!(f, "Running"),
            EngineState::ShuttingDown => write!(f, "ShuttingDown"),
            EngineState::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Health snapshot for monitoring endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthCheck {
    pub state: EngineState,
    /// Engine is running and can take events.
    pub ready: bool,
    /// Ready and the store is not applying backpressure.
    pub healthy: bool,
    pub store_accepting_writes: bool,
    pub active_connections: usize,
    pub max_connections: usize,
    pub open_streams: usize,
    /// Delayed jobs (flushes) not yet run.
    pub pending_jobs: usize,
    pub consumers_created_total: u64,
}

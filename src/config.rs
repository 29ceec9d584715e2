//! Configuration for the replication consumer.
//!
//! Configuration is passed to [`ReplicationEngine::new()`](crate::ReplicationEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use replica_consumer::config::{ConsumerSettings, ReplicationConfig};
//!
//! let config = ReplicationConfig {
//!     node_id: "node-1".into(),
//!     settings: ConsumerSettings {
//!         flush_delay: "2s".into(),
//!         ..Default::default()
//!     },
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicationConfig
//! ├── node_id: String                    # This node's ID (logging only)
//! ├── settings: ConsumerSettings
//! │   ├── flush_delay: String            # "0s" = flush inline
//! │   ├── disabled_events: Vec<EventKind>
//! │   └── enforce_snapshot_order: bool
//! └── registry: RegistryConfig
//!     └── max_connections: usize
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! node_id: "uk.node.london-1"
//!
//! settings:
//!   flush_delay: "500ms"
//!   disabled_events: ["set_vbucket_state"]
//!   enforce_snapshot_order: true
//!
//! registry:
//!   max_connections: 1024
//! ```

use crate::error::{ReplicationError, Result};
use crate::events::EventKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicationEngine::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Identity of the local node. Only used to tag logs.
    pub node_id: String,

    /// Per-consumer behaviour.
    #[serde(default)]
    pub settings: ConsumerSettings,

    /// Connection registry limits.
    #[serde(default)]
    pub registry: RegistryConfig,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            node_id: "local.dev.node.default".to_string(),
            settings: ConsumerSettings::default(),
            registry: RegistryConfig::default(),
        }
    }
}

impl ReplicationConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            settings: ConsumerSettings::default(),
            registry: RegistryConfig { max_connections: 64 },
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.registry.max_connections == 0 {
            return Err(ReplicationError::Config(
                "registry.max_connections must be at least 1".to_string(),
            ));
        }
        humantime::parse_duration(&self.settings.flush_delay).map_err(|e| {
            ReplicationError::Config(format!(
                "settings.flush_delay {:?}: {}",
                self.settings.flush_delay, e
            ))
        })?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ConsumerSettings
// ═══════════════════════════════════════════════════════════════════════════════

/// Settings applied to every consumer created by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSettings {
    /// Delay before a flush takes effect (humantime, e.g. "0s", "500ms").
    ///
    /// Zero flushes inline; anything else hands the flush to the dispatcher
    /// and acknowledges immediately.
    #[serde(default = "default_flush_delay")]
    pub flush_delay: String,

    /// Handlers answered with `NotSupported` in this deployment.
    #[serde(default)]
    pub disabled_events: Vec<EventKind>,

    /// Disconnect when `by_seqno` does not increase inside a snapshot.
    #[serde(default = "default_true")]
    pub enforce_snapshot_order: bool,
}

fn default_flush_delay() -> String {
    "0s".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            flush_delay: default_flush_delay(),
            disabled_events: Vec::new(),
            enforce_snapshot_order: true,
        }
    }
}

impl ConsumerSettings {
    /// Parse flush delay to Duration.
    ///
    /// Invalid strings fall back to zero (flush inline); `validate()` catches
    /// them at startup.
    pub fn flush_delay_duration(&self) -> Duration {
        humantime::parse_duration(&self.flush_delay).unwrap_or(Duration::ZERO)
    }

    pub fn is_enabled(&self, kind: EventKind) -> bool {
        !self.disabled_events.contains(&kind)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RegistryConfig
// ═══════════════════════════════════════════════════════════════════════════════

/// Connection registry limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Upper bound on live consumers. A new connection past this limit is
    /// refused with `Disconnect`.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

fn default_max_connections() -> usize {
    4096
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
        }
    }
}

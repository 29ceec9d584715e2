// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replication consumer.
//!
//! Every failure inside a handler is a [`ReplicationError`]. None of them
//! escape to the caller as-is: the facade translates each one into exactly
//! one outward [`Status`] at the handler boundary.
//!
//! # Error Categories
//!
//! | Error Type | Status | Description |
//! |------------|--------|-------------|
//! | `Store` | Disconnect | VBucketStore rejected or failed a write |
//! | `ConsumerCreation` | Disconnect | Registry could not allocate a consumer |
//! | `ConnectionClosed` | Disconnect | Event raced with disconnect of its connection |
//! | `ProtocolViolation` | Disconnect | Out-of-order event, marker without stream |
//! | `StreamAlreadyOpen` | TemporaryFailure | Second open for an open (conn, vbucket) |
//! | `NotAcceptingWrites` | TemporaryFailure | Store backpressure, dead vbucket or pending flush |
//! | `Unsupported` | NotSupported | Handler disabled for this deployment |
//! | `Config` | Disconnect | Configuration invalid |
//! | `Shutdown` | Disconnect | Engine is shutting down |
//!
//! # Status Mapping
//!
//! Use [`ReplicationError::status()`] to get the code returned to the
//! dispatch layer, and [`ReplicationError::is_fatal()`] to check whether the
//! connection has to be dropped.

use crate::events::EventKind;
use crate::item::Vbid;
use thiserror::Error;

/// Result type alias for replication operations.
pub type Result<T> = std::result::Result<T, ReplicationError>;

/// Outward status taxonomy returned for every decoded event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    /// Event applied, or validly no-op'd (idempotent duplicate).
    Success,
    /// Handler not available in this build/deployment. No state changed.
    NotSupported,
    /// Stream integrity can no longer be guaranteed; drop the connection.
    Disconnect,
    /// Well-formed request that cannot be satisfied right now; retryable.
    TemporaryFailure,
}

impl Status {
    /// Label used for metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Success => "success",
            Status::NotSupported => "not_supported",
            Status::Disconnect => "disconnect",
            Status::TemporaryFailure => "temporary_failure",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Status::Success)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while consuming a replication stream.
#[derive(Error, Debug)]
pub enum ReplicationError {
    /// VBucketStore failure.
    ///
    /// The item could not be stored, so applying later events would leave
    /// a hole in the replica.
    #[error("Store error ({operation}): {message}")]
    Store { operation: String, message: String },

    /// Consumer could not be constructed for a connection.
    ///
    /// Occurs when the registry is at capacity.
    #[error("Failed to create consumer for connection {connection}: {message}")]
    ConsumerCreation { connection: u64, message: String },

    /// The consumer was torn down while the event was in flight.
    #[error("Connection {connection} already closed")]
    ConnectionClosed { connection: u64 },

    /// The producer broke the stream protocol.
    #[error("Protocol violation on vbucket {vbucket}: {message}")]
    ProtocolViolation { vbucket: Vbid, message: String },

    /// Open-stream for a (connection, vbucket) pair that is already open.
    #[error("Stream already open for vbucket {vbucket}")]
    StreamAlreadyOpen { vbucket: Vbid },

    /// The store (or the target vbucket) is not taking writes right now.
    #[error("Vbucket {vbucket} not accepting writes: {reason}")]
    NotAcceptingWrites { vbucket: Vbid, reason: String },

    /// Handler is disabled in this deployment.
    #[error("Event {0} not supported")]
    Unsupported(EventKind),

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Shutdown in progress.
    #[error("Shutdown in progress")]
    Shutdown,
}

impl ReplicationError {
    /// Create a store error from a collaborator error.
    pub fn store(operation: impl Into<String>, source: impl std::fmt::Display) -> Self {
        Self::Store {
            operation: operation.into(),
            message: source.to_string(),
        }
    }

    /// Create a protocol violation error.
    pub fn protocol(vbucket: Vbid, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            vbucket,
            message: message.into(),
        }
    }

    /// Outward status for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::Store { .. } => Status::Disconnect,
            Self::ConsumerCreation { .. } => Status::Disconnect,
            Self::ConnectionClosed { .. } => Status::Disconnect,
            Self::ProtocolViolation { .. } => Status::Disconnect,
            Self::StreamAlreadyOpen { .. } => Status::TemporaryFailure,
            Self::NotAcceptingWrites { .. } => Status::TemporaryFailure,
            Self::Unsupported(_) => Status::NotSupported,
            Self::Config(_) => Status::Disconnect,
            Self::Shutdown => Status::Disconnect,
        }
    }

    /// Whether the connection must be terminated.
    pub fn is_fatal(&self) -> bool {
        self.status() == Status::Disconnect
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Store { .. } => "store",
            Self::ConsumerCreation { .. } => "consumer_creation",
            Self::ConnectionClosed { .. } => "connection_closed",
            Self::ProtocolViolation { .. } => "protocol_violation",
            Self::StreamAlreadyOpen { .. } => "stream_already_open",
            Self::NotAcceptingWrites { .. } => "not_accepting_writes",
            Self::Unsupported(_) => "unsupported",
            Self::Config(_) => "config",
            Self::Shutdown => "shutdown",
        }
    }
}

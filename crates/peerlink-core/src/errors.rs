//! Error types for the arbitration core
//!
//! `TransportError` is what a `TransportAdapter` reports; `ArbiterError` is
//! what the arbiter surfaces to the application listener. Every failure is
//! terminal for the sub-component that raised it and is never retried.

use std::time::Duration;

use thiserror::Error;

// ----------------------------------------------------------------------------
// Transport Errors
// ----------------------------------------------------------------------------

/// Errors reported by a transport adapter
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to bind listening endpoint: {0}")]
    Bind(String),

    #[error("Accept failed: {0}")]
    Accept(String),

    #[error("Failed to connect to {peer}: {reason}")]
    Connect { peer: String, reason: String },

    #[error("Discovery unavailable: {0}")]
    Scan(String),

    #[error("Discoverability request failed: {0}")]
    Discoverability(String),

    #[error("Endpoint closed")]
    Closed,

    #[error("Network I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Arbiter Errors
// ----------------------------------------------------------------------------

/// Failures surfaced by the role arbiter
#[derive(Error, Debug)]
pub enum ArbiterError {
    #[error("Listening endpoint could not be created: {0}")]
    Bind(#[source] TransportError),

    #[error("Accept loop failed: {0}")]
    Accept(#[source] TransportError),

    #[error("Outbound connection failed: {0}")]
    Connect(#[source] TransportError),

    #[error("Discoverability window of {window:?} elapsed")]
    DiscoverabilityExpired { window: Duration },

    #[error("Discovery could not start: {0}")]
    ScanUnavailable(#[source] TransportError),

    #[error("No discovered peer at index {index} (have {available})")]
    NoSuchPeer { index: usize, available: usize },
}

impl ArbiterError {
    /// Whether the failure ended an inbound or outbound connection attempt
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            ArbiterError::Bind(_)
                | ArbiterError::Accept(_)
                | ArbiterError::Connect(_)
                | ArbiterError::DiscoverabilityExpired { .. }
        )
    }
}

/// Result alias for arbiter operations
pub type ArbiterResult<T> = std::result::Result<T, ArbiterError>;

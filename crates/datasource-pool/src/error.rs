//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors reported by a raw connection or by the factory that opens one.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The connection is closed.
    #[error("connection is closed")]
    Closed,

    /// IO error on the underlying transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Driver-specific failure.
    #[error("driver error: {0}")]
    Driver(String),
}

/// Errors that can occur during pool operations.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every candidate handed out by the pool failed its liveness probe.
    #[error("could not get a good connection after {attempts} bad connections")]
    Exhausted {
        /// Number of bad candidates seen by this acquire.
        attempts: usize,
    },

    /// The raw connection factory failed.
    #[error("failed to create connection: {0}")]
    Factory(#[source] ConnectionError),

    /// The connection handle was invalidated (returned, reclaimed or force-closed).
    #[error("connection handle is no longer valid")]
    Invalidated,

    /// A waiting acquire was interrupted.
    #[error("connection acquisition interrupted")]
    Interrupted,

    /// No connection became available within the wait timeout.
    #[error("connection acquisition timeout after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Pool is closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Pool configuration error.
    #[error("pool configuration error: {0}")]
    Configuration(String),

    /// An operation on a live connection failed.
    #[error("connection error: {0}")]
    Connection(#[source] ConnectionError),
}

impl PoolError {
    /// Check if this error is transient and the acquire may succeed on retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Exhausted { .. } | Self::AcquisitionTimeout(_) | Self::Interrupted
        )
    }
}

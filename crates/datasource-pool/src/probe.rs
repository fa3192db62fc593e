//! Liveness probing before a connection is handed out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::PoolConfig;
use crate::lifecycle::Connection;

/// Health check result with timing information.
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Whether the connection is usable.
    pub healthy: bool,
    /// Whether the ping query was actually executed.
    pub pinged: bool,
    /// Time taken to complete the check.
    pub latency: Duration,
    /// Error message if unhealthy.
    pub error: Option<String>,
}

impl HealthCheckResult {
    /// Create a successful health check result.
    pub fn healthy(latency: Duration, pinged: bool) -> Self {
        Self {
            healthy: true,
            pinged,
            latency,
            error: None,
        }
    }

    /// Create a failed health check result.
    pub fn unhealthy(latency: Duration, pinged: bool, error: impl Into<String>) -> Self {
        Self {
            healthy: false,
            pinged,
            latency,
            error: Some(error.into()),
        }
    }
}

/// Decides whether a connection is still usable.
///
/// A connection that reports itself closed is rejected outright. Otherwise
/// the ping query runs only when pinging is enabled and the connection has
/// been unused for longer than the threshold. A failing ping closes the
/// connection. Nothing here ever returns an error: failures surface only as
/// an unhealthy result.
#[derive(Debug, Clone)]
pub struct LivenessProbe {
    enabled: bool,
    query: Arc<str>,
    threshold: Duration,
}

impl LivenessProbe {
    /// Build a probe from the pool configuration.
    #[must_use]
    pub fn from_config(config: &PoolConfig) -> Self {
        Self {
            enabled: config.ping_enabled,
            query: Arc::clone(&config.ping_query),
            threshold: config.ping_threshold,
        }
    }

    /// Whether a connection unused for `idle_for` would be pinged.
    #[must_use]
    pub fn should_ping(&self, idle_for: Duration) -> bool {
        self.enabled && idle_for > self.threshold
    }

    /// Check `conn`, which has been unused for `idle_for`.
    pub fn check<C: Connection + ?Sized>(
        &self,
        conn: &mut C,
        idle_for: Duration,
    ) -> HealthCheckResult {
        let started = Instant::now();

        match conn.is_closed() {
            Ok(false) => {}
            Ok(true) => {
                return HealthCheckResult::unhealthy(
                    started.elapsed(),
                    false,
                    "connection is closed",
                );
            }
            Err(e) => {
                return HealthCheckResult::unhealthy(started.elapsed(), false, e.to_string());
            }
        }

        if !self.should_ping(idle_for) {
            return HealthCheckResult::healthy(started.elapsed(), false);
        }

        tracing::debug!(query = %self.query, "testing connection");
        let outcome = conn.execute(&self.query).and_then(|()| {
            if conn.auto_commit()? {
                Ok(())
            } else {
                conn.rollback()
            }
        });

        match outcome {
            Ok(()) => HealthCheckResult::healthy(started.elapsed(), true),
            Err(e) => {
                tracing::warn!(query = %self.query, error = %e, "execution of ping query failed");
                if let Err(close_err) = conn.close() {
                    tracing::debug!(error = %close_err, "closing connection after failed ping");
                }
                HealthCheckResult::unhealthy(started.elapsed(), true, e.to_string())
            }
        }
    }
}

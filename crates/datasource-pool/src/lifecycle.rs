//! Connection lifecycle management.
//!
//! This module defines the contract the pool expects from raw connections
//! and the factory that opens them, plus the per-handle state and metadata
//! the pool tracks.

use std::time::{Duration, Instant};

use crate::config::{Target, TypeCode};
use crate::error::ConnectionError;

/// A physical connection as seen by the pool.
///
/// The pool only needs enough of the connection to close it, tell whether
/// it is still open, clean up pending transactions and run the ping query.
/// Everything else is reached through
/// [`PooledConnection::with_connection`](crate::PooledConnection::with_connection).
pub trait Connection: Send {
    /// Physically close the connection.
    fn close(&mut self) -> Result<(), ConnectionError>;

    /// Check whether the connection reports itself closed.
    fn is_closed(&self) -> Result<bool, ConnectionError>;

    /// Current auto-commit mode.
    fn auto_commit(&self) -> Result<bool, ConnectionError>;

    /// Change the auto-commit mode.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError>;

    /// Change the transaction isolation level.
    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError>;

    /// Change how long the driver waits on the network before failing.
    ///
    /// Drivers without such a setting can keep the default, which ignores it.
    fn set_network_timeout(&mut self, _timeout: Duration) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Commit the current transaction.
    fn commit(&mut self) -> Result<(), ConnectionError>;

    /// Roll back the current transaction.
    fn rollback(&mut self) -> Result<(), ConnectionError>;

    /// Execute a statement, discarding any results.
    fn execute(&mut self, statement: &str) -> Result<(), ConnectionError>;
}

/// Opens physical connections for the pool.
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type produced by this factory.
    type Connection: Connection + 'static;

    /// Open a new connection to `target`.
    fn connect(&self, target: &Target) -> Result<Self::Connection, ConnectionError>;
}

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IsolationLevel {
    /// Transactions are not supported.
    None,
    /// Dirty reads allowed.
    ReadUncommitted,
    /// Only committed data is read.
    ReadCommitted,
    /// Rows read stay stable for the transaction.
    RepeatableRead,
    /// Full serializability.
    Serializable,
    /// Row-versioned snapshot isolation (SQL Server).
    Snapshot,
}

impl IsolationLevel {
    /// Parse an isolation level name.
    ///
    /// Accepts `none`, `read_uncommitted`, `read_committed`,
    /// `repeatable_read`, `serializable` and `snapshot`, case-insensitively,
    /// with `_`, `-` or spaces as separators.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' '))
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "none" => Some(Self::None),
            "readuncommitted" => Some(Self::ReadUncommitted),
            "readcommitted" => Some(Self::ReadCommitted),
            "repeatableread" => Some(Self::RepeatableRead),
            "serializable" => Some(Self::Serializable),
            "snapshot" | "sqlserversnapshot" => Some(Self::Snapshot),
            _ => None,
        }
    }
}

/// State of a single connection handle.
///
/// Handles are short-lived: returning a connection to the idle list or
/// reclaiming an overdue one moves the raw connection under a brand-new
/// handle and retires the old one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly wrapped, not yet handed out.
    Created,
    /// Sitting in the idle list.
    Idle,
    /// Checked out to a caller.
    Active,
    /// Raw connection was physically closed.
    Closed,
    /// Taken away from a caller that held it past the checkout timeout.
    Reclaimed,
    /// Retired: returned, discarded as bad, or detached.
    Invalid,
}

impl ConnectionState {
    /// Check if the connection is available for checkout.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the handle can never be used again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Reclaimed | Self::Invalid)
    }
}

/// Metadata about a pooled connection handle.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Identity of this handle.
    pub id: u64,
    /// Identity of the raw connection, stable across handles.
    pub raw_id: u64,
    /// When the raw connection was created.
    pub created_at: Instant,
    /// When the raw connection was last handed out.
    pub last_used_at: Instant,
    /// When the current checkout started.
    pub checkout_at: Option<Instant>,
    /// Number of times the raw connection has been checked out.
    pub checkout_count: u64,
    /// Target fingerprint the connection is bound to.
    pub type_code: TypeCode,
    /// Current state of the handle.
    pub state: ConnectionState,
}

impl ConnectionMetadata {
    /// Create metadata for a newly wrapped connection.
    pub fn new(id: u64, raw_id: u64, type_code: TypeCode) -> Self {
        let now = Instant::now();
        Self {
            id,
            raw_id,
            created_at: now,
            last_used_at: now,
            checkout_at: None,
            checkout_count: 0,
            type_code,
            state: ConnectionState::Created,
        }
    }

    /// Metadata for a new handle around the same raw connection.
    ///
    /// Creation and last-use times carry over; checkout state does not.
    #[must_use]
    pub fn rehomed(&self, id: u64) -> Self {
        Self {
            id,
            raw_id: self.raw_id,
            created_at: self.created_at,
            last_used_at: self.last_used_at,
            checkout_at: None,
            checkout_count: self.checkout_count,
            type_code: self.type_code,
            state: ConnectionState::Created,
        }
    }

    /// Time since the raw connection was created.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Time since the raw connection was last handed out.
    #[must_use]
    pub fn time_since_last_use(&self) -> Duration {
        self.last_used_at.elapsed()
    }

    /// How long the current checkout has lasted; zero when not checked out.
    #[must_use]
    pub fn checkout_time(&self) -> Duration {
        self.checkout_at.map_or(Duration::ZERO, |at| at.elapsed())
    }

    /// Mark the connection as checked out for `type_code`.
    pub fn mark_checkout(&mut self, type_code: TypeCode) {
        let now = Instant::now();
        self.checkout_at = Some(now);
        self.last_used_at = now;
        self.checkout_count += 1;
        self.type_code = type_code;
        self.state = ConnectionState::Active;
    }

    /// Mark the connection as sitting in the idle list.
    pub fn mark_idle(&mut self) {
        self.checkout_at = None;
        self.state = ConnectionState::Idle;
    }
}

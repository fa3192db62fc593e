//! # datasource-pool
//!
//! Synchronous, thread-safe connection pool for blocking database drivers.
//!
//! The pool is driver-agnostic: plug in a [`ConnectionFactory`] that opens
//! physical connections and the pool takes care of reuse, bounds and
//! liveness.
//!
//! ## Features
//!
//! - Lazy connection creation up to `max_active`
//! - Idle list bounded by `max_idle`, reused oldest first
//! - Reclaiming connections held past `checkout_timeout`
//! - Optional ping query for connections unused past a threshold
//! - Bounded tolerance for bad connections per acquire
//! - Wait timeout, interruptible waits and pool shutdown
//! - Runtime reconfiguration that drains the pool
//!
//! ## Example
//!
//! ```rust,ignore
//! use datasource_pool::{Pool, PoolConfig, Target};
//!
//! let config = PoolConfig::new()
//!     .max_active(20)
//!     .ping_enabled(true)
//!     .ping_query("SELECT 1");
//!
//! let pool = Pool::new(factory, Target::new("postgres://db/app"), config)?;
//! let mut conn = pool.get()?;
//! conn.execute("UPDATE jobs SET done = true")?;
//! // Connection returned to the pool on drop
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod datasource;
pub mod error;
pub mod lifecycle;
pub mod pool;
pub mod probe;
pub mod state;

#[cfg(test)]
mod test_support;

pub use config::{PoolConfig, Target, TypeCode};
pub use connection::{PooledConnection, RawConnection};
pub use datasource::DataSourceFactory;
pub use error::{ConnectionError, PoolError};
pub use lifecycle::{
    Connection, ConnectionFactory, ConnectionMetadata, ConnectionState, IsolationLevel,
};
pub use pool::{Pool, WaitInterrupt};
pub use probe::{HealthCheckResult, LivenessProbe};
pub use state::PoolStatus;

//! # datasource-testing
//!
//! Test infrastructure for `datasource-pool`.
//!
//! This crate provides an in-memory connection factory whose connections
//! can be scripted to fail, plus small fixtures shared by the pool's
//! integration tests.
//!
//! ## Features
//!
//! - Mock connections with statement, commit and rollback recording
//! - Failure injection: refused connects, connections born closed,
//!   failing statements and severed links
//! - Counters for connections opened and physically closed
//!
//! ## Example
//!
//! ```rust,ignore
//! use datasource_pool::{Pool, PoolConfig, Target};
//! use datasource_testing::mock::MockFactory;
//!
//! let factory = MockFactory::builder().with_failing_statement("SELECT broken").build();
//! let pool = Pool::new(factory.clone(), Target::new("mock://db"), PoolConfig::new())?;
//!
//! let mut conn = pool.get()?;
//! conn.execute("SELECT 1")?;
//! conn.release();
//!
//! assert_eq!(factory.opened(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod fixtures;
pub mod mock;

pub use fixtures::{init_tracing, mock_pool, mock_pool_with, mock_target};
pub use mock::{MockConnection, MockFactory, MockFactoryBuilder};

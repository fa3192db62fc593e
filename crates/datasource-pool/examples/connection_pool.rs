//! Connection pooling with status reporting example.
//!
//! This example runs a handful of worker threads against a pool backed by
//! an in-memory factory and prints the pool status afterwards.
//!
//! # Running
//!
//! ```bash
//! cargo run -p datasource-pool --example connection_pool
//! ```

// Allow common patterns in example code
#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use datasource_pool::{
    Connection, ConnectionError, ConnectionFactory, DataSourceFactory, IsolationLevel, PoolError,
    Target,
};

/// Pretends to talk to a database.
struct EchoConnection {
    id: u64,
    closed: bool,
    auto_commit: bool,
}

impl Connection for EchoConnection {
    fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> Result<bool, ConnectionError> {
        Ok(self.closed)
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        self.auto_commit = enabled;
        Ok(())
    }

    fn set_isolation_level(&mut self, _level: IsolationLevel) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<(), ConnectionError> {
        println!("  [conn {}] {statement}", self.id);
        thread::sleep(Duration::from_millis(10));
        Ok(())
    }
}

#[derive(Default)]
struct EchoFactory {
    next_id: AtomicU64,
}

impl ConnectionFactory for EchoFactory {
    type Connection = EchoConnection;

    fn connect(&self, target: &Target) -> Result<EchoConnection, ConnectionError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        println!("  opening connection {id} to {}", target.url);
        Ok(EchoConnection {
            id,
            closed: false,
            auto_commit: true,
        })
    }
}

fn main() -> Result<(), PoolError> {
    tracing_subscriber::fmt::init();

    println!("=== Connection Pool Example ===\n");

    let pool = DataSourceFactory::from_properties(
        "url=echo://localhost/app; username=app; password=secret; \
         max_active=3; max_idle=2; wait_timeout_ms=5000; \
         ping_enabled=true; ping_query=SELECT 1; ping_threshold_ms=50",
    )?
    .build(EchoFactory::default())?;

    let config = pool.config();
    println!("Pool configuration:");
    println!("  Max active: {}", config.max_active);
    println!("  Max idle: {}", config.max_idle);
    println!("  Wait timeout: {:?}", config.wait_timeout);
    println!();

    let workers: Vec<_> = (0..6)
        .map(|worker| {
            let pool = pool.clone();
            thread::spawn(move || -> Result<(), PoolError> {
                for job in 0..3 {
                    let mut conn = pool.get()?;
                    conn.execute(&format!("UPDATE jobs SET worker = {worker} WHERE id = {job}"))?;
                    conn.release();
                }
                Ok(())
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked")?;
    }

    println!("\n{}", pool.status());

    pool.close();
    println!("\nPool closed");
    Ok(())
}

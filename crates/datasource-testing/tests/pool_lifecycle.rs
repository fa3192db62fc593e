//! Pool lifecycle tests against the mock connection factory.
//!
//! Run with:
//! ```bash
//! cargo test -p datasource-testing --test pool_lifecycle
//! ```

#![allow(clippy::unwrap_used, clippy::panic)]

use std::thread;
use std::time::Duration;

use datasource_pool::{
    Connection, ConnectionError, ConnectionState, DataSourceFactory, IsolationLevel, Pool,
    PoolConfig, PoolError, Target,
};
use datasource_testing::{MockFactory, init_tracing, mock_pool, mock_pool_with, mock_target};

fn ping_config() -> PoolConfig {
    PoolConfig::new()
        .ping_enabled(true)
        .ping_query("SELECT 1")
        .ping_threshold(Duration::ZERO)
}

// =============================================================================
// Reuse
// =============================================================================

#[test]
fn test_release_then_acquire_reuses_raw_connection() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let first = pool.get().unwrap();
    let first_id = first.id();
    let raw_id = first.raw_id();
    first.release();

    let second = pool.get().unwrap();
    assert_eq!(second.raw_id(), raw_id, "idle connection should be reused");
    assert_ne!(second.id(), first_id, "reuse should come with a new handle");
    assert_eq!(factory.opened(), 1);
}

#[test]
fn test_idle_list_is_bounded_by_max_idle() {
    let (pool, factory) = mock_pool(PoolConfig::new().max_active(4).max_idle(2)).unwrap();

    let held: Vec<_> = (0..4).map(|_| pool.get().unwrap()).collect();
    assert_eq!(pool.status().active, 4);
    drop(held);

    let status = pool.status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 2);
    assert_eq!(factory.closed(), 2, "connections beyond max_idle are closed");
}

#[test]
fn test_idle_connections_reused_oldest_first() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    let a = pool.get().unwrap();
    let b = pool.get().unwrap();
    let (a_raw, b_raw) = (a.raw_id(), b.raw_id());
    b.release();
    a.release();

    assert_eq!(pool.get().unwrap().raw_id(), b_raw);
    assert_eq!(pool.get().unwrap().raw_id(), a_raw);
}

#[test]
fn test_drop_returns_connection() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();
    {
        let _conn = pool.get().unwrap();
        assert_eq!(pool.status().active, 1);
    }
    let status = pool.status();
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 1);
}

// =============================================================================
// Transactions
// =============================================================================

#[test]
fn test_release_rolls_back_pending_work() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    let mut conn = pool.get().unwrap();
    conn.set_auto_commit(false).unwrap();
    conn.execute("INSERT INTO jobs VALUES (1)").unwrap();
    assert_eq!(conn.with_connection(|c| c.pending()).unwrap(), 1);
    conn.release();

    let conn = pool.get().unwrap();
    let (pending, rollbacks) = conn
        .with_connection(|c| (c.pending(), c.rollback_count()))
        .unwrap();
    assert_eq!(pending, 0);
    assert!(rollbacks >= 1);
}

#[test]
fn test_committed_work_is_kept() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    let mut conn = pool.get().unwrap();
    conn.set_auto_commit(false).unwrap();
    conn.execute("INSERT INTO jobs VALUES (1)").unwrap();
    conn.commit().unwrap();
    assert!(!conn.auto_commit().unwrap());
    let commits = conn.with_connection(|c| c.commit_count()).unwrap();
    assert_eq!(commits, 1);
}

#[test]
fn test_target_defaults_applied_on_create() {
    init_tracing();
    let factory = MockFactory::new();
    let target = Target::new("mock://db")
        .default_auto_commit(false)
        .default_isolation_level(IsolationLevel::Snapshot)
        .default_network_timeout(Duration::from_secs(15))
        .driver_property("application_name", "jobs");
    let pool = Pool::new(factory, target, PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    assert!(!conn.auto_commit().unwrap());
    let (isolation, timeout, app) = conn
        .with_connection(|c| {
            (
                c.isolation_level(),
                c.network_timeout(),
                c.driver_property("application_name").map(str::to_string),
            )
        })
        .unwrap();
    assert_eq!(isolation, Some(IsolationLevel::Snapshot));
    assert_eq!(timeout, Some(Duration::from_secs(15)));
    assert_eq!(app.as_deref(), Some("jobs"));
}

// =============================================================================
// Overdue reclamation
// =============================================================================

#[test]
fn test_overdue_connection_is_reclaimed() {
    let config = PoolConfig::new()
        .max_active(1)
        .checkout_timeout(Duration::ZERO);
    let (pool, factory) = mock_pool(config).unwrap();

    let mut first = pool.get().unwrap();
    thread::sleep(Duration::from_millis(5));

    let second = pool.get().unwrap();
    assert_eq!(second.raw_id(), first.raw_id());
    assert_ne!(second.id(), first.id());
    assert!(!first.is_valid());
    assert_eq!(first.state(), ConnectionState::Reclaimed);
    assert!(matches!(first.execute("SELECT 1"), Err(PoolError::Invalidated)));
    assert!(second.is_valid());

    let status = pool.status();
    assert_eq!(status.claimed_overdue_count, 1);
    assert_eq!(status.active, 1);
    assert!(status.average_overdue_checkout_time >= Duration::from_millis(5));
    assert_eq!(factory.opened(), 1);

    // Releasing the stale handle must not disturb the new owner.
    drop(first);
    assert!(second.is_valid());
    assert_eq!(pool.status().active, 1);
}

#[test]
fn test_reclaim_rolls_back_previous_owner_work() {
    let config = PoolConfig::new()
        .max_active(1)
        .checkout_timeout(Duration::ZERO);
    let (pool, _factory) = mock_pool(config).unwrap();

    let mut first = pool.get().unwrap();
    first.set_auto_commit(false).unwrap();
    first.execute("DELETE FROM jobs").unwrap();
    thread::sleep(Duration::from_millis(5));

    let second = pool.get().unwrap();
    let (pending, rollbacks) = second
        .with_connection(|c| (c.pending(), c.rollback_count()))
        .unwrap();
    assert_eq!(pending, 0);
    assert!(rollbacks >= 1);
}

#[test]
fn test_detach_of_reclaimed_handle_fails() {
    let config = PoolConfig::new()
        .max_active(1)
        .checkout_timeout(Duration::ZERO);
    let (pool, _factory) = mock_pool(config).unwrap();

    let first = pool.get().unwrap();
    thread::sleep(Duration::from_millis(5));
    let _second = pool.get().unwrap();

    assert!(matches!(first.detach(), Err(PoolError::Invalidated)));
}

// =============================================================================
// Liveness
// =============================================================================

#[test]
fn test_dead_idle_connection_is_replaced() {
    let (pool, factory) = mock_pool(ping_config()).unwrap();

    let conn = pool.get().unwrap();
    let dead_raw = conn.raw_id();
    conn.release();
    factory.sever_all();
    thread::sleep(Duration::from_millis(2));

    let conn = pool.get().unwrap();
    assert_ne!(conn.raw_id(), dead_raw);
    assert_eq!(factory.opened(), 2);
    assert_eq!(factory.closed(), 1, "failed ping closes the connection");

    let status = pool.status();
    assert_eq!(status.bad_connection_count, 1);
    assert_eq!(status.idle, 0);
}

#[test]
fn test_connection_failing_probe_on_release_is_not_pooled() {
    let (pool, factory) = mock_pool(ping_config()).unwrap();

    let conn = pool.get().unwrap();
    factory.sever_all();
    thread::sleep(Duration::from_millis(2));
    conn.release();

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.active, 0);
    assert_eq!(status.bad_connection_count, 1);
    assert_eq!(factory.open_now(), 0);
}

#[test]
fn test_closed_connection_is_never_pooled() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    conn.with_connection(|c| c.close()).unwrap().unwrap();
    conn.release();

    assert_eq!(pool.status().idle, 0);
    assert_eq!(pool.status().bad_connection_count, 1);
    assert_eq!(factory.closed(), 1);
}

#[test]
fn test_disabled_ping_skips_probe_query() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    pool.get().unwrap().release();
    thread::sleep(Duration::from_millis(2));
    let conn = pool.get().unwrap();
    let executed = conn.with_connection(|c| c.executed().len()).unwrap();
    assert_eq!(executed, 0);
}

#[test]
fn test_always_closed_factory_exhausts() {
    let factory = MockFactory::builder().born_closed(true).build();
    let (pool, factory) = mock_pool_with(factory, PoolConfig::new()).unwrap();

    let err = pool.get().unwrap_err();
    assert!(matches!(err, PoolError::Exhausted { attempts: 9 }), "{err:?}");
    assert!(err.is_transient());
    assert_eq!(factory.opened(), 9, "max_idle + tolerance + 1 attempts");

    let status = pool.status();
    assert_eq!(status.bad_connection_count, 9);
    assert_eq!(status.active, 0);
    assert_eq!(status.idle, 0);
}

#[test]
fn test_exhaustion_limit_follows_config() {
    let factory = MockFactory::builder().born_closed(true).build();
    let config = PoolConfig::new().max_idle(1).bad_connection_tolerance(0);
    let (pool, factory) = mock_pool_with(factory, config).unwrap();

    assert!(matches!(pool.get(), Err(PoolError::Exhausted { attempts: 2 })));
    assert_eq!(factory.opened(), 2);
}

// =============================================================================
// Factory errors
// =============================================================================

#[test]
fn test_factory_error_propagates_unchanged() {
    let factory = MockFactory::builder().refuse_connections(true).build();
    let (pool, factory) = mock_pool_with(factory, PoolConfig::new()).unwrap();

    let err = pool.get().unwrap_err();
    match err {
        PoolError::Factory(ConnectionError::Driver(msg)) => {
            assert!(msg.contains("mock://localhost/test"), "{msg}");
        }
        other => panic!("expected factory error, got {other:?}"),
    }
    assert_eq!(pool.status().active, 0);

    factory.set_refuse_connections(false);
    assert!(pool.get().is_ok());
}

// =============================================================================
// Per-call credentials
// =============================================================================

#[test]
fn test_get_as_uses_caller_credentials() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get_as("reporting", "hunter2").unwrap();
    let user = conn
        .with_connection(|c| c.username().map(str::to_string))
        .unwrap();
    assert_eq!(user.as_deref(), Some("reporting"));
    assert_ne!(conn.type_code(), pool.target().type_code());

    conn.release();
    assert_eq!(pool.status().idle, 0, "foreign credentials are not pooled");
    assert_eq!(factory.closed(), 1);
}

#[test]
fn test_get_as_with_pool_credentials_is_pooled() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get_as("app", "secret").unwrap();
    assert_eq!(conn.type_code(), mock_target().type_code());
    conn.release();
    assert_eq!(pool.status().idle, 1);
}

#[test]
fn test_get_as_reuses_idle_connection() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    let raw_id = conn.raw_id();
    conn.release();

    let conn = pool.get_as("reporting", "hunter2").unwrap();
    assert_eq!(conn.raw_id(), raw_id);
    conn.release();
    assert_eq!(factory.closed(), 1);
}

// =============================================================================
// Reconfiguration
// =============================================================================

#[test]
fn test_reconfigure_closes_pooled_connections() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    let old_raw = conn.raw_id();
    conn.release();
    assert_eq!(pool.status().idle, 1);

    pool.set_max_idle(3).unwrap();
    assert_eq!(pool.config().max_idle, 3);
    assert_eq!(pool.status().idle, 0);
    assert_eq!(factory.closed(), 1);

    let conn = pool.get().unwrap();
    assert_ne!(conn.raw_id(), old_raw);
    assert_eq!(factory.opened(), 2);
}

#[test]
fn test_reconfigure_invalidates_active_handles() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let mut held = pool.get().unwrap();
    pool.set_ping_threshold(Duration::from_secs(30)).unwrap();

    assert!(!held.is_valid());
    assert_eq!(held.state(), ConnectionState::Closed);
    assert!(matches!(held.execute("SELECT 1"), Err(PoolError::Invalidated)));
    assert_eq!(pool.status().active, 0);
    assert_eq!(factory.open_now(), 0);

    drop(held);
    assert_eq!(pool.status().idle, 0);
}

#[test]
fn test_changed_credentials_retire_old_type_code() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let held = pool.get().unwrap();
    let old_code = held.type_code();
    pool.set_credentials("app", "rotated").unwrap();
    drop(held);

    let conn = pool.get().unwrap();
    assert_ne!(conn.type_code(), old_code);
    let user = conn
        .with_connection(|c| c.username().map(str::to_string))
        .unwrap();
    assert_eq!(user.as_deref(), Some("app"));
    assert_eq!(factory.opened(), 2);
}

#[test]
fn test_invalid_reconfiguration_is_rejected() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();
    pool.get().unwrap().release();

    let no_query = PoolConfig::new().ping_enabled(true).ping_query("");
    assert!(matches!(pool.set_config(no_query), Err(PoolError::Configuration(_))));
    assert!(matches!(pool.set_max_active(0), Err(PoolError::Configuration(_))));
    assert_eq!(pool.status().idle, 1);
    assert_eq!(factory.closed(), 0);
}

// =============================================================================
// Force close, shutdown and detach
// =============================================================================

#[test]
fn test_force_close_all_keeps_pool_usable() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let mut held = pool.get().unwrap();
    pool.get().unwrap().release();
    pool.force_close_all();

    assert!(matches!(held.execute("SELECT 1"), Err(PoolError::Invalidated)));
    assert_eq!(factory.open_now(), 0);
    assert!(!pool.is_closed());

    let conn = pool.get().unwrap();
    assert!(conn.is_valid());
}

#[test]
fn test_close_rejects_new_acquires() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let held = pool.get().unwrap();
    pool.get().unwrap().release();
    pool.close();
    pool.close();

    assert!(pool.is_closed());
    assert!(matches!(pool.get(), Err(PoolError::PoolClosed)));
    assert!(!held.is_valid());
    drop(held);
    assert_eq!(factory.open_now(), 0);
    assert_eq!(pool.status().idle, 0);
}

#[test]
fn test_detach_hands_over_raw_connection() {
    let (pool, factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    let raw = conn.detach().unwrap();
    assert_eq!(pool.status().active, 0);
    assert_eq!(factory.closed(), 0);

    {
        let mut raw_conn = raw.lock();
        raw_conn.execute("SELECT 1").unwrap();
        raw_conn.close().unwrap();
    }
    assert_eq!(factory.closed(), 1);

    pool.get().unwrap();
    assert_eq!(factory.opened(), 2);
}

#[test]
fn test_raw_connection_escape_hatch() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    let conn = pool.get().unwrap();
    let raw = conn.raw_connection();
    assert_eq!(raw.id(), conn.raw_id());
    assert_eq!(raw.lock().id(), 1);
}

// =============================================================================
// Diagnostics and configuration surface
// =============================================================================

#[test]
fn test_status_tracks_requests_and_checkout_time() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    for _ in 0..3 {
        let conn = pool.get().unwrap();
        thread::sleep(Duration::from_millis(2));
        conn.release();
    }

    let status = pool.status();
    assert_eq!(status.request_count, 3);
    assert!(status.average_checkout_time >= Duration::from_millis(2));
    assert_eq!(status.had_to_wait_count, 0);
    assert_eq!(status.average_wait_time, Duration::ZERO);

    let report = status.to_string();
    assert!(report.contains("request count                  3"), "{report}");
}

#[test]
fn test_metadata_counts_checkouts_across_handles() {
    let (pool, _factory) = mock_pool(PoolConfig::new()).unwrap();

    pool.get().unwrap().release();
    pool.get().unwrap().release();
    let conn = pool.get().unwrap();

    let meta = conn.metadata();
    assert_eq!(meta.checkout_count, 3);
    assert_eq!(meta.raw_id, conn.raw_id());
    assert_eq!(meta.state, ConnectionState::Active);
    assert!(meta.checkout_at.is_some());
    assert!(meta.created_at <= meta.last_used_at);
    assert!(conn.time_since_last_use() <= conn.age());
}

#[test]
fn test_data_source_factory_builds_working_pool() {
    init_tracing();
    let pool = DataSourceFactory::from_properties(
        "url=mock://props; username=svc; password=pw; max_active=2; driver.sslmode=require",
    )
    .unwrap()
    .build(MockFactory::new())
    .unwrap();

    let conn = pool.get().unwrap();
    let (user, ssl) = conn
        .with_connection(|c| {
            (
                c.username().map(str::to_string),
                c.driver_property("sslmode").map(str::to_string),
            )
        })
        .unwrap();
    assert_eq!(user.as_deref(), Some("svc"));
    assert_eq!(ssl.as_deref(), Some("require"));
    assert_eq!(pool.status().max_active, 2);
}

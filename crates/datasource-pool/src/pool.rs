//! Connection pool implementation.
//!
//! All pool bookkeeping lives in one [`PoolState`] behind one lock. Acquires
//! that cannot be served wait on a condition variable paired with that lock.
//! Every release broadcasts, and each woken waiter re-checks the pool from
//! scratch, so waiters are not served in arrival order.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::{PoolConfig, Target, TypeCode};
use crate::connection::{PooledConnection, ReturnToPool, Tracked};
use crate::error::{ConnectionError, PoolError};
use crate::lifecycle::{Connection, ConnectionFactory, ConnectionState, IsolationLevel};
use crate::probe::LivenessProbe;
use crate::state::{PoolState, PoolStatus};

/// Margin added when sleeping until the oldest checkout becomes overdue.
const OVERDUE_SLACK: Duration = Duration::from_millis(1);

/// A synchronous, thread-safe connection pool.
///
/// The pool creates connections lazily up to `max_active`, keeps up to
/// `max_idle` of them for reuse, reclaims connections held longer than
/// `checkout_timeout`, and probes connections before handing them out.
///
/// Cloning a `Pool` yields another handle to the same pool.
pub struct Pool<F: ConnectionFactory> {
    inner: Arc<PoolInner<F>>,
}

struct PoolInner<F: ConnectionFactory> {
    factory: F,
    state: Mutex<PoolState<F::Connection>>,
    available: Condvar,
}

impl<F: ConnectionFactory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: ConnectionFactory> Pool<F> {
    /// Create a pool for `target`.
    ///
    /// No connection is opened until the first acquire.
    pub fn new(factory: F, target: Target, config: PoolConfig) -> Result<Self, PoolError> {
        config.validate()?;
        tracing::debug!(
            url = %target.url,
            max_active = config.max_active,
            max_idle = config.max_idle,
            "creating connection pool"
        );
        Ok(Self {
            inner: Arc::new(PoolInner {
                factory,
                state: Mutex::new(PoolState::new(config, target)),
                available: Condvar::new(),
            }),
        })
    }

    /// Get a connection from the pool.
    ///
    /// Reuses the oldest idle connection, otherwise opens a new one if the
    /// pool is below `max_active`, otherwise reclaims the oldest checkout if
    /// it is overdue, otherwise waits for a release.
    ///
    /// # Errors
    ///
    /// - [`PoolError::Factory`] if opening a connection fails
    /// - [`PoolError::Exhausted`] if too many candidates fail the liveness probe
    /// - [`PoolError::AcquisitionTimeout`] if nothing frees up within `wait_timeout`
    /// - [`PoolError::PoolClosed`] after [`close`](Self::close)
    pub fn get(&self) -> Result<PooledConnection<F::Connection>, PoolError> {
        self.pop_connection(None, None)
    }

    /// Get a connection for different credentials on the same url.
    ///
    /// New connections are opened with these credentials. The handle is bound
    /// to their type code, so unless they match the pool's own credentials the
    /// connection is closed on release instead of pooled.
    pub fn get_as(
        &self,
        username: &str,
        password: &str,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        self.pop_connection(Some((username, password)), None)
    }

    /// Get a connection, giving up with [`PoolError::Interrupted`] if
    /// `interrupt` fires while the acquire has to wait.
    ///
    /// An acquire that can be served without waiting succeeds even when the
    /// handle is already interrupted. The handle must come from this pool's
    /// [`interrupt_handle`](Self::interrupt_handle); any other handle is
    /// rejected with [`PoolError::Configuration`].
    pub fn get_interruptible(
        &self,
        interrupt: &WaitInterrupt,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        if !interrupt.belongs_to(&self.inner) {
            return Err(PoolError::Configuration(
                "interrupt handle belongs to another pool".into(),
            ));
        }
        self.pop_connection(None, Some(interrupt))
    }

    /// Create a handle that can interrupt acquires waiting on this pool.
    #[must_use]
    pub fn interrupt_handle(&self) -> WaitInterrupt {
        let inner = Arc::downgrade(&self.inner);
        let pool: Weak<dyn WakeWaiters> = inner;
        WaitInterrupt {
            flag: Arc::new(AtomicBool::new(false)),
            pool,
        }
    }

    fn pop_connection(
        &self,
        credentials: Option<(&str, &str)>,
        interrupt: Option<&WaitInterrupt>,
    ) -> Result<PooledConnection<F::Connection>, PoolError> {
        let started = Instant::now();
        let mut counted_wait = false;
        let mut wait_started: Option<Instant> = None;
        let mut local_bad_count = 0usize;

        let mut state = self.inner.state.lock();
        loop {
            if state.closed {
                return Err(PoolError::PoolClosed);
            }
            let candidate = if let Some(conn) = state.idle.pop_front() {
                tracing::debug!(
                    connection_id = conn.raw().id(),
                    "checked out connection from pool"
                );
                conn
            } else if state.active.len() < state.config.max_active {
                let target = match credentials {
                    Some((username, password)) => {
                        state.target.with_credentials(Some(username), Some(password))
                    }
                    None => state.target.clone(),
                };
                self.inner.create(&target)?
            } else if let Some(conn) = claim_overdue(&mut state) {
                conn
            } else {
                if !counted_wait {
                    state.stats.had_to_wait_count += 1;
                    counted_wait = true;
                }
                check_interrupt(interrupt)?;
                let wait_for = wait_budget(&state, &mut wait_started)?;
                tracing::debug!(
                    wait_ms = u64::try_from(wait_for.as_millis()).unwrap_or(u64::MAX),
                    "waiting for connection"
                );
                let wait_began = Instant::now();
                self.inner.available.wait_for(&mut state, wait_for);
                state.stats.accumulated_wait_time += wait_began.elapsed();
                check_interrupt(interrupt)?;
                continue;
            };

            let probe = LivenessProbe::from_config(&state.config);
            if is_usable(&candidate, &probe) && rolled_back(&candidate) {
                let type_code = match credentials {
                    Some((username, password)) => {
                        TypeCode::of(&state.target.url, Some(username), Some(password))
                    }
                    None => state.target.type_code(),
                };
                candidate.with_meta(|meta| meta.mark_checkout(type_code));
                state.active.push(Arc::clone(&candidate));
                state.stats.request_count += 1;
                state.stats.accumulated_request_time += started.elapsed();

                let pool: Arc<dyn ReturnToPool<F::Connection>> = self.inner.clone();
                return Ok(PooledConnection::new(candidate, pool));
            }

            tracing::debug!(
                connection_id = candidate.raw().id(),
                "a bad connection was returned from the pool, getting another connection"
            );
            state.stats.bad_connection_count += 1;
            local_bad_count += 1;
            discard(&candidate);

            if local_bad_count > state.config.bad_connection_limit() {
                tracing::debug!(
                    attempts = local_bad_count,
                    "could not get a good connection to the database"
                );
                return Err(PoolError::Exhausted {
                    attempts: local_bad_count,
                });
            }
        }
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.inner.state.lock().status()
    }

    /// Get a copy of the pool configuration.
    #[must_use]
    pub fn config(&self) -> PoolConfig {
        self.inner.state.lock().config.clone()
    }

    /// Get a copy of the pool target.
    #[must_use]
    pub fn target(&self) -> Target {
        self.inner.state.lock().target.clone()
    }

    /// Close every idle and active connection.
    ///
    /// Outstanding handles are retired; using them fails with
    /// [`PoolError::Invalidated`]. The pool stays open and creates fresh
    /// connections on demand.
    pub fn force_close_all(&self) {
        let mut state = self.inner.state.lock();
        close_all(&mut state);
        drop(state);
        self.inner.available.notify_all();
    }

    /// Shut the pool down.
    ///
    /// Closes every connection, wakes all waiters, and makes later acquires
    /// fail with [`PoolError::PoolClosed`]. Connections released afterwards
    /// are closed.
    pub fn close(&self) {
        let mut state = self.inner.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        close_all(&mut state);
        drop(state);
        self.inner.available.notify_all();
        tracing::info!("connection pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Replace the whole configuration.
    ///
    /// Like every setter below, this closes all pooled connections.
    pub fn set_config(&self, config: PoolConfig) -> Result<(), PoolError> {
        self.reconfigure(|current, _| *current = config)
    }

    /// Replace the target.
    pub fn set_target(&self, target: Target) -> Result<(), PoolError> {
        self.reconfigure(|_, current| *current = target)
    }

    /// Set the maximum number of active connections.
    pub fn set_max_active(&self, count: usize) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.max_active = count)
    }

    /// Set the maximum number of idle connections.
    pub fn set_max_idle(&self, count: usize) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.max_idle = count)
    }

    /// Set the checkout time after which a connection may be reclaimed.
    pub fn set_checkout_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.checkout_timeout = timeout)
    }

    /// Set the wait timeout.
    pub fn set_wait_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.wait_timeout = timeout)
    }

    /// Set the per-acquire bad connection tolerance.
    pub fn set_bad_connection_tolerance(&self, tolerance: usize) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.bad_connection_tolerance = tolerance)
    }

    /// Enable or disable the ping query.
    pub fn set_ping_enabled(&self, enabled: bool) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.ping_enabled = enabled)
    }

    /// Set the ping query.
    pub fn set_ping_query(&self, query: impl Into<Arc<str>>) -> Result<(), PoolError> {
        let query = query.into();
        self.reconfigure(|config, _| config.ping_query = query)
    }

    /// Set how long a connection may sit unused before it gets pinged.
    pub fn set_ping_threshold(&self, threshold: Duration) -> Result<(), PoolError> {
        self.reconfigure(|config, _| config.ping_threshold = threshold)
    }

    /// Set the url.
    pub fn set_url(&self, url: impl Into<String>) -> Result<(), PoolError> {
        let url = url.into();
        self.reconfigure(|_, target| target.url = url)
    }

    /// Set the login credentials.
    pub fn set_credentials(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), PoolError> {
        let (username, password) = (username.into(), password.into());
        self.reconfigure(|_, target| {
            target.username = Some(username);
            target.password = Some(password);
        })
    }

    /// Set the auto-commit mode applied to new connections.
    pub fn set_default_auto_commit(&self, enabled: bool) -> Result<(), PoolError> {
        self.reconfigure(|_, target| target.default_auto_commit = Some(enabled))
    }

    /// Set the isolation level applied to new connections.
    pub fn set_default_isolation_level(&self, level: IsolationLevel) -> Result<(), PoolError> {
        self.reconfigure(|_, target| target.default_isolation_level = Some(level))
    }

    /// Set the network timeout applied to new connections.
    pub fn set_default_network_timeout(&self, timeout: Duration) -> Result<(), PoolError> {
        self.reconfigure(|_, target| target.default_network_timeout = Some(timeout))
    }

    fn reconfigure(
        &self,
        update: impl FnOnce(&mut PoolConfig, &mut Target),
    ) -> Result<(), PoolError> {
        let mut state = self.inner.state.lock();
        let mut config = state.config.clone();
        let mut target = state.target.clone();
        update(&mut config, &mut target);
        config.validate()?;
        state.config = config;
        state.target = target;
        close_all(&mut state);
        drop(state);
        self.inner.available.notify_all();
        Ok(())
    }
}

impl<F: ConnectionFactory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Pool")
            .field("target", &state.target)
            .field("config", &state.config)
            .field("active", &state.active.len())
            .field("idle", &state.idle.len())
            .field("closed", &state.closed)
            .finish()
    }
}

impl<F: ConnectionFactory> PoolInner<F> {
    fn create(&self, target: &Target) -> Result<Arc<Tracked<F::Connection>>, PoolError> {
        let mut conn = self.factory.connect(target).map_err(PoolError::Factory)?;
        if let Err(e) = apply_defaults(&mut conn, target) {
            close_quietly(&mut conn);
            return Err(PoolError::Factory(e));
        }
        let tracked = Tracked::new(conn, target.type_code());
        tracing::debug!(connection_id = tracked.raw().id(), "created connection");
        Ok(tracked)
    }
}

impl<F: ConnectionFactory> ReturnToPool<F::Connection> for PoolInner<F> {
    fn push(&self, conn: Arc<Tracked<F::Connection>>) {
        let mut state = self.state.lock();
        state.remove_active(&conn);

        let probe = LivenessProbe::from_config(&state.config);
        if is_usable(&conn, &probe) {
            state.stats.accumulated_checkout_time += conn.checkout_time();
            let clean = rolled_back(&conn);
            let keep = clean
                && !state.closed
                && state.idle.len() < state.config.max_idle
                && conn.type_code() == state.expected_type_code;

            if keep {
                let fresh = conn.rehome();
                fresh.with_meta(|meta| meta.mark_idle());
                conn.invalidate(ConnectionState::Invalid);
                tracing::debug!(connection_id = fresh.raw().id(), "returned connection to pool");
                state.idle.push_back(fresh);
            } else {
                conn.invalidate(ConnectionState::Closed);
                close_quietly(&mut *conn.raw().lock());
                tracing::debug!(connection_id = conn.raw().id(), "closed connection");
            }
        } else {
            tracing::debug!(
                connection_id = conn.raw().id(),
                "a bad connection attempted to return to the pool, discarding connection"
            );
            state.stats.bad_connection_count += 1;
            // Retired handles no longer own their raw connection.
            if conn.is_flagged_valid() {
                discard(&conn);
            }
        }

        drop(state);
        self.available.notify_all();
    }

    fn detach(&self, conn: &Arc<Tracked<F::Connection>>) -> bool {
        let mut state = self.state.lock();
        let owned = state.remove_active(conn) && conn.is_flagged_valid();
        if owned {
            conn.invalidate(ConnectionState::Invalid);
            tracing::debug!(connection_id = conn.raw().id(), "detached connection from pool");
        }
        drop(state);
        self.available.notify_all();
        owned
    }
}

/// Reclaim the oldest active connection if it has been checked out too long.
///
/// The caller's handle is retired and the raw connection comes back under a
/// new handle.
fn claim_overdue<C: Connection>(state: &mut PoolState<C>) -> Option<Arc<Tracked<C>>> {
    let checkout = state.active.first()?.checkout_time();
    if checkout <= state.config.checkout_timeout {
        return None;
    }

    let overdue = state.active.remove(0);
    state.stats.claimed_overdue_count += 1;
    state.stats.accumulated_overdue_checkout_time += checkout;
    state.stats.accumulated_checkout_time += checkout;

    overdue.invalidate(ConnectionState::Reclaimed);
    if let Err(e) = rollback_if_needed(&mut *overdue.raw().lock()) {
        tracing::debug!(
            connection_id = overdue.raw().id(),
            error = %e,
            "bad connection, could not roll back"
        );
    }

    let conn = overdue.rehome();
    tracing::debug!(
        connection_id = conn.raw().id(),
        checkout_ms = u64::try_from(checkout.as_millis()).unwrap_or(u64::MAX),
        "claimed overdue connection"
    );
    Some(conn)
}

fn check_interrupt(interrupt: Option<&WaitInterrupt>) -> Result<(), PoolError> {
    if interrupt.is_some_and(WaitInterrupt::is_interrupted) {
        tracing::debug!("acquire interrupted while waiting for a connection");
        return Err(PoolError::Interrupted);
    }
    Ok(())
}

/// How long the next wait may last, or a timeout error once the budget is spent.
fn wait_budget<C>(
    state: &PoolState<C>,
    wait_started: &mut Option<Instant>,
) -> Result<Duration, PoolError> {
    let config = &state.config;
    let mut wait_for = if config.indefinite_wait {
        config.wait_timeout.max(OVERDUE_SLACK)
    } else {
        let began = *wait_started.get_or_insert_with(Instant::now);
        let remaining = config.wait_timeout.saturating_sub(began.elapsed());
        if remaining.is_zero() {
            tracing::debug!(
                wait_ms = u64::try_from(config.wait_timeout.as_millis()).unwrap_or(u64::MAX),
                "timed out waiting for connection"
            );
            return Err(PoolError::AcquisitionTimeout(config.wait_timeout));
        }
        remaining
    };

    // Wake up in time to reclaim the oldest checkout.
    if let Some(oldest) = state.active.first() {
        let until_overdue = config
            .checkout_timeout
            .saturating_sub(oldest.checkout_time())
            .saturating_add(OVERDUE_SLACK);
        wait_for = wait_for.min(until_overdue);
    }
    Ok(wait_for)
}

/// Retire and close every pooled connection, and refresh the expected type code.
fn close_all<C: Connection>(state: &mut PoolState<C>) {
    state.expected_type_code = state.target.type_code();

    let active: Vec<_> = state.active.drain(..).rev().collect();
    let idle: Vec<_> = state.idle.drain(..).rev().collect();
    for conn in active.iter().chain(idle.iter()) {
        conn.invalidate(ConnectionState::Closed);
        let mut raw = conn.raw().lock();
        if let Err(e) = rollback_if_needed(&mut *raw) {
            tracing::debug!(connection_id = conn.raw().id(), error = %e, "rollback failed");
        }
        close_quietly(&mut *raw);
    }

    tracing::debug!(
        active = active.len(),
        idle = idle.len(),
        "forcefully closed/removed all connections"
    );
}

/// Handle validity plus the liveness probe.
fn is_usable<C: Connection>(conn: &Tracked<C>, probe: &LivenessProbe) -> bool {
    if !conn.is_flagged_valid() {
        return false;
    }
    let idle_for = conn.with_meta(|meta| meta.time_since_last_use());
    let result = probe.check(&mut *conn.raw().lock(), idle_for);
    if !result.healthy {
        tracing::debug!(
            connection_id = conn.raw().id(),
            error = result.error.as_deref().unwrap_or_default(),
            "connection is bad"
        );
    }
    result.healthy
}

/// Roll back pending work; `false` if that failed.
fn rolled_back<C: Connection>(conn: &Tracked<C>) -> bool {
    match rollback_if_needed(&mut *conn.raw().lock()) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(connection_id = conn.raw().id(), error = %e, "rollback failed");
            false
        }
    }
}

fn discard<C: Connection>(conn: &Tracked<C>) {
    conn.invalidate(ConnectionState::Invalid);
    let mut raw = conn.raw().lock();
    if !matches!(raw.is_closed(), Ok(true)) {
        close_quietly(&mut *raw);
    }
}

fn rollback_if_needed<C: Connection + ?Sized>(conn: &mut C) -> Result<(), ConnectionError> {
    if !conn.auto_commit()? {
        conn.rollback()?;
    }
    Ok(())
}

fn close_quietly<C: Connection + ?Sized>(conn: &mut C) {
    if let Err(e) = conn.close() {
        tracing::debug!(error = %e, "error closing connection");
    }
}

fn apply_defaults<C: Connection>(conn: &mut C, target: &Target) -> Result<(), ConnectionError> {
    if let Some(enabled) = target.default_auto_commit {
        conn.set_auto_commit(enabled)?;
    }
    if let Some(level) = target.default_isolation_level {
        conn.set_isolation_level(level)?;
    }
    if let Some(timeout) = target.default_network_timeout {
        conn.set_network_timeout(timeout)?;
    }
    Ok(())
}

/// Lets a [`WaitInterrupt`] wake waiters without knowing the factory type.
trait WakeWaiters: Send + Sync {
    fn wake_all(&self);
}

impl<F: ConnectionFactory> WakeWaiters for PoolInner<F> {
    fn wake_all(&self) {
        // Taking the lock orders this wake-up after any waiter's flag check.
        let _state = self.state.lock();
        self.available.notify_all();
    }
}

/// Interrupts acquires waiting on the pool that created it.
///
/// Obtained from [`Pool::interrupt_handle`] and passed to
/// [`Pool::get_interruptible`]. Clones share the same flag.
#[derive(Clone)]
pub struct WaitInterrupt {
    flag: Arc<AtomicBool>,
    pool: Weak<dyn WakeWaiters>,
}

impl WaitInterrupt {
    /// Abort every acquire waiting with this handle.
    pub fn interrupt(&self) {
        self.flag.store(true, Ordering::SeqCst);
        if let Some(pool) = self.pool.upgrade() {
            pool.wake_all();
        }
    }

    /// Check whether [`interrupt`](Self::interrupt) has been called.
    #[must_use]
    pub fn is_interrupted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Re-arm the handle for later acquires.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }

    fn belongs_to<T>(&self, pool: &Arc<T>) -> bool {
        std::ptr::addr_eq(self.pool.as_ptr(), Arc::as_ptr(pool))
    }
}

impl fmt::Debug for WaitInterrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitInterrupt")
            .field("interrupted", &self.is_interrupted())
            .finish()
    }
}

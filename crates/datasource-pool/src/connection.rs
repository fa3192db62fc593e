//! Pooled connection handles.
//!
//! A raw connection can outlive several handles: returning it to the idle
//! list or reclaiming it from an overdue caller wraps it in a new handle and
//! retires the old one. Identity and equality of a [`PooledConnection`] are
//! therefore per handle, while [`PooledConnection::raw_id`] identifies the
//! physical connection.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};

use crate::config::TypeCode;
use crate::error::PoolError;
use crate::lifecycle::{Connection, ConnectionMetadata, ConnectionState};

static NEXT_RAW_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// A physical connection shared by the pool and the handle that owns it.
pub struct RawConnection<C> {
    id: u64,
    conn: Mutex<C>,
}

impl<C> RawConnection<C> {
    fn new(conn: C) -> Self {
        Self {
            id: NEXT_RAW_ID.fetch_add(1, Ordering::Relaxed),
            conn: Mutex::new(conn),
        }
    }

    /// Identity of the physical connection.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lock the physical connection.
    ///
    /// Do not hold the guard across calls into the pool.
    pub fn lock(&self) -> MutexGuard<'_, C> {
        self.conn.lock()
    }
}

impl<C> fmt::Debug for RawConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawConnection").field("id", &self.id).finish()
    }
}

/// One handle around a raw connection, as tracked in the idle and active lists.
pub(crate) struct Tracked<C> {
    id: u64,
    raw: Arc<RawConnection<C>>,
    valid: AtomicBool,
    meta: Mutex<ConnectionMetadata>,
}

impl<C> Tracked<C> {
    pub(crate) fn new(conn: C, type_code: TypeCode) -> Arc<Self> {
        let raw = Arc::new(RawConnection::new(conn));
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let meta = ConnectionMetadata::new(id, raw.id, type_code);
        Arc::new(Self {
            id,
            raw,
            valid: AtomicBool::new(true),
            meta: Mutex::new(meta),
        })
    }

    /// New handle around the same raw connection.
    pub(crate) fn rehome(&self) -> Arc<Self> {
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let meta = self.meta.lock().rehomed(id);
        Arc::new(Self {
            id,
            raw: Arc::clone(&self.raw),
            valid: AtomicBool::new(true),
            meta: Mutex::new(meta),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn raw(&self) -> &Arc<RawConnection<C>> {
        &self.raw
    }

    pub(crate) fn is_flagged_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self, state: ConnectionState) {
        self.valid.store(false, Ordering::Release);
        self.meta.lock().state = state;
    }

    pub(crate) fn metadata(&self) -> ConnectionMetadata {
        self.meta.lock().clone()
    }

    pub(crate) fn with_meta<R>(&self, f: impl FnOnce(&mut ConnectionMetadata) -> R) -> R {
        f(&mut self.meta.lock())
    }

    pub(crate) fn checkout_time(&self) -> Duration {
        self.meta.lock().checkout_time()
    }

    pub(crate) fn type_code(&self) -> TypeCode {
        self.meta.lock().type_code
    }
}

/// The path from a handle back to the pool that issued it.
pub(crate) trait ReturnToPool<C>: Send + Sync {
    /// Return a checked-out handle.
    fn push(&self, conn: Arc<Tracked<C>>);

    /// Forget a checked-out handle without pooling or closing it.
    ///
    /// Returns `false` if the handle had already been retired.
    fn detach(&self, conn: &Arc<Tracked<C>>) -> bool;
}

/// A connection checked out from the pool.
///
/// Call [`release`](Self::release) to hand it back; dropping the handle
/// releases it too. Once the pool has retired the handle (released,
/// reclaimed as overdue, or force-closed), every operation on it fails with
/// [`PoolError::Invalidated`].
pub struct PooledConnection<C: Connection + 'static> {
    tracked: Arc<Tracked<C>>,
    pool: Arc<dyn ReturnToPool<C>>,
    returned: bool,
}

impl<C: Connection + 'static> PooledConnection<C> {
    pub(crate) fn new(tracked: Arc<Tracked<C>>, pool: Arc<dyn ReturnToPool<C>>) -> Self {
        Self {
            tracked,
            pool,
            returned: false,
        }
    }

    /// Identity of this handle.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.tracked.id()
    }

    /// Identity of the physical connection behind this handle.
    #[must_use]
    pub fn raw_id(&self) -> u64 {
        self.tracked.raw().id()
    }

    /// Whether the pool still considers this handle the owner of its connection.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.tracked.is_flagged_valid()
    }

    /// Current state of this handle.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.tracked.metadata().state
    }

    /// Snapshot of this handle's metadata.
    #[must_use]
    pub fn metadata(&self) -> ConnectionMetadata {
        self.tracked.metadata()
    }

    /// Target fingerprint this handle was checked out for.
    #[must_use]
    pub fn type_code(&self) -> TypeCode {
        self.tracked.type_code()
    }

    /// How long this handle has been checked out.
    #[must_use]
    pub fn checkout_time(&self) -> Duration {
        self.tracked.checkout_time()
    }

    /// Time since the physical connection was last handed out.
    #[must_use]
    pub fn time_since_last_use(&self) -> Duration {
        self.tracked.with_meta(|meta| meta.time_since_last_use())
    }

    /// Time since the physical connection was opened.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.tracked.with_meta(|meta| meta.age())
    }

    /// Run `f` against the physical connection.
    ///
    /// Fails with [`PoolError::Invalidated`] once the pool has retired this
    /// handle. The connection stays locked while `f` runs, so `f` must not
    /// call back into the pool.
    pub fn with_connection<R>(&self, f: impl FnOnce(&mut C) -> R) -> Result<R, PoolError> {
        let mut conn = self.tracked.raw().lock();
        // Checked under the connection lock: the pool retires a handle
        // before it touches the connection on someone else's behalf.
        if !self.tracked.is_flagged_valid() {
            return Err(PoolError::Invalidated);
        }
        Ok(f(&mut conn))
    }

    /// Execute a statement.
    pub fn execute(&mut self, statement: &str) -> Result<(), PoolError> {
        self.with_connection(|conn| conn.execute(statement))?
            .map_err(PoolError::Connection)
    }

    /// Commit the current transaction.
    pub fn commit(&mut self) -> Result<(), PoolError> {
        self.with_connection(|conn| conn.commit())?
            .map_err(PoolError::Connection)
    }

    /// Roll back the current transaction.
    pub fn rollback(&mut self) -> Result<(), PoolError> {
        self.with_connection(|conn| conn.rollback())?
            .map_err(PoolError::Connection)
    }

    /// Current auto-commit mode.
    pub fn auto_commit(&self) -> Result<bool, PoolError> {
        self.with_connection(|conn| conn.auto_commit())?
            .map_err(PoolError::Connection)
    }

    /// Change the auto-commit mode.
    pub fn set_auto_commit(&mut self, enabled: bool) -> Result<(), PoolError> {
        self.with_connection(|conn| conn.set_auto_commit(enabled))?
            .map_err(PoolError::Connection)
    }

    /// Whether the physical connection reports itself closed.
    pub fn is_closed(&self) -> Result<bool, PoolError> {
        self.with_connection(|conn| conn.is_closed())?
            .map_err(PoolError::Connection)
    }

    /// The physical connection, bypassing validity checks and pool accounting.
    ///
    /// Intended for diagnostics and driver-specific calls. The pool may hand
    /// the same connection to another caller once this handle is retired.
    #[must_use]
    pub fn raw_connection(&self) -> Arc<RawConnection<C>> {
        Arc::clone(self.tracked.raw())
    }

    /// Return the connection to the pool.
    ///
    /// Never fails: cleanup errors are logged and swallowed by the pool.
    pub fn release(mut self) {
        self.return_to_pool();
    }

    /// Take the connection out of the pool.
    ///
    /// The pool forgets the connection; the caller becomes responsible for
    /// closing it. Fails with [`PoolError::Invalidated`] if the pool already
    /// retired this handle.
    pub fn detach(mut self) -> Result<Arc<RawConnection<C>>, PoolError> {
        self.returned = true;
        if self.pool.detach(&self.tracked) {
            Ok(Arc::clone(self.tracked.raw()))
        } else {
            Err(PoolError::Invalidated)
        }
    }

    fn return_to_pool(&mut self) {
        if !self.returned {
            self.returned = true;
            self.pool.push(Arc::clone(&self.tracked));
        }
    }
}

impl<C: Connection + 'static> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        self.return_to_pool();
    }
}

impl<C: Connection + 'static> PartialEq for PooledConnection<C> {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl<C: Connection + 'static> Eq for PooledConnection<C> {}

impl<C: Connection + 'static> fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("raw_id", &self.raw_id())
            .field("valid", &self.is_valid())
            .finish()
    }
}

//! Shared pool state and diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{PoolConfig, Target, TypeCode};
use crate::connection::Tracked;

/// Everything the pool lock protects.
pub(crate) struct PoolState<C> {
    pub(crate) config: PoolConfig,
    pub(crate) target: Target,
    /// Type code of `target`; handles carrying another code are stale.
    pub(crate) expected_type_code: TypeCode,
    /// Oldest-returned first.
    pub(crate) idle: VecDeque<Arc<Tracked<C>>>,
    /// Oldest checkout first.
    pub(crate) active: Vec<Arc<Tracked<C>>>,
    pub(crate) closed: bool,
    pub(crate) stats: PoolStats,
}

impl<C> PoolState<C> {
    pub(crate) fn new(config: PoolConfig, target: Target) -> Self {
        Self {
            expected_type_code: target.type_code(),
            config,
            target,
            idle: VecDeque::new(),
            active: Vec::new(),
            closed: false,
            stats: PoolStats::default(),
        }
    }

    /// Remove `conn` from the active list, by handle identity.
    pub(crate) fn remove_active(&mut self, conn: &Arc<Tracked<C>>) -> bool {
        match self.active.iter().position(|c| Arc::ptr_eq(c, conn)) {
            Some(pos) => {
                self.active.remove(pos);
                true
            }
            None => false,
        }
    }

    pub(crate) fn status(&self) -> PoolStatus {
        let stats = &self.stats;
        PoolStatus {
            active: self.active.len(),
            idle: self.idle.len(),
            max_active: self.config.max_active,
            max_idle: self.config.max_idle,
            request_count: stats.request_count,
            average_request_time: average(stats.accumulated_request_time, stats.request_count),
            average_checkout_time: average(stats.accumulated_checkout_time, stats.request_count),
            claimed_overdue_count: stats.claimed_overdue_count,
            average_overdue_checkout_time: average(
                stats.accumulated_overdue_checkout_time,
                stats.claimed_overdue_count,
            ),
            had_to_wait_count: stats.had_to_wait_count,
            average_wait_time: average(stats.accumulated_wait_time, stats.had_to_wait_count),
            bad_connection_count: stats.bad_connection_count,
        }
    }
}

/// Running counters, updated only under the pool lock.
#[derive(Debug, Default, Clone)]
pub(crate) struct PoolStats {
    pub(crate) request_count: u64,
    pub(crate) accumulated_request_time: Duration,
    pub(crate) accumulated_checkout_time: Duration,
    pub(crate) claimed_overdue_count: u64,
    pub(crate) accumulated_overdue_checkout_time: Duration,
    pub(crate) had_to_wait_count: u64,
    pub(crate) accumulated_wait_time: Duration,
    pub(crate) bad_connection_count: u64,
}

fn average(total: Duration, count: u64) -> Duration {
    if count == 0 {
        return Duration::ZERO;
    }
    let nanos = total.as_nanos() / u128::from(count);
    Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections currently checked out.
    pub active: usize,
    /// Connections waiting in the idle list.
    pub idle: usize,
    /// Maximum allowed active connections.
    pub max_active: usize,
    /// Maximum allowed idle connections.
    pub max_idle: usize,
    /// Successful acquires.
    pub request_count: u64,
    /// Mean time an acquire took to hand out a connection.
    pub average_request_time: Duration,
    /// Mean time a connection stayed checked out.
    pub average_checkout_time: Duration,
    /// Connections reclaimed from callers that held them too long.
    pub claimed_overdue_count: u64,
    /// Mean checkout time of reclaimed connections.
    pub average_overdue_checkout_time: Duration,
    /// Acquires that had to wait.
    pub had_to_wait_count: u64,
    /// Mean time spent waiting, over acquires that waited.
    pub average_wait_time: Duration,
    /// Connections discarded as bad.
    pub bad_connection_count: u64,
}

impl fmt::Display for PoolStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "===CONFIGURATION==============================================")?;
        writeln!(f, " max_active                     {}", self.max_active)?;
        writeln!(f, " max_idle                       {}", self.max_idle)?;
        writeln!(f, " ---STATUS-----------------------------------------------------")?;
        writeln!(f, " active connections             {}", self.active)?;
        writeln!(f, " idle connections               {}", self.idle)?;
        writeln!(f, " request count                  {}", self.request_count)?;
        writeln!(f, " average request time           {:?}", self.average_request_time)?;
        writeln!(f, " average checkout time          {:?}", self.average_checkout_time)?;
        writeln!(f, " claimed overdue                {}", self.claimed_overdue_count)?;
        writeln!(
            f,
            " average overdue checkout time  {:?}",
            self.average_overdue_checkout_time
        )?;
        writeln!(f, " had to wait                    {}", self.had_to_wait_count)?;
        writeln!(f, " average wait time              {:?}", self.average_wait_time)?;
        writeln!(f, " bad connection count           {}", self.bad_connection_count)?;
        write!(f, "===============================================================")
    }
}

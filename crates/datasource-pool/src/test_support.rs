//! In-crate stand-ins for raw connections, used by unit tests.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::config::Target;
use crate::error::ConnectionError;
use crate::lifecycle::{Connection, ConnectionFactory, IsolationLevel};

#[derive(Debug)]
pub(crate) struct StubConnection {
    pub(crate) closed: bool,
    pub(crate) auto_commit: bool,
    pub(crate) fail_execute: bool,
    pub(crate) executed: Vec<String>,
    pub(crate) rollbacks: usize,
    pub(crate) isolation: Option<IsolationLevel>,
    pub(crate) network_timeout: Option<Duration>,
    pub(crate) username: Option<String>,
    pub(crate) broken_status: bool,
}

impl Default for StubConnection {
    fn default() -> Self {
        Self {
            closed: false,
            auto_commit: true,
            fail_execute: false,
            executed: Vec::new(),
            rollbacks: 0,
            isolation: None,
            network_timeout: None,
            username: None,
            broken_status: false,
        }
    }
}

impl Connection for StubConnection {
    fn close(&mut self) -> Result<(), ConnectionError> {
        self.closed = true;
        Ok(())
    }

    fn is_closed(&self) -> Result<bool, ConnectionError> {
        if self.broken_status {
            return Err(ConnectionError::Driver("status unavailable".into()));
        }
        Ok(self.closed)
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        self.auto_commit = enabled;
        Ok(())
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.isolation = Some(level);
        Ok(())
    }

    fn set_network_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.network_timeout = Some(timeout);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.rollbacks += 1;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if self.fail_execute {
            return Err(ConnectionError::Driver(format!("cannot run {statement}")));
        }
        self.executed.push(statement.to_string());
        Ok(())
    }
}

/// Factory handing out [`StubConnection`]s.
#[derive(Debug, Clone, Default)]
pub(crate) struct StubFactory {
    pub(crate) created: Arc<AtomicUsize>,
    pub(crate) refuse: Arc<AtomicBool>,
    pub(crate) born_closed: Arc<AtomicBool>,
}

impl StubFactory {
    pub(crate) fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl ConnectionFactory for StubFactory {
    type Connection = StubConnection;

    fn connect(&self, target: &Target) -> Result<StubConnection, ConnectionError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Driver("connection refused".into()));
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(StubConnection {
            closed: self.born_closed.load(Ordering::SeqCst),
            username: target.username.clone(),
            ..StubConnection::default()
        })
    }
}

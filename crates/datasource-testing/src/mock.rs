//! In-memory connection factory with failure injection.
//!
//! Connections do no I/O. They record what the pool does to them and fail
//! on demand, which is enough to drive every branch of the pool.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use datasource_pool::{Connection, ConnectionError, ConnectionFactory, IsolationLevel, Target};
use parking_lot::Mutex;

/// State shared by a factory, its clones and every connection it opened.
#[derive(Debug, Default)]
struct Shared {
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    refuse: AtomicBool,
    born_closed: AtomicBool,
    connect_delay: Mutex<Duration>,
    failing: Mutex<HashSet<String>>,
    links: Mutex<Vec<Arc<AtomicBool>>>,
}

impl Shared {
    fn fails(&self, statement: &str) -> bool {
        self.failing.lock().contains(statement.trim())
    }
}

/// Builder for [`MockFactory`].
#[derive(Debug, Default)]
pub struct MockFactoryBuilder {
    failing: HashSet<String>,
    refuse: bool,
    born_closed: bool,
    connect_delay: Duration,
}

impl MockFactoryBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every connection fail when asked to run `statement`.
    #[must_use]
    pub fn with_failing_statement(mut self, statement: impl Into<String>) -> Self {
        self.failing.insert(statement.into().trim().to_string());
        self
    }

    /// Refuse every connect attempt.
    #[must_use]
    pub fn refuse_connections(mut self, refuse: bool) -> Self {
        self.refuse = refuse;
        self
    }

    /// Hand out connections that already report themselves closed.
    #[must_use]
    pub fn born_closed(mut self, born_closed: bool) -> Self {
        self.born_closed = born_closed;
        self
    }

    /// Sleep this long inside every connect.
    #[must_use]
    pub fn with_connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    /// Build the factory.
    #[must_use]
    pub fn build(self) -> MockFactory {
        let shared = Shared {
            refuse: AtomicBool::new(self.refuse),
            born_closed: AtomicBool::new(self.born_closed),
            connect_delay: Mutex::new(self.connect_delay),
            failing: Mutex::new(self.failing),
            ..Shared::default()
        };
        MockFactory {
            shared: Arc::new(shared),
        }
    }
}

/// Connection factory producing [`MockConnection`]s.
///
/// Clones share counters and failure switches, so a test can keep a clone
/// after handing the factory to a pool.
#[derive(Debug, Clone)]
pub struct MockFactory {
    shared: Arc<Shared>,
}

impl MockFactory {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> MockFactoryBuilder {
        MockFactoryBuilder::new()
    }

    /// Create a factory whose connections always work.
    #[must_use]
    pub fn new() -> Self {
        MockFactoryBuilder::new().build()
    }

    /// Connections opened so far.
    #[must_use]
    pub fn opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Connections physically closed so far.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Connections opened and not yet closed.
    #[must_use]
    pub fn open_now(&self) -> usize {
        self.opened().saturating_sub(self.closed())
    }

    /// Start or stop refusing connect attempts.
    pub fn set_refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Start or stop handing out connections that are already closed.
    pub fn set_born_closed(&self, born_closed: bool) {
        self.shared.born_closed.store(born_closed, Ordering::SeqCst);
    }

    /// Make `statement` fail on every connection, including existing ones.
    pub fn fail_statement(&self, statement: impl Into<String>) {
        self.shared
            .failing
            .lock()
            .insert(statement.into().trim().to_string());
    }

    /// Cut the link of every connection opened so far.
    ///
    /// Severed connections still claim to be open but fail every statement,
    /// like a connection whose server went away.
    pub fn sever_all(&self) {
        for link in self.shared.links.lock().iter() {
            link.store(true, Ordering::SeqCst);
        }
    }
}

impl Default for MockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionFactory for MockFactory {
    type Connection = MockConnection;

    fn connect(&self, target: &Target) -> Result<MockConnection, ConnectionError> {
        let delay = *self.shared.connect_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.shared.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Driver(format!(
                "connection to {} refused",
                target.url
            )));
        }

        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let severed = Arc::new(AtomicBool::new(false));
        self.shared.links.lock().push(Arc::clone(&severed));
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(id, url = %target.url, "mock connection opened");

        Ok(MockConnection {
            id,
            username: target.username.clone(),
            driver_properties: target.driver_properties.clone(),
            closed: self.shared.born_closed.load(Ordering::SeqCst),
            auto_commit: true,
            isolation: None,
            network_timeout: None,
            executed: Vec::new(),
            pending: 0,
            commits: 0,
            rollbacks: 0,
            severed,
            shared: Arc::clone(&self.shared),
        })
    }
}

/// A scripted in-memory connection.
#[derive(Debug)]
pub struct MockConnection {
    id: u64,
    username: Option<String>,
    driver_properties: BTreeMap<String, String>,
    closed: bool,
    auto_commit: bool,
    isolation: Option<IsolationLevel>,
    network_timeout: Option<Duration>,
    executed: Vec<String>,
    pending: usize,
    commits: usize,
    rollbacks: usize,
    severed: Arc<AtomicBool>,
    shared: Arc<Shared>,
}

impl MockConnection {
    /// Factory-assigned identity, starting at 1.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Username the connection was opened with.
    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// A driver property the connection was opened with.
    #[must_use]
    pub fn driver_property(&self, key: &str) -> Option<&str> {
        self.driver_properties.get(key).map(String::as_str)
    }

    /// Isolation level last applied.
    #[must_use]
    pub fn isolation_level(&self) -> Option<IsolationLevel> {
        self.isolation
    }

    /// Network timeout last applied.
    #[must_use]
    pub fn network_timeout(&self) -> Option<Duration> {
        self.network_timeout
    }

    /// Statements executed successfully, in order.
    #[must_use]
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    /// Statements run since the last commit or rollback outside auto-commit.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending
    }

    /// Number of commits.
    #[must_use]
    pub fn commit_count(&self) -> usize {
        self.commits
    }

    /// Number of rollbacks.
    #[must_use]
    pub fn rollback_count(&self) -> usize {
        self.rollbacks
    }

    /// Cut this connection's link.
    pub fn sever(&self) {
        self.severed.store(true, Ordering::SeqCst);
    }

    fn check_link(&self) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::Closed);
        }
        if self.severed.load(Ordering::SeqCst) {
            return Err(ConnectionError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
        }
        Ok(())
    }
}

impl Connection for MockConnection {
    fn close(&mut self) -> Result<(), ConnectionError> {
        if !self.closed {
            self.closed = true;
            self.shared.closed.fetch_add(1, Ordering::SeqCst);
            tracing::trace!(id = self.id, "mock connection closed");
        }
        Ok(())
    }

    fn is_closed(&self) -> Result<bool, ConnectionError> {
        Ok(self.closed)
    }

    fn auto_commit(&self) -> Result<bool, ConnectionError> {
        Ok(self.auto_commit)
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<(), ConnectionError> {
        self.check_link()?;
        if enabled && !self.auto_commit && self.pending > 0 {
            self.commits += 1;
            self.pending = 0;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn set_isolation_level(&mut self, level: IsolationLevel) -> Result<(), ConnectionError> {
        self.check_link()?;
        self.isolation = Some(level);
        Ok(())
    }

    fn set_network_timeout(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        self.check_link()?;
        self.network_timeout = Some(timeout);
        Ok(())
    }

    fn commit(&mut self) -> Result<(), ConnectionError> {
        self.check_link()?;
        self.commits += 1;
        self.pending = 0;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), ConnectionError> {
        self.check_link()?;
        self.rollbacks += 1;
        self.pending = 0;
        Ok(())
    }

    fn execute(&mut self, statement: &str) -> Result<(), ConnectionError> {
        self.check_link()?;
        if self.shared.fails(statement) {
            return Err(ConnectionError::Driver(format!("statement failed: {statement}")));
        }
        self.executed.push(statement.to_string());
        if !self.auto_commit {
            self.pending += 1;
        }
        Ok(())
    }
}

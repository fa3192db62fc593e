//! Pool configuration.

use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use crate::error::PoolError;
use crate::lifecycle::IsolationLevel;

/// Default ping query. Ping is disabled by default, so this is a placeholder.
pub const DEFAULT_PING_QUERY: &str = "NO PING QUERY SET";

/// Configuration for the connection pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of checked-out connections.
    pub max_active: usize,

    /// Maximum number of idle connections kept for reuse.
    pub max_idle: usize,

    /// How long a connection may stay checked out before another caller
    /// may reclaim it.
    pub checkout_timeout: Duration,

    /// How long an acquire waits for a connection to be returned.
    pub wait_timeout: Duration,

    /// Extra bad connections tolerated by a single acquire, on top of
    /// `max_idle`, before it gives up.
    pub bad_connection_tolerance: usize,

    /// Whether to run the ping query before handing out a stale connection.
    pub ping_enabled: bool,

    /// Statement executed to probe a connection.
    ///
    /// Should be trivial, e.g. `SELECT 1`.
    pub ping_query: Arc<str>,

    /// Connections unused for longer than this are pinged before hand-out.
    pub ping_threshold: Duration,

    /// Keep waiting after `wait_timeout` expires instead of failing.
    ///
    /// When set, an acquire only ends on success, bad-connection exhaustion,
    /// interruption or pool shutdown.
    pub indefinite_wait: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_active: 10,
            max_idle: 5,
            checkout_timeout: Duration::from_secs(20),
            wait_timeout: Duration::from_secs(20),
            bad_connection_tolerance: 3,
            ping_enabled: false,
            ping_query: Arc::from(DEFAULT_PING_QUERY),
            ping_threshold: Duration::ZERO,
            indefinite_wait: false,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of active connections.
    #[must_use]
    pub fn max_active(mut self, count: usize) -> Self {
        self.max_active = count;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle(mut self, count: usize) -> Self {
        self.max_idle = count;
        self
    }

    /// Set the checkout time after which a connection may be reclaimed.
    #[must_use]
    pub fn checkout_timeout(mut self, timeout: Duration) -> Self {
        self.checkout_timeout = timeout;
        self
    }

    /// Set the wait timeout.
    #[must_use]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    /// Set the per-acquire bad connection tolerance.
    #[must_use]
    pub fn bad_connection_tolerance(mut self, tolerance: usize) -> Self {
        self.bad_connection_tolerance = tolerance;
        self
    }

    /// Enable or disable the ping query.
    #[must_use]
    pub fn ping_enabled(mut self, enabled: bool) -> Self {
        self.ping_enabled = enabled;
        self
    }

    /// Set the ping query.
    ///
    /// ```rust
    /// use datasource_pool::PoolConfig;
    ///
    /// let config = PoolConfig::new()
    ///     .ping_enabled(true)
    ///     .ping_query("SELECT 1");
    /// assert_eq!(&*config.ping_query, "SELECT 1");
    /// ```
    #[must_use]
    pub fn ping_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.ping_query = query.into();
        self
    }

    /// Set how long a connection may sit unused before it gets pinged.
    #[must_use]
    pub fn ping_threshold(mut self, threshold: Duration) -> Self {
        self.ping_threshold = threshold;
        self
    }

    /// Keep re-waiting after the wait timeout instead of failing.
    #[must_use]
    pub fn indefinite_wait(mut self, enabled: bool) -> Self {
        self.indefinite_wait = enabled;
        self
    }

    /// Number of bad candidates a single acquire may discard before failing.
    #[must_use]
    pub fn bad_connection_limit(&self) -> usize {
        self.max_idle.saturating_add(self.bad_connection_tolerance)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.max_active == 0 {
            return Err(PoolError::Configuration(
                "max_active must be greater than 0".into(),
            ));
        }
        if self.ping_enabled && self.ping_query.trim().is_empty() {
            return Err(PoolError::Configuration(
                "ping_query cannot be empty when ping is enabled".into(),
            ));
        }
        Ok(())
    }
}

/// Fingerprint of the target and credentials a connection was checked out for.
///
/// A connection whose type code no longer matches the pool's target is
/// closed on release instead of being pooled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeCode(u64);

impl TypeCode {
    /// Compute the type code for a url and credentials.
    #[must_use]
    pub fn of(url: &str, username: Option<&str>, password: Option<&str>) -> Self {
        let mut hasher = DefaultHasher::new();
        url.hash(&mut hasher);
        username.hash(&mut hasher);
        password.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Raw fingerprint value.
    #[must_use]
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// What the pool connects to: url, credentials and per-connection defaults.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Connection url understood by the factory.
    pub url: String,

    /// Login name.
    pub username: Option<String>,

    /// Login password.
    pub password: Option<String>,

    /// Driver-specific properties passed through to the factory.
    pub driver_properties: BTreeMap<String, String>,

    /// Auto-commit mode applied to every new connection.
    pub default_auto_commit: Option<bool>,

    /// Isolation level applied to every new connection.
    pub default_isolation_level: Option<IsolationLevel>,

    /// Network timeout applied to every new connection.
    pub default_network_timeout: Option<Duration>,
}

impl Target {
    /// Create a target for the given url.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Set the login name.
    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set the login password.
    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Add a driver property.
    #[must_use]
    pub fn driver_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.driver_properties.insert(key.into(), value.into());
        self
    }

    /// Set the auto-commit mode for new connections.
    #[must_use]
    pub fn default_auto_commit(mut self, enabled: bool) -> Self {
        self.default_auto_commit = Some(enabled);
        self
    }

    /// Set the isolation level for new connections.
    #[must_use]
    pub fn default_isolation_level(mut self, level: IsolationLevel) -> Self {
        self.default_isolation_level = Some(level);
        self
    }

    /// Set the network timeout for new connections.
    #[must_use]
    pub fn default_network_timeout(mut self, timeout: Duration) -> Self {
        self.default_network_timeout = Some(timeout);
        self
    }

    /// Same target, different credentials.
    #[must_use]
    pub fn with_credentials(&self, username: Option<&str>, password: Option<&str>) -> Self {
        Self {
            username: username.map(str::to_string),
            password: password.map(str::to_string),
            ..self.clone()
        }
    }

    /// Type code of this url and credentials.
    #[must_use]
    pub fn type_code(&self) -> TypeCode {
        TypeCode::of(
            &self.url,
            self.username.as_deref(),
            self.password.as_deref(),
        )
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("driver_properties", &self.driver_properties)
            .field("default_auto_commit", &self.default_auto_commit)
            .field("default_isolation_level", &self.default_isolation_level)
            .field("default_network_timeout", &self.default_network_timeout)
            .finish()
    }
}

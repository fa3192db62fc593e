//! Test fixture utilities.

use datasource_pool::{Pool, PoolConfig, PoolError, Target};
use tracing::Level;

use crate::mock::MockFactory;

/// Url used by [`mock_pool`].
pub const MOCK_URL: &str = "mock://localhost/test";

/// Install a debug-level subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// The target [`mock_pool`] connects to.
#[must_use]
pub fn mock_target() -> Target {
    Target::new(MOCK_URL).username("app").password("secret")
}

/// Build a pool over a fresh [`MockFactory`], returning a clone of the factory
/// for inspection.
pub fn mock_pool(config: PoolConfig) -> Result<(Pool<MockFactory>, MockFactory), PoolError> {
    mock_pool_with(MockFactory::new(), config)
}

/// Build a pool over `factory`, returning a clone of the factory for inspection.
pub fn mock_pool_with(
    factory: MockFactory,
    config: PoolConfig,
) -> Result<(Pool<MockFactory>, MockFactory), PoolError> {
    init_tracing();
    let pool = Pool::new(factory.clone(), mock_target(), config)?;
    Ok((pool, factory))
}

//! Building a pool from a `key=value;` property string.

use std::str::FromStr;
use std::time::Duration;

use crate::config::{PoolConfig, Target};
use crate::error::PoolError;
use crate::lifecycle::{ConnectionFactory, IsolationLevel};
use crate::pool::Pool;

/// Prefix marking a property that is passed through to the driver.
const DRIVER_PREFIX: &str = "driver.";

/// Pool settings read from a property string, ready to build a [`Pool`].
///
/// ```rust,ignore
/// let pool = DataSourceFactory::from_properties(
///     "url=postgres://db/app;username=app;password=secret;max_active=20;driver.sslmode=require",
/// )?
/// .build(MyFactory)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct DataSourceFactory {
    target: Target,
    config: PoolConfig,
}

impl DataSourceFactory {
    /// Start from an explicit target and configuration.
    #[must_use]
    pub fn new(target: Target, config: PoolConfig) -> Self {
        Self { target, config }
    }

    /// Parse a `key=value;` property string.
    ///
    /// Keys are case-insensitive. Keys starting with `driver.` become driver
    /// properties with the prefix stripped. Unknown keys are ignored.
    ///
    /// A value wrapped in single or double quotes may contain `;`, e.g.
    /// `ping_query="SELECT 1; SELECT 2"`. The quotes are stripped.
    pub fn from_properties(properties: &str) -> Result<Self, PoolError> {
        let mut target = Target::default();
        let mut config = PoolConfig::default();

        for part in split_properties(properties)? {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| PoolError::Configuration(format!("invalid key-value: {part}")))?;

            let key = key.trim().to_lowercase();
            let value = unquote(value.trim());

            if let Some(name) = key.strip_prefix(DRIVER_PREFIX) {
                target.driver_properties.insert(name.to_string(), value.to_string());
                continue;
            }

            match key.as_str() {
                "url" => target.url = value.to_string(),
                "username" | "user" => target.username = Some(value.to_string()),
                "password" => target.password = Some(value.to_string()),
                "auto_commit" | "autocommit" => {
                    target.default_auto_commit = Some(parse_bool(&key, value)?);
                }
                "network_timeout_ms" => {
                    target.default_network_timeout = Some(parse_millis(&key, value)?);
                }
                "isolation" | "default_isolation_level" => {
                    let level = IsolationLevel::parse(value).ok_or_else(|| {
                        PoolError::Configuration(format!("invalid isolation level: {value}"))
                    })?;
                    target.default_isolation_level = Some(level);
                }
                "max_active" => config.max_active = parse_number(&key, value)?,
                "max_idle" => config.max_idle = parse_number(&key, value)?,
                "checkout_timeout_ms" => config.checkout_timeout = parse_millis(&key, value)?,
                "wait_timeout_ms" => config.wait_timeout = parse_millis(&key, value)?,
                "bad_connection_tolerance" => {
                    config.bad_connection_tolerance = parse_number(&key, value)?;
                }
                "ping_enabled" => config.ping_enabled = parse_bool(&key, value)?,
                "ping_query" => config.ping_query = value.into(),
                "ping_threshold_ms" => config.ping_threshold = parse_millis(&key, value)?,
                "indefinite_wait" => config.indefinite_wait = parse_bool(&key, value)?,
                _ => {
                    tracing::debug!(key = %key, "ignoring unknown data source property");
                }
            }
        }

        if target.url.is_empty() {
            return Err(PoolError::Configuration("url is required".into()));
        }
        config.validate()?;

        Ok(Self { target, config })
    }

    /// The parsed target.
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    /// The parsed pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Build a pool that opens connections with `factory`.
    pub fn build<F: ConnectionFactory>(self, factory: F) -> Result<Pool<F>, PoolError> {
        Pool::new(factory, self.target, self.config)
    }
}

/// Split on `;` outside quoted values.
///
/// A quote only opens right after `=`, so quotes inside a bare value are
/// ordinary characters.
fn split_properties(properties: &str) -> Result<Vec<&str>, PoolError> {
    let mut parts = Vec::new();
    let mut quote: Option<char> = None;
    let mut start = 0;

    for (i, c) in properties.char_indices() {
        match (quote, c) {
            (None, '"' | '\'') if properties[start..i].trim_end().ends_with('=') => {
                quote = Some(c);
            }
            (Some(open), _) if c == open => quote = None,
            (None, ';') => {
                parts.push(&properties[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if quote.is_some() {
        return Err(PoolError::Configuration(format!(
            "unterminated quote in: {}",
            &properties[start..]
        )));
    }
    parts.push(&properties[start..]);
    Ok(parts)
}

fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

fn parse_bool(key: &str, value: &str) -> Result<bool, PoolError> {
    match value.to_lowercase().as_str() {
        "true" | "yes" | "1" => Ok(true),
        "false" | "no" | "0" => Ok(false),
        _ => Err(PoolError::Configuration(format!("invalid {key}: {value}"))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, PoolError> {
    value
        .parse()
        .map_err(|_| PoolError::Configuration(format!("invalid {key}: {value}")))
}

fn parse_millis(key: &str, value: &str) -> Result<Duration, PoolError> {
    parse_number(key, value).map(Duration::from_millis)
}

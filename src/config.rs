//! Pool configuration.
//!
//! Every sizing knob is supplied by the caller, either through
//! [`PoolConfig::new`] and its builder methods, through serde, or as query
//! parameters on the connection URL.

use crate::error::{DbError, DbResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use url::Url;

/// Connection pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connection URL handed to the driver (sensitive - not logged).
    #[serde(skip_serializing)]
    pub url: String,
    /// Maximum connections open at once, idle or leased.
    pub max_open: u32,
    /// Maximum connections kept idle after release.
    pub max_idle: u32,
    /// How long `acquire` waits for capacity. Zero never waits.
    #[serde(with = "duration_ms", rename = "acquire_timeout_ms")]
    pub acquire_timeout: Duration,
    /// Ping idle connections before handing them out.
    #[serde(default)]
    pub test_before_acquire: bool,
}

impl PoolConfig {
    /// Pool option keys that we extract from URL query parameters.
    const POOL_OPTION_KEYS: &'static [&'static str] = &[
        "max_open",
        "max_idle",
        "acquire_timeout_ms",
        "test_before_acquire",
    ];

    /// Create a pool configuration.
    pub fn new(
        url: impl Into<String>,
        max_open: u32,
        max_idle: u32,
        acquire_timeout: Duration,
    ) -> Self {
        Self {
            url: url.into(),
            max_open,
            max_idle,
            acquire_timeout,
            test_before_acquire: false,
        }
    }

    /// Set the maximum number of open connections.
    pub fn max_open(mut self, max: u32) -> Self {
        self.max_open = max;
        self
    }

    /// Set the maximum number of idle connections.
    pub fn max_idle(mut self, max: u32) -> Self {
        self.max_idle = max;
        self
    }

    /// Set the acquire timeout.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Ping idle connections before handing them out.
    pub fn test_before_acquire(mut self, enabled: bool) -> Self {
        self.test_before_acquire = enabled;
        self
    }

    /// Parse a configuration from a connection URL carrying pool options.
    ///
    /// # Format
    ///
    /// ```text
    /// sqlite:/tmp/app.db?mode=rwc&max_open=4&max_idle=2&acquire_timeout_ms=500
    /// postgres://u:p@host/db?max_open=20&max_idle=10&acquire_timeout_ms=30000&test_before_acquire=true
    /// ```
    ///
    /// `max_open`, `max_idle` and `acquire_timeout_ms` are required. Pool
    /// options are removed from the URL; all other parameters are kept for
    /// the driver.
    pub fn from_url(s: &str) -> DbResult<Self> {
        let mut url =
            Url::parse(s).map_err(|e| DbError::invalid_config(format!("Invalid URL: {e}")))?;
        let mut opts = Self::extract_options(&mut url, Self::POOL_OPTION_KEYS);

        let max_open = Self::required(&mut opts, "max_open")?;
        let max_idle = Self::required(&mut opts, "max_idle")?;
        let acquire_timeout_ms: u64 = Self::required(&mut opts, "acquire_timeout_ms")?;
        let test_before_acquire = match opts.remove("test_before_acquire") {
            None => false,
            Some(v) if v.eq_ignore_ascii_case("true") => true,
            Some(v) if v.eq_ignore_ascii_case("false") => false,
            Some(v) => {
                return Err(DbError::invalid_config(format!(
                    "test_before_acquire must be true or false, got '{v}'"
                )));
            }
        };

        let config = Self {
            url: url.to_string(),
            max_open,
            max_idle,
            acquire_timeout: Duration::from_millis(acquire_timeout_ms),
            test_before_acquire,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate sizing options.
    pub fn validate(&self) -> DbResult<()> {
        if self.max_open == 0 {
            return Err(DbError::invalid_config(
                "max_open must be greater than 0",
            ));
        }
        if self.max_idle > self.max_open {
            return Err(DbError::invalid_config(format!(
                "max_idle ({}) cannot exceed max_open ({})",
                self.max_idle, self.max_open
            )));
        }
        Ok(())
    }

    /// Get a display-safe version of the URL (credentials masked).
    pub fn masked_url(&self) -> String {
        let Some(at_pos) = self.url.find('@') else {
            return self.url.clone();
        };
        let start = self.url.find("://").map(|p| p + 3).unwrap_or(0);
        if start > at_pos {
            return self.url.clone();
        }
        match self.url[start..at_pos].rfind(':') {
            Some(rel) => {
                let colon_pos = start + rel;
                format!("{}****{}", &self.url[..=colon_pos], &self.url[at_pos..])
            }
            None => self.url.clone(),
        }
    }

    fn required<T: std::str::FromStr>(opts: &mut HashMap<String, String>, key: &str) -> DbResult<T> {
        let raw = opts
            .remove(key)
            .ok_or_else(|| DbError::invalid_config(format!("missing pool option '{key}'")))?;
        raw.parse()
            .map_err(|_| DbError::invalid_config(format!("invalid value '{raw}' for '{key}'")))
    }

    /// Extract pool options from URL query params, keeping others for the driver.
    fn extract_options(url: &mut Url, keys: &[&str]) -> HashMap<String, String> {
        let mut opts = HashMap::new();
        let remaining: Vec<(String, String)> = url
            .query_pairs()
            .filter_map(|(k, v)| {
                let key_lower = k.to_ascii_lowercase();
                if keys.contains(&key_lower.as_str()) {
                    opts.insert(key_lower, v.into_owned());
                    None
                } else {
                    Some((k.into_owned(), v.into_owned()))
                }
            })
            .collect();

        if remaining.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(remaining);
        }
        opts
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

//! Pool configuration: raw TOML arguments and the resolved settings object.
//!
//! [`PoolArguments`] mirrors the `[pool]` table of a config file; every field
//! is optional. [`PoolSettings::resolve`] layers those overrides onto the
//! defaults and validates them.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::params::ConnectionParams;

pub const DEFAULT_POOL_SIZE: usize = 5;
pub const DEFAULT_MAX_OVERFLOW: i64 = 10;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// One second below MySQL's default `wait_timeout`, so a pooled connection is
/// always retired before the server drops it.
pub const DEFAULT_RECYCLE: Duration = Duration::from_secs(119);

/// Sentinel for unlimited overflow.
pub const UNLIMITED_OVERFLOW: i64 = -1;

/// Pool implementation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolClass {
    /// Bounded queue with overflow (default).
    #[default]
    Queue,
    /// No reuse: every checkout opens, every checkin closes.
    Null,
}

impl fmt::Display for PoolClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolClass::Queue => write!(f, "queue"),
            PoolClass::Null => write!(f, "null"),
        }
    }
}

impl std::str::FromStr for PoolClass {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "queue" | "queuepool" => Ok(PoolClass::Queue),
            "null" | "nullpool" => Ok(PoolClass::Null),
            other => Err(ConfigError::UnknownPoolClass(other.to_string())),
        }
    }
}

/// User-supplied pool tuning, as read from the `[pool]` table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolArguments {
    pub class: Option<String>,
    pub size: Option<usize>,
    pub max_overflow: Option<i64>,
    pub timeout: Option<String>,
    pub recycle: Option<String>,
    pub echo: Option<bool>,
    pub pre_ping: Option<bool>,
}

/// Resolved configuration handed to every pool a registry creates.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolSettings {
    pub class: PoolClass,
    /// Connections kept idle once created.
    pub size: usize,
    /// Connections allowed beyond `size`; [`UNLIMITED_OVERFLOW`] for no bound.
    pub max_overflow: i64,
    /// Longest a checkout waits once overflow is exhausted.
    pub timeout: Duration,
    /// Maximum connection age; `None` disables recycling.
    pub recycle: Option<Duration>,
    /// Log every checkout/checkin at info level.
    pub echo: bool,
    /// Ping idle connections before handing them out.
    pub pre_ping: bool,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            class: PoolClass::Queue,
            size: DEFAULT_POOL_SIZE,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            timeout: DEFAULT_TIMEOUT,
            recycle: Some(DEFAULT_RECYCLE),
            echo: false,
            pre_ping: false,
        }
    }
}

impl PoolSettings {
    /// Layer `args` onto the defaults.
    pub fn resolve(args: &PoolArguments) -> ConfigResult<Self> {
        Self::default().merge(args)
    }

    /// Layer `args` onto `self`; absent fields keep their current value.
    pub fn merge(self, args: &PoolArguments) -> ConfigResult<Self> {
        let class = match &args.class {
            Some(name) => name.parse()?,
            None => self.class,
        };
        let max_overflow = args.max_overflow.unwrap_or(self.max_overflow);
        if max_overflow < UNLIMITED_OVERFLOW {
            return Err(ConfigError::InvalidOverflow(max_overflow));
        }
        let timeout = match &args.timeout {
            Some(raw) => parse_duration(raw).ok_or_else(|| ConfigError::InvalidDuration {
                field: "timeout",
                value: raw.clone(),
            })?,
            None => self.timeout,
        };
        let recycle = match &args.recycle {
            Some(raw) => parse_recycle(raw)?,
            None => self.recycle,
        };

        Ok(Self {
            class,
            size: args.size.unwrap_or(self.size),
            max_overflow,
            timeout,
            recycle,
            echo: args.echo.unwrap_or(self.echo),
            pre_ping: args.pre_ping.unwrap_or(self.pre_ping),
        })
    }

    /// Upper bound on overflow, or `None` when unlimited.
    pub fn overflow_limit(&self) -> Option<i64> {
        (self.max_overflow > UNLIMITED_OVERFLOW).then_some(self.max_overflow)
    }

    /// Settings the pool actually runs with: the null class is a queue that
    /// keeps nothing idle and never caps overflow.
    pub fn effective(&self) -> Self {
        match self.class {
            PoolClass::Queue => self.clone(),
            PoolClass::Null => Self {
                size: 0,
                max_overflow: UNLIMITED_OVERFLOW,
                ..self.clone()
            },
        }
    }

    /// Builder method: set base size and max overflow.
    pub fn with_capacity(self, size: usize, max_overflow: i64) -> Self {
        Self {
            size,
            max_overflow,
            ..self
        }
    }

    /// Builder method: set the checkout timeout.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Builder method: set (or disable) the recycle age.
    pub fn with_recycle(self, recycle: Option<Duration>) -> Self {
        Self { recycle, ..self }
    }

    /// Builder method: enable or disable pre-ping.
    pub fn with_pre_ping(self, pre_ping: bool) -> Self {
        Self { pre_ping, ..self }
    }

    /// Builder method: set the pool class.
    pub fn with_class(self, class: PoolClass) -> Self {
        Self { class, ..self }
    }
}

/// A config file: pool tuning plus the connection to pool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfigFile {
    pub pool: Option<PoolArguments>,
    pub connection: Option<ConnectionParams>,
}

impl PoolConfigFile {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Resolved settings for the `[pool]` table (defaults when absent).
    pub fn settings(&self) -> ConfigResult<PoolSettings> {
        PoolSettings::resolve(&self.pool.clone().unwrap_or_default())
    }

    pub fn connection_params(&self) -> ConnectionParams {
        self.connection.clone().unwrap_or_default()
    }
}

/// Parse a duration string like "5s", "500ms", "2m", or bare seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.trim().parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.trim().parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

fn parse_recycle(raw: &str) -> ConfigResult<Option<Duration>> {
    match raw.trim() {
        "never" | "off" | "-1" => Ok(None),
        other => parse_duration(other)
            .map(Some)
            .ok_or_else(|| ConfigError::InvalidDuration {
                field: "recycle",
                value: raw.to_string(),
            }),
    }
}

//! # Unit Configuration
//!
//! Timeouts governing the handshake and business calls. Defaults can be
//! overridden in code with the builder setters, or from the environment.

use std::time::Duration;

/// Default bound on the `ping` probe.
pub const PING_TIMEOUT_MS: u64 = 5_000;
/// Default bound on the one-time `init` call.
pub const INIT_TIMEOUT_MS: u64 = 30_000;
/// Default watchdog on business calls.
pub const CALL_TIMEOUT_MS: u64 = 120_000;

pub const PING_TIMEOUT_VAR: &str = "UNIT_PING_TIMEOUT_MS";
pub const INIT_TIMEOUT_VAR: &str = "UNIT_INIT_TIMEOUT_MS";
/// `0` disables the business call watchdog.
pub const CALL_TIMEOUT_VAR: &str = "UNIT_CALL_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    InvalidValue { var: &'static str, value: String },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { var, value } => {
                write!(f, "Invalid value for {}: '{}' (expected milliseconds)", var, value)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitConfig {
    pub ping_timeout: Duration,
    pub init_timeout: Duration,
    /// `None` lets a business call wait forever.
    pub call_timeout: Option<Duration>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(PING_TIMEOUT_MS),
            init_timeout: Duration::from_millis(INIT_TIMEOUT_MS),
            call_timeout: Some(Duration::from_millis(CALL_TIMEOUT_MS)),
        }
    }
}

impl UnitConfig {
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    pub fn init_timeout(mut self, timeout: Duration) -> Self {
        self.init_timeout = timeout;
        self
    }

    pub fn call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Defaults, overridden by any of the `UNIT_*_MS` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Like [`UnitConfig::from_env`], reading variables through `lookup`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(ms) = read_millis(&lookup, PING_TIMEOUT_VAR)? {
            config.ping_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_millis(&lookup, INIT_TIMEOUT_VAR)? {
            config.init_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = read_millis(&lookup, CALL_TIMEOUT_VAR)? {
            config.call_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }

        Ok(config)
    }
}

fn read_millis(lookup: &impl Fn(&str) -> Option<String>, var: &'static str) -> Result<Option<u64>> {
    let Some(raw) = lookup(var) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::InvalidValue { var, value: raw })
}

//! Configuration for the connection manager

use crate::error::LinkError;
use linkwatch_shared::defaults;
use std::str::FromStr;
use std::time::Duration;

/// Heartbeat cadence and retry budget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogConfig {
    /// Silence tolerated before the first challenge
    pub timeout: Duration,
    /// Wait between unanswered challenges
    pub retry_timeout: Duration,
    /// Unanswered challenges before declaring a timeout (>= 1)
    pub max_tries: u32,
    /// Start the watchdog automatically once a connection is found
    pub enabled: bool,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(defaults::WATCHDOG_TIMEOUT_MS),
            retry_timeout: Duration::from_millis(defaults::WATCHDOG_RETRY_TIMEOUT_MS),
            max_tries: defaults::MAX_WATCHDOG_TRIES,
            enabled: defaults::WATCHDOG_ENABLED,
        }
    }
}

/// Configuration for the connection manager
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Scheduler polling interval, read once when the scheduler starts
    pub tick_interval: Duration,
    /// Watchdog settings
    pub watchdog: WatchdogConfig,
    /// Recover with Connect on a known port instead of a fresh Scan
    pub use_fixed_port: bool,
    /// Re-enter Scan/Connect automatically after a watchdog timeout
    pub reconnect_on_timeout: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(defaults::TICK_INTERVAL_MS),
            watchdog: WatchdogConfig::default(),
            use_fixed_port: defaults::USE_FIXED_PORT,
            reconnect_on_timeout: true,
        }
    }
}

impl ManagerConfig {
    /// Apply `LINKWATCH_*` environment overrides on top of the defaults
    ///
    /// Recognised variables: `LINKWATCH_TICK_MS`, `LINKWATCH_WATCHDOG_TIMEOUT_MS`,
    /// `LINKWATCH_WATCHDOG_RETRY_MS`, `LINKWATCH_WATCHDOG_TRIES`,
    /// `LINKWATCH_WATCHDOG`, `LINKWATCH_FIXED_PORT`, `LINKWATCH_RECONNECT`.
    pub fn from_env() -> Result<Self, LinkError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, LinkError> {
        let mut config = Self::default();

        if let Some(ms) = parse_var::<u64>(&lookup, "LINKWATCH_TICK_MS")? {
            config.tick_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LINKWATCH_WATCHDOG_TIMEOUT_MS")? {
            config.watchdog.timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "LINKWATCH_WATCHDOG_RETRY_MS")? {
            config.watchdog.retry_timeout = Duration::from_millis(ms);
        }
        if let Some(tries) = parse_var::<u32>(&lookup, "LINKWATCH_WATCHDOG_TRIES")? {
            config.watchdog.max_tries = tries;
        }
        if let Some(enabled) = parse_var::<bool>(&lookup, "LINKWATCH_WATCHDOG")? {
            config.watchdog.enabled = enabled;
        }
        if let Some(fixed) = parse_var::<bool>(&lookup, "LINKWATCH_FIXED_PORT")? {
            config.use_fixed_port = fixed;
        }
        if let Some(reconnect) = parse_var::<bool>(&lookup, "LINKWATCH_RECONNECT")? {
            config.reconnect_on_timeout = reconnect;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.tick_interval.is_zero() {
            return Err(LinkError::InvalidConfig("tick interval must be non-zero".into()));
        }
        if self.watchdog.max_tries == 0 {
            return Err(LinkError::InvalidConfig("watchdog max tries must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, LinkError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| LinkError::InvalidConfig(format!("{key}={raw:?} is not valid"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.watchdog.timeout, Duration::from_millis(2000));
        assert_eq!(config.watchdog.retry_timeout, Duration::from_millis(1000));
        assert_eq!(config.watchdog.max_tries, 3);
        assert!(!config.watchdog.enabled);
        assert!(!config.use_fixed_port);
        assert!(config.reconnect_on_timeout);
    }

    #[test]
    fn test_env_overrides() {
        let config = ManagerConfig::from_lookup(lookup_from(&[
            ("LINKWATCH_TICK_MS", "250"),
            ("LINKWATCH_WATCHDOG", "true"),
            ("LINKWATCH_WATCHDOG_TRIES", "5"),
            ("LINKWATCH_FIXED_PORT", "true"),
        ]))
        .expect("valid overrides");

        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert!(config.watchdog.enabled);
        assert_eq!(config.watchdog.max_tries, 5);
        assert!(config.use_fixed_port);
        assert_eq!(config.watchdog.timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_unparsable_value_rejected() {
        let result = ManagerConfig::from_lookup(lookup_from(&[("LINKWATCH_TICK_MS", "soon")]));
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_tries_rejected() {
        let result = ManagerConfig::from_lookup(lookup_from(&[("LINKWATCH_WATCHDOG_TRIES", "0")]));
        assert!(matches!(result, Err(LinkError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_tick_rejected() {
        let config = ManagerConfig {
            tick_interval: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

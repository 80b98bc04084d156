//! Controller configuration.
//!
//! Read once at startup from environment variables.

use crate::error::ControllerError;
use std::time::Duration;

/// Runtime configuration of the NodeSet controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to watch, `None` for all namespaces
    pub namespace: Option<String>,
    /// Requeue interval after a successful reconcile
    pub resync_interval: Duration,
    /// Maximum concurrent NodeSet reconciliations
    pub concurrency: u16,
    /// Quiet period before reconciling after an event
    pub debounce: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            resync_interval: Duration::from_secs(30),
            concurrency: 3,
            debounce: Duration::from_secs(1),
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.is_empty());
        let resync_interval = match lookup("RESYNC_INTERVAL_SECS") {
            Some(value) => Duration::from_secs(parse_number("RESYNC_INTERVAL_SECS", &value)?),
            None => defaults.resync_interval,
        };
        let concurrency = match lookup("CONTROLLER_CONCURRENCY") {
            Some(value) => parse_number("CONTROLLER_CONCURRENCY", &value)?,
            None => defaults.concurrency,
        };
        let debounce = match lookup("DEBOUNCE_SECS") {
            Some(value) => Duration::from_secs(parse_number("DEBOUNCE_SECS", &value)?),
            None => defaults.debounce,
        };

        if concurrency == 0 {
            return Err(ControllerError::InvalidConfig(
                "CONTROLLER_CONCURRENCY must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            namespace,
            resync_interval,
            concurrency,
            debounce,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ControllerError> {
    value.trim().parse().map_err(|_| {
        ControllerError::InvalidConfig(format!(
            "{} must be a non-negative integer, got {:?}",
            key, value
        ))
    })
}

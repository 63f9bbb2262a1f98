//! Operator configuration from the environment.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `POD_NAMESPACE` | `default` |
//! | `REGISTRATION_RETRY_SECS` | 90 |
//! | `CONFIGURATION_RETRY_SECS` | 10 |
//! | `WORK_REQUEST_POLL_SECS` | 5 |
//! | `WORK_REQUEST_MAX_ATTEMPTS` | 60 |
//! | `RESYNC_INTERVAL_SECS` | 600 |
//! | `HEALTH_PORT` | 8080 |
//!
//! Unparseable values are logged and replaced by the default.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::cloud::work_request::{DEFAULT_MAX_ATTEMPTS, DEFAULT_POLL_INTERVAL};
use crate::controller::error::ErrorClass;

/// Runtime settings of the operator.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OperatorConfig {
    /// Namespace the operator runs in, used for unqualified secret references.
    pub namespace: String,
    /// Delay before retrying a failed registration.
    pub registration_retry: Duration,
    /// Delay before retrying when the provider cannot be built.
    pub configuration_retry: Duration,
    pub work_request_poll_interval: Duration,
    pub work_request_max_attempts: u32,
    /// Periodic re-reconcile of registrars that are `Ready`.
    pub resync_interval: Duration,
    pub health_port: u16,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            namespace: "default".to_string(),
            registration_retry: Duration::from_secs(90),
            configuration_retry: Duration::from_secs(10),
            work_request_poll_interval: DEFAULT_POLL_INTERVAL,
            work_request_max_attempts: DEFAULT_MAX_ATTEMPTS,
            resync_interval: Duration::from_secs(600),
            health_port: 8080,
        }
    }
}

impl OperatorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            namespace: lookup("POD_NAMESPACE")
                .filter(|ns| !ns.is_empty())
                .unwrap_or(defaults.namespace),
            registration_retry: Duration::from_secs(parse_or(
                &lookup,
                "REGISTRATION_RETRY_SECS",
                defaults.registration_retry.as_secs(),
            )),
            configuration_retry: Duration::from_secs(parse_or(
                &lookup,
                "CONFIGURATION_RETRY_SECS",
                defaults.configuration_retry.as_secs(),
            )),
            work_request_poll_interval: Duration::from_secs(parse_or(
                &lookup,
                "WORK_REQUEST_POLL_SECS",
                defaults.work_request_poll_interval.as_secs(),
            )),
            work_request_max_attempts: parse_or(
                &lookup,
                "WORK_REQUEST_MAX_ATTEMPTS",
                defaults.work_request_max_attempts,
            ),
            resync_interval: Duration::from_secs(parse_or(
                &lookup,
                "RESYNC_INTERVAL_SECS",
                defaults.resync_interval.as_secs(),
            )),
            health_port: parse_or(&lookup, "HEALTH_PORT", defaults.health_port),
        }
    }

    /// Requeue delay after a failure of the given class.
    pub fn retry_delay(&self, class: ErrorClass) -> Duration {
        match class {
            ErrorClass::Configuration => self.configuration_retry,
            ErrorClass::Registration => self.registration_retry,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!(variable = key, value = %raw, default = %default, "Invalid value, using default");
            default
        }),
    }
}

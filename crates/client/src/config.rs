//! Client configuration.
//!
//! Everything has a default suitable for a broker on `localhost`. The
//! environment (optionally seeded from a `.env` file) can override the
//! broker address and credentials.

use crate::retry::RetryPolicy;

use std::time::Duration;

use courier_broker::{Credentials, Endpoint};
use thiserror::Error;
use tracing::debug;

/// Broker host. Takes precedence over everything else.
pub const ENV_HOST: &str = "COURIER_BROKER_HOST";

/// Broker port.
pub const ENV_PORT: &str = "COURIER_BROKER_PORT";

/// Username presented to the broker.
pub const ENV_USERNAME: &str = "COURIER_BROKER_USERNAME";

/// Password presented to the broker.
pub const ENV_PASSWORD: &str = "COURIER_BROKER_PASSWORD";

/// Set when running inside a container network.
pub const ENV_DOCKER: &str = "COURIER_DOCKER_ENV";

/// Service name of the broker inside a container network.
pub const ENV_SERVICE: &str = "COURIER_BROKER_SERVICE";

/// Default client port of the broker.
pub const DEFAULT_PORT: u16 = 4222;

/// Default broker service name inside a container network.
pub const DEFAULT_SERVICE: &str = "nats";

/// Errors that can occur while loading configuration.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// The port is not a number between 1 and 65535.
    #[error("invalid port `{value}` in {variable}")]
    InvalidPort {
        /// The variable that held the value.
        variable: &'static str,
        /// The rejected value.
        value: String,
    },
}

/// How the broker address was determined.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum AddressMode {
    /// Host name or IP address.
    #[default]
    Direct,

    /// Orchestrator service name, resolved by the container network.
    ServiceName,
}

/// Configuration of the messaging client.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Where the broker listens.
    pub endpoint: Endpoint,

    /// Credentials presented on connect.
    pub credentials: Credentials,

    /// How `endpoint.host` was chosen.
    pub address_mode: AddressMode,

    /// Retry policy for establishing the connection.
    pub connect_retry: RetryPolicy,

    /// Retry policy for creating streams.
    pub create_retry: RetryPolicy,

    /// Retry policy for sends and resubscribes.
    pub send_retry: RetryPolicy,

    /// Bound on a single connection attempt.
    pub connect_timeout: Duration,

    /// Bound on a single broker operation.
    pub operation_timeout: Duration,

    /// Stream recreations a single send may trigger.
    pub recreate_attempts: u32,

    /// Consecutive resubscribe attempts without progress before a feed
    /// gives up.
    pub resubscribe_attempts: u32,

    /// Deliveries buffered per subscription.
    pub buffer_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::new("localhost", DEFAULT_PORT),
            credentials: Credentials::default(),
            address_mode: AddressMode::Direct,
            connect_retry: RetryPolicy::fixed(10, Duration::from_secs(5)),
            create_retry: RetryPolicy::fixed(10, Duration::from_secs(5)),
            send_retry: RetryPolicy::exponential(
                5,
                Duration::from_millis(100),
                Duration::from_secs(5),
            ),
            connect_timeout: Duration::from_secs(5),
            operation_timeout: Duration::from_secs(10),
            recreate_attempts: 5,
            resubscribe_attempts: 5,
            buffer_capacity: 100,
        }
    }
}

impl ClientConfig {
    /// Loads `.env` if present, then reads the environment.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable holds an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        match dotenvy::dotenv() {
            Ok(path) => debug!(path = %path.display(), "loaded .env"),
            Err(e) if e.not_found() => {}
            Err(e) => debug!(error = %e, "ignoring unreadable .env"),
        }

        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from a variable lookup function.
    ///
    /// An explicit host wins. Otherwise the docker flag selects the service
    /// name, and the fallback is `localhost`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if a variable holds an invalid value.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let port = match get(ENV_PORT) {
            Some(value) => match value.trim().parse::<u16>() {
                Ok(port) if port > 0 => port,
                _ => {
                    return Err(ConfigError::InvalidPort {
                        variable: ENV_PORT,
                        value,
                    });
                }
            },
            None => DEFAULT_PORT,
        };

        let docker = get(ENV_DOCKER).is_some_and(|value| {
            !matches!(value.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no")
        });

        let (host, address_mode) = match get(ENV_HOST) {
            Some(host) => (host, AddressMode::Direct),
            None if docker => (
                get(ENV_SERVICE).unwrap_or_else(|| DEFAULT_SERVICE.to_string()),
                AddressMode::ServiceName,
            ),
            None => ("localhost".to_string(), AddressMode::Direct),
        };

        let defaults = Credentials::default();
        let credentials = Credentials::new(
            get(ENV_USERNAME).unwrap_or(defaults.username),
            get(ENV_PASSWORD).unwrap_or(defaults.password),
        );

        Ok(Self {
            endpoint: Endpoint::new(host, port),
            credentials,
            address_mode,
            ..Self::default()
        })
    }
}

use crate::core::{Error, ResultCode};
use std::time::Duration;
use thiserror::Error;

/// Configuration problems detected before anything touches the network.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid host address: '{0}'")]
    InvalidHost(String),

    #[error("Invalid cluster URL: {0}")]
    InvalidUrl(String),

    #[error("Invalid JSON configuration: {0}")]
    InvalidJson(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidPool(String),

    #[error("Invalid cluster configuration: {0}")]
    InvalidCluster(String),
}

impl From<ConfigError> for Error {
    #[track_caller]
    fn from(err: ConfigError) -> Self {
        Error::new(ResultCode::ParameterError, err.to_string())
    }
}

/// Per-node connection pool configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Idle connections the background fill keeps ready
    pub min_connections: usize,

    /// Hard cap on connections per node and transport
    pub max_connections: usize,

    /// Cap on connections being established at the same time
    pub max_opening_connections: usize,

    /// Open a connection on the request path when no idle one is available
    pub open_on_demand: bool,

    /// How long `get` waits for a connection to be returned at capacity.
    /// `None` fails immediately.
    pub acquire_timeout: Option<Duration>,

    /// Connection establishment timeout
    pub connect_timeout: Duration,

    /// Idle connections older than this are closed instead of reused
    pub idle_timeout: Option<Duration>,

    /// Connections older than this are closed instead of reused
    pub max_lifetime: Option<Duration>,
}

impl PoolConfig {
    pub fn new() -> Self {
        Self {
            min_connections: 0,
            max_connections: 100,
            max_opening_connections: 16,
            open_on_demand: true,
            acquire_timeout: None,
            connect_timeout: Duration::from_secs(1),
            idle_timeout: Some(Duration::from_secs(55)),
            max_lifetime: None,
        }
    }

    /// Set minimum connections
    pub fn min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set the concurrent opening throttle
    pub fn max_opening_connections(mut self, max: usize) -> Self {
        self.max_opening_connections = max;
        self
    }

    pub fn open_on_demand(mut self, enabled: bool) -> Self {
        self.open_on_demand = enabled;
        self
    }

    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = Some(timeout);
        self
    }

    /// Set connection timeout
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set idle timeout
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    /// Set maximum lifetime
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidPool(
                "max_connections must be > 0".to_string(),
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::InvalidPool(
                "min_connections cannot exceed max_connections".to_string(),
            ));
        }

        if self.max_opening_connections == 0 {
            return Err(ConfigError::InvalidPool(
                "max_opening_connections must be > 0".to_string(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(ConfigError::InvalidPool(
                "connect_timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        assert_eq!(config.min_connections, 0);
        assert_eq!(config.max_connections, 100);
        assert!(config.open_on_demand);
        assert!(config.acquire_timeout.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_pattern() {
        let config = PoolConfig::new()
            .min_connections(2)
            .max_connections(8)
            .max_opening_connections(3)
            .acquire_timeout(Duration::from_millis(50));

        assert_eq!(config.min_connections, 2);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.max_opening_connections, 3);
        assert_eq!(config.acquire_timeout, Some(Duration::from_millis(50)));
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::new().max_connections(0).validate().is_err());
        assert!(
            PoolConfig::new()
                .min_connections(10)
                .max_connections(5)
                .validate()
                .is_err()
        );
        assert!(PoolConfig::new().max_opening_connections(0).validate().is_err());
    }

    #[test]
    fn test_config_error_converts_to_parameter_error() {
        let err: Error = ConfigError::InvalidPool("nope".to_string()).into();
        assert_eq!(err.code(), ResultCode::ParameterError);
        assert!(err.message().contains("nope"));
    }
}

use crate::connection::config::{ConfigError, PoolConfig};
use crate::connection::{DEFAULT_PORT, Host, TransportKind};
use serde::Deserialize;
use std::time::Duration;

const URL_SCHEME: &str = "routecore://";

/// Cluster-wide client configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Addresses contacted when no node is known yet
    pub seeds: Vec<Host>,

    /// Period of the background tend
    pub tend_interval: Duration,

    /// Timeout applied to each info query made during tend
    pub tend_timeout: Duration,

    /// Consecutive failed tends after which a node is dropped
    pub max_tend_failures: u32,

    /// Fail `connect` when no seed answers
    pub fail_if_not_connected: bool,

    /// One connection pool per transport is kept for every node
    pub transports: Vec<TransportKind>,

    pub pool: PoolConfig,
}

impl ClusterConfig {
    pub fn new(seeds: Vec<Host>) -> Self {
        Self {
            seeds,
            tend_interval: Duration::from_secs(1),
            tend_timeout: Duration::from_secs(1),
            max_tend_failures: 5,
            fail_if_not_connected: true,
            transports: vec![TransportKind::Tcp],
            pool: PoolConfig::default(),
        }
    }

    pub fn seed(mut self, host: Host) -> Self {
        self.seeds.push(host);
        self
    }

    pub fn tend_interval(mut self, interval: Duration) -> Self {
        self.tend_interval = interval;
        self
    }

    pub fn tend_timeout(mut self, timeout: Duration) -> Self {
        self.tend_timeout = timeout;
        self
    }

    pub fn max_tend_failures(mut self, failures: u32) -> Self {
        self.max_tend_failures = failures;
        self
    }

    pub fn fail_if_not_connected(mut self, enabled: bool) -> Self {
        self.fail_if_not_connected = enabled;
        self
    }

    pub fn transports(mut self, transports: Vec<TransportKind>) -> Self {
        self.transports = transports;
        self
    }

    pub fn pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Create config from URL
    ///
    /// Format: `routecore://host[:port][,host[:port]...][?key=value&...]`
    ///
    /// Recognized keys: `tend_interval_ms`, `tend_timeout_ms`,
    /// `max_tend_failures`, `min_connections`, `max_connections`,
    /// `fail_if_not_connected`, `tls`.
    ///
    /// # Example
    /// ```
    /// use routecore::cluster::config::ClusterConfig;
    ///
    /// let config = ClusterConfig::from_url("routecore://db1:3100,db2?max_connections=8").unwrap();
    /// assert_eq!(config.seeds.len(), 2);
    /// assert_eq!(config.seeds[1].port, 3000);
    /// assert_eq!(config.pool.max_connections, 8);
    /// ```
    pub fn from_url(url: &str) -> Result<Self, ConfigError> {
        let rest = url
            .strip_prefix(URL_SCHEME)
            .ok_or_else(|| ConfigError::InvalidUrl(format!("URL must start with {}", URL_SCHEME)))?;

        let (hosts, query) = match rest.split_once('?') {
            Some((hosts, query)) => (hosts, Some(query)),
            None => (rest, None),
        };
        let hosts = hosts.trim_end_matches('/');
        if hosts.is_empty() {
            return Err(ConfigError::InvalidUrl("no seed hosts".to_string()));
        }

        let seeds = hosts
            .split(',')
            .map(|addr| Host::parse(addr, DEFAULT_PORT))
            .collect::<Result<Vec<_>, _>>()?;
        let mut config = Self::new(seeds);

        for pair in query.into_iter().flat_map(|q| q.split('&')).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| ConfigError::InvalidUrl(format!("malformed parameter '{}'", pair)))?;
            config.apply_url_param(key, value)?;
        }

        Ok(config)
    }

    fn apply_url_param(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse_value<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value
                .parse()
                .map_err(|_| ConfigError::InvalidUrl(format!("invalid value for {}: '{}'", key, value)))
        }

        match key {
            "tend_interval_ms" => self.tend_interval = Duration::from_millis(parse_value(key, value)?),
            "tend_timeout_ms" => self.tend_timeout = Duration::from_millis(parse_value(key, value)?),
            "max_tend_failures" => self.max_tend_failures = parse_value(key, value)?,
            "min_connections" => self.pool.min_connections = parse_value(key, value)?,
            "max_connections" => self.pool.max_connections = parse_value(key, value)?,
            "fail_if_not_connected" => self.fail_if_not_connected = parse_value(key, value)?,
            "tls" => {
                if parse_value::<bool>(key, value)? && !self.transports.contains(&TransportKind::Tls) {
                    self.transports.push(TransportKind::Tls);
                }
            }
            _ => {
                return Err(ConfigError::InvalidUrl(format!(
                    "unknown parameter '{}'",
                    key
                )));
            }
        }
        Ok(())
    }

    /// Renders the seeds and tend settings back into URL form.
    pub fn to_url(&self) -> String {
        let hosts: Vec<String> = self.seeds.iter().map(Host::to_string).collect();
        format!(
            "{}{}?tend_interval_ms={}&max_connections={}",
            URL_SCHEME,
            hosts.join(","),
            self.tend_interval.as_millis(),
            self.pool.max_connections
        )
    }

    /// Loads configuration from JSON. Durations are given in milliseconds and
    /// every field except `seeds` falls back to its default.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let file: ClusterConfigFile =
            serde_json::from_str(json).map_err(|err| ConfigError::InvalidJson(err.to_string()))?;

        let seeds = file
            .seeds
            .iter()
            .map(|addr| Host::parse(addr, DEFAULT_PORT))
            .collect::<Result<Vec<_>, _>>()?;

        let mut config = Self::new(seeds);
        if let Some(ms) = file.tend_interval_ms {
            config.tend_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = file.tend_timeout_ms {
            config.tend_timeout = Duration::from_millis(ms);
        }
        if let Some(failures) = file.max_tend_failures {
            config.max_tend_failures = failures;
        }
        if let Some(enabled) = file.fail_if_not_connected {
            config.fail_if_not_connected = enabled;
        }
        if let Some(transports) = file.transports {
            config.transports = transports;
        }
        if let Some(pool) = file.pool {
            config.pool = pool.into_pool_config();
        }
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.seeds.is_empty() {
            return Err(ConfigError::InvalidCluster(
                "at least one seed host is required".to_string(),
            ));
        }

        if self.tend_interval.is_zero() {
            return Err(ConfigError::InvalidCluster(
                "tend_interval must be > 0".to_string(),
            ));
        }

        if self.tend_timeout.is_zero() {
            return Err(ConfigError::InvalidCluster(
                "tend_timeout must be > 0".to_string(),
            ));
        }

        if self.max_tend_failures == 0 {
            return Err(ConfigError::InvalidCluster(
                "max_tend_failures must be > 0".to_string(),
            ));
        }

        if self.transports.is_empty() {
            return Err(ConfigError::InvalidCluster(
                "at least one transport is required".to_string(),
            ));
        }

        self.pool.validate()
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::new(vec![Host::new("127.0.0.1", DEFAULT_PORT)])
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClusterConfigFile {
    seeds: Vec<String>,
    tend_interval_ms: Option<u64>,
    tend_timeout_ms: Option<u64>,
    max_tend_failures: Option<u32>,
    fail_if_not_connected: Option<bool>,
    transports: Option<Vec<TransportKind>>,
    pool: Option<PoolConfigFile>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PoolConfigFile {
    min_connections: Option<usize>,
    max_connections: Option<usize>,
    max_opening_connections: Option<usize>,
    open_on_demand: Option<bool>,
    acquire_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    idle_timeout_ms: Option<u64>,
    max_lifetime_ms: Option<u64>,
}

impl PoolConfigFile {
    fn into_pool_config(self) -> PoolConfig {
        let mut pool = PoolConfig::default();
        if let Some(min) = self.min_connections {
            pool.min_connections = min;
        }
        if let Some(max) = self.max_connections {
            pool.max_connections = max;
        }
        if let Some(max) = self.max_opening_connections {
            pool.max_opening_connections = max;
        }
        if let Some(enabled) = self.open_on_demand {
            pool.open_on_demand = enabled;
        }
        if let Some(ms) = self.connect_timeout_ms {
            pool.connect_timeout = Duration::from_millis(ms);
        }
        pool.acquire_timeout = self.acquire_timeout_ms.map(Duration::from_millis);
        if let Some(ms) = self.idle_timeout_ms {
            pool.idle_timeout = Some(Duration::from_millis(ms));
        }
        pool.max_lifetime = self.max_lifetime_ms.map(Duration::from_millis);
        pool
    }
}

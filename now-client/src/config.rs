//! Client and host configuration.
//!
//! [`ClientConfig`] is the runtime configuration consumed by
//! [`NowClient::connect`](crate::NowClient::connect). [`Config`] is the
//! file format used by the `nowproto` binary. It is loaded in the following
//! order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via NOW_CONFIG)
//! 3. Environment variables

use now_proto::{Capset, EncodeError, DEFAULT_BUFFER_SIZE, MAX_BUFFER_SIZE};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default command queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

const DEFAULT_HEARTBEAT_SECS: u64 = 60;

/// Runtime client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Time allowed for the capability exchange.
    pub connect_timeout: Duration,
    /// Heartbeat interval to advertise, `None` to disable supervision.
    pub heartbeat_interval: Option<Duration>,
    pub command_queue_capacity: usize,
    /// Read buffer size for transport reads.
    pub read_buffer_size: usize,
    pub buffer_default_size: usize,
    pub buffer_max_size: usize,
    /// Time allowed for an RDM capability exchange.
    pub rdm_timeout: Duration,
    /// Capabilities to advertise. Version and bits are used, the heartbeat
    /// comes from `heartbeat_interval`.
    pub capabilities: Capset,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            heartbeat_interval: Some(Duration::from_secs(DEFAULT_HEARTBEAT_SECS)),
            command_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            buffer_default_size: DEFAULT_BUFFER_SIZE,
            buffer_max_size: MAX_BUFFER_SIZE,
            rdm_timeout: Duration::from_secs(10),
            capabilities: Capset::all(),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_heartbeat_interval(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn with_command_queue_capacity(mut self, capacity: usize) -> Self {
        self.command_queue_capacity = capacity.max(1);
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }

    pub fn with_buffer_sizes(mut self, default_size: usize, max_size: usize) -> Self {
        self.buffer_default_size = default_size;
        self.buffer_max_size = max_size.max(default_size);
        self
    }

    pub fn with_rdm_timeout(mut self, timeout: Duration) -> Self {
        self.rdm_timeout = timeout;
        self
    }

    pub fn with_capabilities(mut self, capabilities: Capset) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Builds the capability set sent during negotiation.
    pub fn advertised_capset(&self) -> Result<Capset, EncodeError> {
        let capset = self.capabilities.clone().without_heartbeat();
        match self.heartbeat_interval {
            Some(interval) => capset.with_heartbeat(interval),
            None => Ok(capset),
        }
    }
}

/// Configuration file contents.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub buffer: BufferConfig,
    pub rdm: RdmConfig,
    pub host: HostConfig,
}

impl Config {
    /// Defaults, then the file named by `NOW_CONFIG` if set, then `NOW_*`
    /// environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("NOW_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Reads a YAML file. Missing sections and fields keep their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))
    }

    fn apply_env_overrides(&mut self) {
        self.connection.apply_env_overrides();
        self.buffer.apply_env_overrides();
        self.rdm.apply_env_overrides();
        self.host.apply_env_overrides();
    }

    /// Validates the settings and builds the runtime client configuration.
    pub fn client_config(&self) -> Result<ClientConfig, ConfigError> {
        if self.connection.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "connection.queue_capacity must be greater than zero".to_string(),
            ));
        }
        if self.buffer.max_size < self.buffer.default_size {
            return Err(ConfigError::Invalid(format!(
                "buffer.max_size ({}) is smaller than buffer.default_size ({})",
                self.buffer.max_size, self.buffer.default_size
            )));
        }

        let config = ClientConfig::new()
            .with_connect_timeout(Duration::from_secs(self.connection.connect_timeout_secs))
            .with_heartbeat_interval(self.connection.heartbeat_interval())
            .with_command_queue_capacity(self.connection.queue_capacity)
            .with_read_buffer_size(self.buffer.read_size)
            .with_buffer_sizes(self.buffer.default_size, self.buffer.max_size)
            .with_rdm_timeout(Duration::from_secs(self.rdm.timeout_secs));

        // surfaces an out-of-range heartbeat before anything is sent
        config
            .advertised_capset()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(config)
    }
}

/// Connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Agent address, `host:port`.
    pub addr: String,
    pub connect_timeout_secs: u64,
    /// Heartbeat interval in seconds, 0 to disable.
    pub heartbeat_interval_secs: u64,
    pub queue_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:4900".to_string(),
            connect_timeout_secs: 10,
            heartbeat_interval_secs: DEFAULT_HEARTBEAT_SECS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("NOW_ADDR") {
            if !addr.is_empty() {
                self.addr = addr;
            }
        }

        if let Ok(timeout) = std::env::var("NOW_CONNECT_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.connect_timeout_secs = secs;
            }
        }

        if let Ok(interval) = std::env::var("NOW_HEARTBEAT_INTERVAL") {
            if let Ok(secs) = interval.parse() {
                self.heartbeat_interval_secs = secs;
            }
        }

        if let Ok(capacity) = std::env::var("NOW_QUEUE_CAPACITY") {
            if let Ok(n) = capacity.parse() {
                self.queue_capacity = n;
            }
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs != 0)
            .then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

/// Receive buffer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub read_size: usize,
    pub default_size: usize,
    pub max_size: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            read_size: DEFAULT_READ_BUFFER_SIZE,
            default_size: DEFAULT_BUFFER_SIZE,
            max_size: MAX_BUFFER_SIZE,
        }
    }
}

impl BufferConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(max) = std::env::var("NOW_BUFFER_MAX") {
            if let Ok(n) = max.parse() {
                self.max_size = n;
            }
        }
    }
}

/// RDM sub-protocol settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RdmConfig {
    pub timeout_secs: u64,
}

impl Default for RdmConfig {
    fn default() -> Self {
        Self { timeout_secs: 10 }
    }
}

impl RdmConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(timeout) = std::env::var("NOW_RDM_TIMEOUT") {
            if let Ok(secs) = timeout.parse() {
                self.timeout_secs = secs;
            }
        }
    }
}

/// RDM host (server role) settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Address to listen on.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Heartbeat send interval in seconds. 0 uses the negotiated interval.
    pub heartbeat_interval_secs: u64,
    /// Version reported in RDM capability replies.
    pub rdm_version: String,
    pub app_available: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 4900)),
            heartbeat_interval_secs: 0,
            rdm_version: env!("CARGO_PKG_VERSION").to_string(),
            app_available: true,
        }
    }
}

impl HostConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("NOW_HOST_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        (self.heartbeat_interval_secs != 0)
            .then(|| Duration::from_secs(self.heartbeat_interval_secs))
    }
}

/// Configuration error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{}': {1}", .0.display())]
    IoError(PathBuf, std::io::Error),

    #[error("failed to parse config file '{}': {1}", .0.display())]
    ParseError(PathBuf, String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// `SocketAddr` as a plain `host:port` string.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.heartbeat_interval, Some(Duration::from_secs(60)));
        assert_eq!(config.command_queue_capacity, 1024);
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.buffer_default_size, 64 * 1024);
        assert_eq!(config.buffer_max_size, 1024 * 1024);
        assert_eq!(config.rdm_timeout, Duration::from_secs(10));
        assert_eq!(config.capabilities, Capset::all());
    }

    #[test]
    fn test_read_buffer_clamping() {
        let config = ClientConfig::new().with_read_buffer_size(100);
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ClientConfig::new().with_read_buffer_size(10 * 1024 * 1024);
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_advertised_capset() {
        let capset = ClientConfig::new().advertised_capset().unwrap();
        assert_eq!(capset.heartbeat(), Some(Duration::from_secs(60)));
        assert_eq!(capset.exec, Capset::all().exec);

        let capset = ClientConfig::new()
            .with_heartbeat_interval(None)
            .advertised_capset()
            .unwrap();
        assert_eq!(capset.heartbeat(), None);

        let err = ClientConfig::new()
            .with_heartbeat_interval(Some(Duration::from_secs(1)))
            .advertised_capset()
            .unwrap_err();
        assert_eq!(err, EncodeError::HeartbeatOutOfRange(Duration::from_secs(1)));
    }

    #[test]
    fn test_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "connection:\n  addr: \"10.0.0.5:4900\"\n  heartbeat_interval_secs: 0\nrdm:\n  timeout_secs: 3\nhost:\n  bind_addr: \"0.0.0.0:5000\""
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.connection.addr, "10.0.0.5:4900");
        assert_eq!(config.connection.connect_timeout_secs, 10);
        assert_eq!(config.host.bind_addr.port(), 5000);

        let client = config.client_config().unwrap();
        assert_eq!(client.heartbeat_interval, None);
        assert_eq!(client.rdm_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::from_file("/nonexistent/now.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::IoError(..)));
        assert!(err.to_string().contains("/nonexistent/now.yaml"));
    }

    #[test]
    fn test_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "connection: [not, a, map]").unwrap();
        assert!(matches!(
            Config::from_file(file.path()),
            Err(ConfigError::ParseError(..))
        ));
    }

    #[test]
    fn test_validation() {
        let mut config = Config::default();
        config.connection.heartbeat_interval_secs = 2;
        assert!(matches!(
            config.client_config(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = Config::default();
        config.buffer.max_size = 1024;
        assert!(matches!(
            config.client_config(),
            Err(ConfigError::Invalid(_))
        ));

        let mut config = Config::default();
        config.connection.queue_capacity = 0;
        assert!(config.client_config().is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.host.bind_addr, config.host.bind_addr);
        assert_eq!(parsed.connection.addr, config.connection.addr);
    }
}

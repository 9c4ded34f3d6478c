use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration shared by the dispatcher and every service instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridConfig {
    /// Service instance settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Shared store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Backup file settings
    #[serde(default)]
    pub backup: BackupConfig,

    /// Dispatcher settings
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Listen settings for one service instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// Port to bind
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// How long in-flight requests may run after a shutdown signal
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_server_port(),
            grace_period_ms: default_grace_period_ms(),
        }
    }
}

impl ServerConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

/// Shared relational store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path of the SQLite database file shared by all instances
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a statement waits for a lock held by a sibling instance
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

impl StoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

/// Backup file exchanged at startup and shutdown
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Path of the comma-delimited backup file
    #[serde(default = "default_backup_path")]
    pub path: PathBuf,

    /// Whether this instance writes the backup on shutdown
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            path: default_backup_path(),
            enabled: true,
        }
    }
}

/// Round-robin dispatcher and its backend pool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Public address to bind
    #[serde(default = "default_address")]
    pub address: IpAddr,

    /// Public port to bind
    #[serde(default = "default_dispatcher_port")]
    pub port: u16,

    /// Number of backend instances
    #[serde(default = "default_pool_size")]
    pub pool_size: u16,

    /// Backend `i` (1-based) listens on `base_port + i`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Explicit backend addresses; overrides `pool_size`/`base_port` when non-empty
    #[serde(default)]
    pub backends: Vec<SocketAddr>,

    /// How long in-flight requests may run after a shutdown signal
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,

    /// Timeout for one forwarded request
    #[serde(default = "default_upstream_timeout_ms")]
    pub upstream_timeout_ms: u64,

    /// Largest inbound request body that will be forwarded
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Launch the backend instances as child processes
    #[serde(default)]
    pub spawn_backends: bool,

    /// Executable started for each backend; defaults to the running binary
    #[serde(default)]
    pub instance_exe: Option<PathBuf>,

    /// How long supervised instances get to drain and back up before being killed
    #[serde(default = "default_instance_stop_timeout_ms")]
    pub instance_stop_timeout_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            address: default_address(),
            port: default_dispatcher_port(),
            pool_size: default_pool_size(),
            base_port: default_base_port(),
            backends: Vec::new(),
            grace_period_ms: default_grace_period_ms(),
            upstream_timeout_ms: default_upstream_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
            spawn_backends: false,
            instance_exe: None,
            instance_stop_timeout_ms: default_instance_stop_timeout_ms(),
        }
    }
}

impl DispatcherConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Ports of the supervised backends, `base_port + 1 ..= base_port + pool_size`
    pub fn backend_ports(&self) -> Vec<u16> {
        (1..=self.pool_size)
            .map(|i| self.base_port.saturating_add(i))
            .collect()
    }

    /// Ordered backend addresses
    pub fn backend_addrs(&self) -> Vec<SocketAddr> {
        if !self.backends.is_empty() {
            return self.backends.clone();
        }
        self.backend_ports()
            .into_iter()
            .map(|port| SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
            .collect()
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn instance_stop_timeout(&self) -> Duration {
        Duration::from_millis(self.instance_stop_timeout_ms)
    }
}

fn default_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_server_port() -> u16 {
    9001
}

fn default_dispatcher_port() -> u16 {
    9000
}

fn default_pool_size() -> u16 {
    2
}

fn default_base_port() -> u16 {
    9000
}

fn default_grace_period_ms() -> u64 {
    2000
}

fn default_upstream_timeout_ms() -> u64 {
    30_000
}

fn default_instance_stop_timeout_ms() -> u64 {
    10_000
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

fn default_busy_timeout_ms() -> u64 {
    5000
}

fn default_store_path() -> PathBuf {
    PathBuf::from("cities.db")
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("cities.csv")
}

fn default_true() -> bool {
    true
}

impl GridConfig {
    /// Load configuration from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: GridConfig =
            serde_yaml::from_str(&content).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize config")?;
        std::fs::write(path.as_ref(), content)
            .context(format!("Failed to write config file: {:?}", path.as_ref()))?;
        Ok(())
    }

    /// Generate a sample configuration
    pub fn sample() -> Self {
        Self {
            dispatcher: DispatcherConfig {
                spawn_backends: true,
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

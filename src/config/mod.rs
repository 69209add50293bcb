use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Static key expected in `X-API-Key` or `Authorization: Bearer`
    #[serde(default)]
    pub api_key: String,
    /// True when `api_key` was generated because none was configured
    #[serde(skip)]
    pub generated: bool,
}

impl AuthConfig {
    /// Generate a random key when none is configured
    pub fn ensure_key(&mut self) {
        if self.api_key.trim().is_empty() {
            self.api_key = uuid::Uuid::new_v4().to_string();
            self.generated = true;
        }
    }

    /// Replace the key with one supplied by the operator
    pub fn set_key(&mut self, api_key: String) {
        self.api_key = api_key;
        self.generated = false;
        self.ensure_key();
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        let mut auth = Self {
            api_key: String::new(),
            generated: false,
        };
        auth.ensure_key();
        auth
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Which implementation of the device library backs live clients
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DriverType {
    /// In-process device simulator
    Memory,
    /// No library available; connection attempts fail
    None,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionsConfig {
    /// How long `connect` waits for the session to leave `connecting` (default: 5)
    #[serde(default = "default_connect_wait")]
    pub connect_wait_secs: u64,
    /// How long QR acquisition waits for a code (default: 5)
    #[serde(default = "default_qr_wait")]
    pub qr_wait_secs: u64,
    /// Lifetime applied to a QR code when the library does not report one (default: 60)
    #[serde(default = "default_qr_lifetime")]
    pub qr_lifetime_secs: u64,
    /// Capacity of the per-session hand-off from library callbacks (default: 256)
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
    #[serde(default = "default_driver")]
    pub driver: DriverType,
}

impl SessionsConfig {
    pub fn connect_wait(&self) -> Duration {
        Duration::from_secs(self.connect_wait_secs)
    }

    pub fn qr_wait(&self) -> Duration {
        Duration::from_secs(self.qr_wait_secs)
    }

    pub fn qr_lifetime(&self) -> Duration {
        Duration::from_secs(self.qr_lifetime_secs)
    }
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            connect_wait_secs: default_connect_wait(),
            qr_wait_secs: default_qr_wait(),
            qr_lifetime_secs: default_qr_lifetime(),
            event_buffer: default_event_buffer(),
            driver: default_driver(),
        }
    }
}

fn default_connect_wait() -> u64 {
    5
}

fn default_qr_wait() -> u64 {
    5
}

fn default_qr_lifetime() -> u64 {
    60
}

fn default_event_buffer() -> usize {
    256
}

fn default_driver() -> DriverType {
    DriverType::Memory
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// Accept webhook URLs pointing at loopback hosts (default: true)
    #[serde(default = "default_allow_loopback")]
    pub allow_loopback: bool,
    /// Maximum number of deliveries in flight (default: 16)
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Capacity of the dispatch queue (default: 1024)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Per-request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Delay before each attempt; the length is the attempt budget (default: [0, 5, 15])
    #[serde(default = "default_retry_delays")]
    pub retry_delays_secs: Vec<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs
            .iter()
            .map(|s| Duration::from_secs(*s))
            .collect()
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            allow_loopback: default_allow_loopback(),
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            timeout_secs: default_timeout(),
            retry_delays_secs: default_retry_delays(),
            user_agent: default_user_agent(),
        }
    }
}

fn default_allow_loopback() -> bool {
    true
}

fn default_workers() -> usize {
    16
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_timeout() -> u64 {
    30
}

fn default_retry_delays() -> Vec<u64> {
    vec![0, 5, 15]
}

fn default_user_agent() -> String {
    format!("wagate-webhook/{}", env!("CARGO_PKG_VERSION"))
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading configuration from {}", path.display());
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let mut config: Config = toml::from_str(&content)
                .with_context(|| "Failed to parse configuration file")?;
            config.auth.ensure_key();
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            auth: AuthConfig::default(),
            logging: LoggingConfig::default(),
            sessions: SessionsConfig::default(),
            webhooks: WebhookConfig::default(),
        }
    }
}

//! Server configuration management

use crate::scanner::{DriverSettings, EngineSettings};
use crate::usb::TransferTimeouts;
use anyhow::{Context, Result, anyhow};
use common::LogFormat;
use protocol::ScanOptions;
use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding the listening port
pub const PORT_ENV: &str = "PORT";

const MIN_STREAM_BUFFER: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub scanner: ScannerSettings,
    /// Options used when a scan request carries none
    #[serde(default)]
    pub defaults: ScanOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "ServerSettings::default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "ServerSettings::default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
            log_level: Self::default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

impl ServerSettings {
    fn default_bind_addr() -> String {
        "0.0.0.0:5050".to_string()
    }

    fn default_log_level() -> String {
        "info".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Directory scans are written to, `~` is expanded
    #[serde(default = "StorageSettings::default_attachment_dir")]
    pub attachment_dir: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            attachment_dir: Self::default_attachment_dir(),
        }
    }
}

impl StorageSettings {
    fn default_attachment_dir() -> String {
        "./attachment".to_string()
    }

    pub fn attachment_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.attachment_dir).as_ref())
    }
}

/// Protocol engine and transfer tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScannerSettings {
    #[serde(default = "ScannerSettings::default_max_polls")]
    pub max_polls: u32,
    #[serde(default = "ScannerSettings::default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "ScannerSettings::default_stream_buffer_size")]
    pub stream_buffer_size: usize,
    #[serde(default = "ScannerSettings::default_bulk_in_timeout_ms")]
    pub bulk_in_timeout_ms: u64,
    #[serde(default = "ScannerSettings::default_transfer_timeout_ms")]
    pub transfer_timeout_ms: u64,
    /// Limit for the whole image stream (0 = wait forever)
    #[serde(default = "ScannerSettings::default_stream_deadline_secs")]
    pub stream_deadline_secs: u64,
}

impl Default for ScannerSettings {
    fn default() -> Self {
        Self {
            max_polls: Self::default_max_polls(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            stream_buffer_size: Self::default_stream_buffer_size(),
            bulk_in_timeout_ms: Self::default_bulk_in_timeout_ms(),
            transfer_timeout_ms: Self::default_transfer_timeout_ms(),
            stream_deadline_secs: Self::default_stream_deadline_secs(),
        }
    }
}

impl ScannerSettings {
    fn default_max_polls() -> u32 {
        100
    }

    fn default_poll_interval_ms() -> u64 {
        30
    }

    fn default_stream_buffer_size() -> usize {
        16 * 1024
    }

    fn default_bulk_in_timeout_ms() -> u64 {
        100
    }

    fn default_transfer_timeout_ms() -> u64 {
        5000
    }

    fn default_stream_deadline_secs() -> u64 {
        120
    }

    pub fn driver_settings(&self) -> DriverSettings {
        let transfer = Duration::from_millis(self.transfer_timeout_ms);
        DriverSettings {
            engine: EngineSettings {
                max_polls: self.max_polls,
                poll_interval: Duration::from_millis(self.poll_interval_ms),
                stream_buffer_size: self.stream_buffer_size,
                stream_deadline: match self.stream_deadline_secs {
                    0 => None,
                    secs => Some(Duration::from_secs(secs)),
                },
            },
            timeouts: TransferTimeouts {
                control: transfer,
                bulk_out: transfer,
                bulk_in: Duration::from_millis(self.bulk_in_timeout_ms),
            },
        }
    }
}

impl ServerConfig {
    /// Load configuration from the specified path
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = if let Some(p) = path {
            p
        } else {
            // Try standard locations in order
            let candidates = vec![
                Self::default_path(),
                PathBuf::from("/etc/usb-scan/server.toml"),
            ];

            candidates
                .into_iter()
                .find(|p| p.exists())
                .ok_or_else(|| anyhow!("No configuration file found, using defaults"))?
        };

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config = Self::parse(&content)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))?;

        tracing::info!("Loaded configuration from: {}", config_path.display());
        Ok(config)
    }

    /// Parse and validate TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: ServerConfig = toml::from_str(content).context("Failed to parse TOML")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return defaults if not found
    pub fn load_or_default() -> Self {
        match Self::load(None) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config: {}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the specified path
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::info!("Saved configuration to: {}", path.display());
        Ok(())
    }

    /// Get the default configuration file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("usb-scan").join("server.toml")
        } else {
            PathBuf::from(".config/usb-scan/server.toml")
        }
    }

    /// Address to listen on, with `PORT` from the environment applied
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        resolve_bind_addr(&self.server.bind_addr, std::env::var(PORT_ENV).ok().as_deref())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.server.log_level.as_str()) {
            return Err(anyhow!(
                "Invalid log level '{}', must be one of: {}",
                self.server.log_level,
                valid_levels.join(", ")
            ));
        }

        self.server
            .bind_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("Invalid bind address '{}'", self.server.bind_addr))?;

        if self.scanner.max_polls == 0 {
            return Err(anyhow!("scanner.max_polls must be greater than 0"));
        }

        if self.scanner.stream_buffer_size < MIN_STREAM_BUFFER {
            return Err(anyhow!(
                "scanner.stream_buffer_size must be at least {} bytes",
                MIN_STREAM_BUFFER
            ));
        }

        if self.defaults.dpi == 0 {
            return Err(anyhow!("defaults.dpi must be greater than 0"));
        }

        Ok(())
    }
}

/// Apply a `PORT` override to `bind_addr`
///
/// The override is either a bare port or a full `host:port`.
pub fn resolve_bind_addr(bind_addr: &str, port_override: Option<&str>) -> Result<SocketAddr> {
    let mut addr: SocketAddr = bind_addr
        .parse()
        .with_context(|| format!("Invalid bind address '{}'", bind_addr))?;

    if let Some(value) = port_override.map(str::trim).filter(|v| !v.is_empty()) {
        if let Ok(port) = value.parse::<u16>() {
            addr.set_port(port);
        } else {
            addr = value
                .parse()
                .with_context(|| format!("Invalid {} value '{}'", PORT_ENV, value))?;
        }
    }

    Ok(addr)
}

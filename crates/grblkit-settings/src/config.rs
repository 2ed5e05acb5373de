//! Configuration management for GrblKit
//!
//! Provides configuration file handling and validation.
//! Supports JSON and TOML file formats stored in the platform config directory.
//!
//! Configuration is organized into logical sections:
//! - Connection settings (port, framing, read timeout)
//! - Controller tuning (polling, flow control, timeouts, limits)
//! - Logging (level, output format)

use grblkit_communication::{
    CommandSchedulerConfig, ConnectionParams, ControllerConfig, HandshakeConfig, SerialParity,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConfigError, SettingsError, SettingsResult};

/// File name used inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Serial connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    /// Port name (e.g. "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5-8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Hardware flow control
    pub flow_control: bool,
    /// Serial read timeout in milliseconds
    pub read_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        let params = ConnectionParams::default();
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: params.baud_rate,
            data_bits: params.data_bits,
            stop_bits: params.stop_bits,
            parity: params.parity,
            flow_control: params.flow_control,
            read_timeout_ms: params.read_timeout_ms,
        }
    }
}

/// Controller tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Status poll interval in milliseconds; 0 disables polling
    pub poll_interval_ms: u64,
    /// Maximum unanswered lines
    pub max_in_flight_lines: usize,
    /// Optional byte budget for unanswered lines (GRBL's RX buffer is 128)
    pub rx_buffer_bytes: Option<usize>,
    /// Maximum number of lines waiting to be sent
    pub queue_size: usize,
    /// Acknowledgment timeout in milliseconds
    pub command_timeout_ms: u64,
    /// Homing cycle timeout in milliseconds
    pub homing_timeout_ms: u64,
    /// Probe cycle timeout in milliseconds
    pub probe_timeout_ms: u64,
    /// Wait after the reset pulse in milliseconds
    pub settle_ms: u64,
    /// Banner wait in milliseconds
    pub handshake_timeout_ms: u64,
    /// Text the startup banner must contain
    pub banner_signature: String,
    /// Highest spindle speed accepted
    pub max_spindle_rpm: f64,
    /// Probe feed when none is given
    pub probe_feed: f64,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        let defaults = ControllerConfig::default();
        Self {
            poll_interval_ms: defaults.poll_interval.as_millis() as u64,
            max_in_flight_lines: defaults.scheduler.max_in_flight_lines,
            rx_buffer_bytes: defaults.scheduler.rx_buffer_bytes,
            queue_size: defaults.scheduler.queue_size,
            command_timeout_ms: defaults.command_timeout.as_millis() as u64,
            homing_timeout_ms: defaults.homing_timeout.as_millis() as u64,
            probe_timeout_ms: defaults.probe_timeout.as_millis() as u64,
            settle_ms: defaults.handshake.settle.as_millis() as u64,
            handshake_timeout_ms: defaults.handshake.timeout.as_millis() as u64,
            banner_signature: defaults.handshake.signature,
            max_spindle_rpm: defaults.max_spindle_rpm,
            probe_feed: defaults.probe_feed,
        }
    }
}

/// Logging preferences
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, overridden by `RUST_LOG`
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete application configuration
///
/// Aggregates all settings sections and provides file I/O operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Connection settings
    pub connection: ConnectionSettings,
    /// Controller tuning
    pub controller: ControllerSettings,
    /// Logging preferences
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    Json,
    Toml,
}

fn format_of(path: &Path) -> Result<Format, ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => Ok(Format::Json),
        Some("toml") => Ok(Format::Toml),
        other => Err(ConfigError::UnsupportedFormat(
            other.unwrap_or("<none>").to_string(),
        )),
    }
}

fn out_of_range(key: &str, value: impl ToString) -> ConfigError {
    ConfigError::ValueOutOfRange {
        key: key.to_string(),
        value: value.to_string(),
    }
}

impl Config {
    /// Create new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Platform config directory for GrblKit
    pub fn config_dir() -> SettingsResult<PathBuf> {
        let mut path = dirs::config_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| SettingsError::ConfigDirectory("no config or home directory".into()))?;
        path.push("grblkit");
        Ok(path)
    }

    /// Default config file path
    pub fn default_path() -> SettingsResult<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE_NAME))
    }

    /// Load config from file (JSON or TOML)
    pub fn load_from_file(path: &Path) -> SettingsResult<Self> {
        let format = format_of(path)?;
        let content = std::fs::read_to_string(path)?;

        let config: Self = match format {
            Format::Json => serde_json::from_str(&content)?,
            Format::Toml => toml::from_str(&content)?,
        };

        config.validate()?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: &Path) -> SettingsResult<Self> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            tracing::debug!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Save config to file (JSON or TOML)
    pub fn save_to_file(&self, path: &Path) -> SettingsResult<()> {
        self.validate()?;

        let content = match format_of(path)? {
            Format::Json => serde_json::to_string_pretty(self)?,
            Format::Toml => toml::to_string_pretty(self)?,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        tracing::info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let conn = &self.connection;
        if conn.port.trim().is_empty() {
            return Err(ConfigError::MissingKey("connection.port".to_string()));
        }
        if conn.baud_rate == 0 {
            return Err(out_of_range("connection.baud_rate", conn.baud_rate));
        }
        if !(5..=8).contains(&conn.data_bits) {
            return Err(out_of_range("connection.data_bits", conn.data_bits));
        }
        if !(1..=2).contains(&conn.stop_bits) {
            return Err(out_of_range("connection.stop_bits", conn.stop_bits));
        }
        if conn.read_timeout_ms == 0 {
            return Err(out_of_range("connection.read_timeout_ms", 0));
        }

        let ctrl = &self.controller;
        if ctrl.max_in_flight_lines == 0 {
            return Err(out_of_range("controller.max_in_flight_lines", 0));
        }
        if ctrl.queue_size == 0 {
            return Err(out_of_range("controller.queue_size", 0));
        }
        if ctrl.rx_buffer_bytes == Some(0) {
            return Err(out_of_range("controller.rx_buffer_bytes", 0));
        }
        for (key, value) in [
            ("controller.command_timeout_ms", ctrl.command_timeout_ms),
            ("controller.homing_timeout_ms", ctrl.homing_timeout_ms),
            ("controller.probe_timeout_ms", ctrl.probe_timeout_ms),
            ("controller.handshake_timeout_ms", ctrl.handshake_timeout_ms),
        ] {
            if value == 0 {
                return Err(out_of_range(key, value));
            }
        }
        if ctrl.banner_signature.is_empty() {
            return Err(ConfigError::MissingKey(
                "controller.banner_signature".to_string(),
            ));
        }
        if !ctrl.max_spindle_rpm.is_finite() || ctrl.max_spindle_rpm <= 0.0 {
            return Err(out_of_range("controller.max_spindle_rpm", ctrl.max_spindle_rpm));
        }
        if !ctrl.probe_feed.is_finite() || ctrl.probe_feed <= 0.0 {
            return Err(out_of_range("controller.probe_feed", ctrl.probe_feed));
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::MissingKey("logging.level".to_string()));
        }
        Ok(())
    }

    /// Controller configuration for these settings
    pub fn to_controller_config(&self) -> ControllerConfig {
        let conn = &self.connection;
        let ctrl = &self.controller;
        ControllerConfig {
            connection: ConnectionParams {
                port: conn.port.clone(),
                baud_rate: conn.baud_rate,
                data_bits: conn.data_bits,
                stop_bits: conn.stop_bits,
                parity: conn.parity,
                flow_control: conn.flow_control,
                read_timeout_ms: conn.read_timeout_ms,
            },
            poll_interval: Duration::from_millis(ctrl.poll_interval_ms),
            scheduler: CommandSchedulerConfig {
                max_in_flight_lines: ctrl.max_in_flight_lines,
                rx_buffer_bytes: ctrl.rx_buffer_bytes,
                queue_size: ctrl.queue_size,
            },
            command_timeout: Duration::from_millis(ctrl.command_timeout_ms),
            homing_timeout: Duration::from_millis(ctrl.homing_timeout_ms),
            probe_timeout: Duration::from_millis(ctrl.probe_timeout_ms),
            handshake: HandshakeConfig {
                signature: ctrl.banner_signature.clone(),
                settle: Duration::from_millis(ctrl.settle_ms),
                timeout: Duration::from_millis(ctrl.handshake_timeout_ms),
            },
            max_spindle_rpm: ctrl.max_spindle_rpm,
            probe_feed: ctrl.probe_feed,
            ..ControllerConfig::default()
        }
    }
}

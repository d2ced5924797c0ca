//! Configuration management for GivEnergy Local
//!
//! This module handles loading, validation, and management of the application
//! configuration from YAML files.

use crate::error::{GivEnergyError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Inverter connection configuration
    pub device: DeviceConfig,

    /// Polling cycle configuration
    pub polling: PollingConfig,

    /// Read retry configuration
    pub retry: RetryConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// TCP connection parameters for the inverter's data adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Hostname or IP address of the data adapter
    pub host: String,

    /// TCP port (typically 8899)
    pub port: u16,

    /// Serial number sent in every request; any 10 ASCII characters work
    pub adapter_serial: String,

    /// TCP connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Time allowed for a single request/response exchange in milliseconds
    pub request_timeout_ms: u64,
}

/// Polling cycle parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Interval between full refreshes in milliseconds
    pub interval_ms: u64,

    /// Age after which a retained snapshot is reported stale
    pub stale_after_ms: u64,

    /// Number of battery slots to read (slave 0x32 upwards)
    pub battery_slots: u8,

    /// Whether to read holding registers 300-359 (battery pause settings)
    pub read_holding_300: bool,

    /// Full reads per cycle before implausible data fails the cycle
    pub refresh_attempts: u32,

    /// Pause between reads that returned implausible data, in milliseconds
    pub refresh_retry_delay_ms: u64,
}

/// Retry parameters for register reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per bank read, including the first
    pub read_attempts: u32,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    pub level: String,

    /// Path to log file
    pub file: String,

    /// Number of rotated files to keep
    pub backup_count: u32,

    /// Whether to log to console
    pub console_output: bool,

    /// Whether to use JSON format
    pub json_format: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: "192.168.1.100".to_string(),
            port: 8899,
            adapter_serial: "AB1234G567".to_string(),
            connect_timeout_ms: 5000,
            request_timeout_ms: 3000,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            stale_after_ms: 60_000,
            battery_slots: 1,
            read_holding_300: true,
            refresh_attempts: 3,
            refresh_retry_delay_ms: 2000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { read_attempts: 3 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            file: "/tmp/givenergy.log".to_string(),
            backup_count: 5,
            console_output: true,
            json_format: false,
        }
    }
}

/// Most batteries a single inverter addresses
pub const MAX_BATTERY_SLOTS: u8 = 5;

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from the first default location that exists
    pub fn load() -> Result<Self> {
        let default_paths = [
            "givenergy_config.yaml",
            "/data/givenergy_config.yaml",
            "/etc/givenergy/config.yaml",
        ];

        for path in &default_paths {
            if Path::new(path).exists() {
                return Self::from_file(path);
            }
        }

        Ok(Config::default())
    }

    /// Save configuration to a YAML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = serde_yaml::to_string(self)?;
        std::fs::write(path, yaml)?;
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.device.host.is_empty() {
            return Err(GivEnergyError::validation(
                "device.host",
                "Host cannot be empty",
            ));
        }

        if self.device.port == 0 {
            return Err(GivEnergyError::validation(
                "device.port",
                "Port must be greater than 0",
            ));
        }

        if self.device.adapter_serial.len() != 10 || !self.device.adapter_serial.is_ascii() {
            return Err(GivEnergyError::validation(
                "device.adapter_serial",
                "Must be exactly 10 ASCII characters",
            ));
        }

        if self.device.request_timeout_ms == 0 {
            return Err(GivEnergyError::validation(
                "device.request_timeout_ms",
                "Must be greater than 0",
            ));
        }

        if self.polling.interval_ms == 0 {
            return Err(GivEnergyError::validation(
                "polling.interval_ms",
                "Must be greater than 0",
            ));
        }

        if self.polling.battery_slots > MAX_BATTERY_SLOTS {
            return Err(GivEnergyError::validation(
                "polling.battery_slots".to_string(),
                format!("At most {} batteries are supported", MAX_BATTERY_SLOTS),
            ));
        }

        if self.polling.refresh_attempts == 0 {
            return Err(GivEnergyError::validation(
                "polling.refresh_attempts",
                "At least one attempt is required",
            ));
        }

        if self.retry.read_attempts == 0 {
            return Err(GivEnergyError::validation(
                "retry.read_attempts",
                "At least one attempt is required",
            ));
        }

        Ok(())
    }
}

//! Configuration management for X-Slot.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// TPMesh module power mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PowerMode {
    /// Type C duty-cycled low-power mode.
    Low,
    /// Type D always-listening mode.
    Normal,
}

impl PowerMode {
    /// Numeric mode value used by the `AT+LP=` command.
    pub const fn at_mode(self) -> u8 {
        match self {
            Self::Low => 2,
            Self::Normal => 3,
        }
    }
}

impl Default for PowerMode {
    fn default() -> Self {
        Self::Low
    }
}

/// Session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Local node address.
    pub local_addr: u16,

    /// Mesh cell ID (0 = leave the module's current cell untouched).
    #[serde(default)]
    pub cell_id: u8,

    /// Transmit power in dBm, -30..=36 (0 = leave untouched).
    #[serde(default)]
    pub power_dbm: i8,

    /// Wakeup period for duty-cycled reception, in milliseconds.
    #[serde(default)]
    pub wakeup_period_ms: u16,

    /// UART baudrate.
    #[serde(default = "default_baudrate")]
    pub uart_baudrate: u32,

    /// Suggested heartbeat (PING) interval for the host timer.
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_ms: u32,

    /// Node freshness timeout used by the offline sweep.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_ms: u32,

    /// Serial device name, e.g. `/dev/ttyUSB0` or `COM3`.
    pub uart_port: String,

    /// Module power mode applied at start.
    #[serde(default)]
    pub power_mode: PowerMode,
}

fn default_baudrate() -> u32 {
    115_200
}
fn default_heartbeat_interval() -> u32 {
    30_000
}
fn default_heartbeat_timeout() -> u32 {
    90_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            local_addr: crate::types::ADDR_EDGE_MIN,
            cell_id: 0,
            power_dbm: 0,
            wakeup_period_ms: 0,
            uart_baudrate: default_baudrate(),
            heartbeat_interval_ms: default_heartbeat_interval(),
            heartbeat_timeout_ms: default_heartbeat_timeout(),
            uart_port: String::new(),
            power_mode: PowerMode::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content =
            std::fs::read_to_string(path.as_ref()).map_err(|_| Error::InvalidParam)?;
        let config: Self = toml::from_str(&content).map_err(|_| Error::InvalidParam)?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|_| Error::InvalidParam)?;
        std::fs::write(path.as_ref(), content).map_err(|_| Error::InvalidParam)?;
        Ok(())
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.uart_port.is_empty() {
            return Err(Error::InvalidParam);
        }
        if self.uart_baudrate == 0 {
            return Err(Error::InvalidParam);
        }
        if !(-30..=36).contains(&self.power_dbm) {
            return Err(Error::InvalidParam);
        }
        if self.local_addr == crate::types::ADDR_BROADCAST {
            return Err(Error::InvalidParam);
        }
        Ok(())
    }
}

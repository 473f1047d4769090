//! The `bridge.yaml` configuration
//!
//! Everything except the `vehicle` section has a default, so a minimal file
//! only names the gateway, the VIN and the token.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};
use crate::loader::load_yaml;

pub const DEFAULT_CONFIG_FILE: &str = "bridge.yaml";

/// Connection to the vehicle gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleConfig {
    pub base_url: String,
    pub vin: String,
    /// Bearer token, usually `!secret vehicle_token`
    pub token: String,
}

/// Poll intervals, all in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Used while anyone is watching or an automation is in progress
    #[serde(default = "default_refresh_secs")]
    pub refresh_secs: u64,

    /// Used while the vehicle is awake and nobody is watching
    #[serde(default = "default_drive_refresh_secs")]
    pub drive_refresh_secs: u64,

    /// Used once the last capture is older than `slow_refresh_age_secs`
    #[serde(default = "default_slow_refresh_secs")]
    pub slow_refresh_secs: u64,

    #[serde(default = "default_slow_refresh_age_secs")]
    pub slow_refresh_age_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            refresh_secs: default_refresh_secs(),
            drive_refresh_secs: default_drive_refresh_secs(),
            slow_refresh_secs: default_slow_refresh_secs(),
            slow_refresh_age_secs: default_slow_refresh_age_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Age after which an active command is forgotten
    #[serde(default = "default_command_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for CommandsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_command_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HomeConfig {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Enables `/execute.cmd` when set
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            api_key: None,
        }
    }
}

/// A Better Route Planner telemetry credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbrpConfig {
    pub api_key: String,
    pub token: String,
    #[serde(default)]
    pub car_model: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Chat relay receiving `{"text": ...}`; notifications are only logged when unset
    #[serde(default)]
    pub webhook_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub vehicle: VehicleConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub commands: CommandsConfig,

    #[serde(default = "default_battery_capacity_kwh")]
    pub battery_capacity_kwh: f64,

    #[serde(default)]
    pub home: Option<HomeConfig>,

    #[serde(default)]
    pub server: ServerConfig,

    /// Relative paths are resolved against the config directory
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    #[serde(default)]
    pub abrp: Option<AbrpConfig>,

    #[serde(default)]
    pub notify: NotifyConfig,

    #[serde(default)]
    pub charge_limit_webhook: Option<String>,

    #[serde(default)]
    pub csv_log: Option<PathBuf>,
}

fn default_refresh_secs() -> u64 {
    30
}

fn default_drive_refresh_secs() -> u64 {
    60
}

fn default_slow_refresh_secs() -> u64 {
    1800
}

fn default_slow_refresh_age_secs() -> u64 {
    1800
}

fn default_command_timeout_secs() -> u64 {
    120
}

fn default_battery_capacity_kwh() -> f64 {
    58.0
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_storage_dir() -> PathBuf {
    PathBuf::from(".storage")
}

impl BridgeConfig {
    /// Load, resolve tags, parse and validate `file` from `config_dir`
    pub fn load(config_dir: impl AsRef<Path>, file: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let yaml = load_yaml(config_dir, file)?;
        let mut config = Self::from_yaml(yaml)?;

        if config.storage_dir.is_relative() {
            config.storage_dir = config_dir.join(&config.storage_dir);
        }
        if let Some(csv_log) = config.csv_log.as_mut().filter(|p| p.is_relative()) {
            *csv_log = config_dir.join(&*csv_log);
        }

        Ok(config)
    }

    pub fn from_yaml(yaml: Value) -> ConfigResult<Self> {
        if !yaml.is_mapping() {
            return Err(ConfigError::InvalidValue {
                key: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            });
        }

        let config: BridgeConfig =
            serde_yaml::from_value(yaml).map_err(|e| ConfigError::InvalidValue {
                key: "bridge".to_string(),
                reason: e.to_string(),
            })?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let fail = |message: &str| -> ConfigResult<()> {
            Err(ConfigError::ValidationFailed {
                message: message.to_string(),
            })
        };

        if self.vehicle.base_url.trim().is_empty() {
            return fail("vehicle.base_url must not be empty");
        }
        if self.vehicle.vin.trim().is_empty() {
            return fail("vehicle.vin must not be empty");
        }

        let polling = &self.polling;
        if polling.refresh_secs == 0
            || polling.drive_refresh_secs == 0
            || polling.slow_refresh_secs == 0
        {
            return fail("polling intervals must be greater than zero");
        }
        if self.commands.timeout_secs == 0 {
            return fail("commands.timeout_secs must be greater than zero");
        }
        if self.battery_capacity_kwh.is_nan() || self.battery_capacity_kwh <= 0.0 {
            return fail("battery_capacity_kwh must be positive");
        }

        Ok(())
    }
}

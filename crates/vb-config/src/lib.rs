//! Bridge configuration
//!
//! Loads `bridge.yaml` from a config directory. The YAML may use these tags:
//!
//! - `!include path` - include another YAML file
//! - `!secret key` - substitute a value from secrets.yaml
//! - `!env_var VAR [fallback]` - substitute an environment variable
//!
//! # Example
//!
//! ```ignore
//! use vb_config::BridgeConfig;
//!
//! let config = BridgeConfig::load("/etc/vehicle-bridge", "bridge.yaml")?;
//! println!("polling {} every {}s", config.vehicle.vin, config.polling.refresh_secs);
//! ```

mod bridge_config;
mod error;
mod loader;
mod secrets;

pub use bridge_config::{
    AbrpConfig, BridgeConfig, CommandsConfig, HomeConfig, NotifyConfig, PollingConfig,
    ServerConfig, VehicleConfig, DEFAULT_CONFIG_FILE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{load_yaml, ConfigLoader};
pub use secrets::Secrets;

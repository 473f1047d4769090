use std::time::Duration;

use vb_config::BridgeConfig;
use vb_core::GeoPoint;

/// Static engine parameters, fixed for the lifetime of the orchestrator
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub refresh_interval: Duration,
    pub drive_refresh_interval: Duration,
    pub slow_refresh_interval: Duration,
    /// Capture age from which the slow interval is used
    pub slow_refresh_age: Duration,
    pub command_timeout: Duration,
    pub battery_capacity_kwh: f64,
    pub home: Option<GeoPoint>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(30),
            drive_refresh_interval: Duration::from_secs(60),
            slow_refresh_interval: Duration::from_secs(1800),
            slow_refresh_age: Duration::from_secs(1800),
            command_timeout: Duration::from_secs(120),
            battery_capacity_kwh: 58.0,
            home: None,
        }
    }
}

impl From<&BridgeConfig> for EngineSettings {
    fn from(config: &BridgeConfig) -> Self {
        let polling = &config.polling;
        Self {
            refresh_interval: Duration::from_secs(polling.refresh_secs),
            drive_refresh_interval: Duration::from_secs(polling.drive_refresh_secs),
            slow_refresh_interval: Duration::from_secs(polling.slow_refresh_secs),
            slow_refresh_age: Duration::from_secs(polling.slow_refresh_age_secs),
            command_timeout: Duration::from_secs(config.commands.timeout_secs),
            battery_capacity_kwh: config.battery_capacity_kwh,
            home: config
                .home
                .map(|home| GeoPoint::new(home.latitude, home.longitude)),
        }
    }
}

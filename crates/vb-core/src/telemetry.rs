//! Payloads handed to telemetry sinks, the persistent log and subscribers

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client_config::ClientConfig;
use crate::command::ActiveCommand;
use crate::state::VehicleState;

/// One data point for an ABRP-style range prediction service
///
/// `utc` is the vehicle capture time, not the wall clock, so two identical
/// snapshots serialize identically and can be deduplicated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub utc: i64,
    pub soc: f64,
    /// Negative while energy flows into the battery
    pub power: f64,
    pub is_charging: bool,
    pub is_dcfc: bool,
    pub is_parked: bool,
    pub lat: f64,
    pub lon: f64,
    pub est_battery_range: f64,
    pub odometer: f64,
}

impl TelemetryPoint {
    pub fn from_state(state: &VehicleState) -> Self {
        let charging = state.charging.power_kw > 0.0;
        Self {
            utc: state.captured_at().map(|t| t.timestamp()).unwrap_or_default(),
            soc: state.battery.soc_pct,
            power: -state.charging.power_kw,
            is_charging: charging,
            is_dcfc: charging && state.charging.charge_type.eq_ignore_ascii_case("dc"),
            is_parked: !state.body.engine_on,
            lat: state.position.latitude,
            lon: state.position.longitude,
            est_battery_range: state.battery.range_km,
            odometer: state.body.mileage_km,
        }
    }
}

/// Column names written as the header of a new persistent log
pub const LOG_COLUMNS: &[&str] = &[
    "timestamp",
    "soc_pct",
    "range_km",
    "charge_power_kw",
    "charging_state",
    "plug",
    "external_power",
    "climatisation",
    "climatisation_remaining_min",
    "mileage_km",
    "lat",
    "lon",
];

/// A row for the persistent log
///
/// Equality for deduplication ignores the wall-clock timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct LogRow {
    pub timestamp: DateTime<Utc>,
    pub fields: Vec<String>,
}

impl LogRow {
    pub fn from_state(state: &VehicleState, now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now,
            fields: vec![
                state.battery.soc_pct.to_string(),
                state.battery.range_km.to_string(),
                state.charging.power_kw.to_string(),
                state.charging.state.clone(),
                format!("{:?}", state.plug.connection).to_lowercase(),
                format!("{:?}", state.plug.external_power).to_lowercase(),
                state.climatisation.state.clone(),
                state.climatisation.remaining_min.to_string(),
                state.body.mileage_km.to_string(),
                state.position.latitude.to_string(),
                state.position.longitude.to_string(),
            ],
        }
    }

    pub fn same_fields(&self, other: &LogRow) -> bool {
        self.fields == other.fields
    }
}

/// What subscribers receive on every update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdate {
    pub vehicle: Value,
    pub active_commands: HashMap<String, ActiveCommand>,
    pub config: ClientConfig,
    /// True only when this update was caused by a fresh poll
    pub new_data: bool,
    pub online: bool,
    pub battery_cycles: f64,
}

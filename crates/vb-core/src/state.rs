//! Typed view over a repaired vehicle status document
//!
//! The remote service returns a deeply nested JSON document. After repair
//! every path listed in [`paths`] exists, but leaf values may still be `null`
//! when the remote explicitly reported them that way. The typed accessors
//! below fall back to the same defaults the repair skeleton uses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// JSON pointers into the vehicle status document
pub mod paths {
    pub const VIN: &str = "/vin";

    pub const BATTERY_CAPTURED: &str = "/charging/status/battery/carCapturedTimestamp";
    pub const SOC_PCT: &str = "/charging/status/battery/currentSOC_pct";
    pub const RANGE_KM: &str = "/charging/status/battery/cruisingRangeElectric_km";

    pub const CHARGING_CAPTURED: &str = "/charging/status/charging/carCapturedTimestamp";
    pub const CHARGING_STATE: &str = "/charging/status/charging/chargingState";
    pub const CHARGE_TYPE: &str = "/charging/status/charging/chargeType";
    pub const CHARGE_MODE: &str = "/charging/status/charging/chargeMode";
    pub const CHARGE_REMAINING_MIN: &str =
        "/charging/status/charging/remainingChargingTimeToComplete_min";
    pub const CHARGE_POWER_KW: &str = "/charging/status/charging/chargePower_kW";
    pub const CHARGE_RATE_KMPH: &str = "/charging/status/charging/chargeRate_kmph";

    pub const PLUG_CAPTURED: &str = "/charging/status/plug/carCapturedTimestamp";
    pub const PLUG_CONNECTION: &str = "/charging/status/plug/plugConnectionState";
    pub const PLUG_LOCK: &str = "/charging/status/plug/plugLockState";
    pub const EXTERNAL_POWER: &str = "/charging/status/plug/externalPower";

    pub const TARGET_SOC_PCT: &str = "/charging/settings/targetSOC_pct";

    pub const CLIMATE_CAPTURED: &str =
        "/climatisation/data/climatisationStatus/carCapturedTimestamp";
    pub const CLIMATE_REMAINING_MIN: &str =
        "/climatisation/data/climatisationStatus/remainingClimatisationTime_min";
    pub const CLIMATE_STATE: &str = "/climatisation/data/climatisationStatus/climatisationState";
    pub const CLIMATE_TRIGGER: &str =
        "/climatisation/data/climatisationStatus/climatisationTrigger";
    pub const TARGET_TEMPERATURE_C: &str = "/climatisation/settings/targetTemperature_C";

    pub const MILEAGE_KM: &str = "/status/mileage_km";
    pub const ENGINE: &str = "/status/engine";
    pub const DOORS_LOCKED: &str = "/status/doors/locked";
    pub const DOORS_OPEN: &str = "/status/doors/open";
    pub const WINDOWS_OPEN: &str = "/status/windows/open";

    pub const LATITUDE: &str = "/parkingposition/lat";
    pub const LONGITUDE: &str = "/parkingposition/lon";
}

/// Climatisation state reported when the cabin is neither heated nor cooled
pub const CLIMATE_OFF: &str = "off";

/// Climatisation state reported when the vehicle cannot tell
pub const CLIMATE_INVALID: &str = "invalid";

/// Physical connector state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlugConnection {
    Connected,
    Disconnected,
    Unknown,
}

impl PlugConnection {
    fn parse(value: &str) -> Self {
        match value {
            "connected" => PlugConnection::Connected,
            "disconnected" => PlugConnection::Disconnected,
            _ => PlugConnection::Unknown,
        }
    }
}

/// Whether the charging station supplies power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalPower {
    Available,
    Unavailable,
    Unknown,
}

impl ExternalPower {
    fn parse(value: &str) -> Self {
        match value {
            "available" | "ready" | "active" => ExternalPower::Available,
            "unavailable" => ExternalPower::Unavailable,
            _ => ExternalPower::Unknown,
        }
    }
}

/// A WGS84 coordinate
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// True when both axes differ by at most `tolerance` degrees
    pub fn is_near(&self, other: &GeoPoint, tolerance: f64) -> bool {
        (self.latitude - other.latitude).abs() <= tolerance
            && (self.longitude - other.longitude).abs() <= tolerance
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub soc_pct: f64,
    pub range_km: f64,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChargingStatus {
    pub state: String,
    pub charge_type: String,
    pub mode: String,
    pub power_kw: f64,
    pub rate_kmph: f64,
    pub remaining_min: f64,
    pub target_soc_pct: f64,
    pub captured_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlugStatus {
    pub connection: PlugConnection,
    pub lock: String,
    pub external_power: ExternalPower,
    pub captured_at: Option<DateTime<Utc>>,
}

impl PlugStatus {
    pub fn is_connected(&self) -> bool {
        self.connection == PlugConnection::Connected
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClimatisationStatus {
    pub state: String,
    pub trigger: String,
    pub remaining_min: f64,
    pub target_temperature_c: f64,
    pub captured_at: Option<DateTime<Utc>>,
}

impl ClimatisationStatus {
    pub fn is_off(&self) -> bool {
        self.state == CLIMATE_OFF
    }

    /// Off, or a state the vehicle could not determine
    pub fn is_inactive(&self) -> bool {
        self.state == CLIMATE_OFF || self.state == CLIMATE_INVALID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BodyStatus {
    pub engine_on: bool,
    pub doors_locked: Option<bool>,
    pub doors_open: bool,
    pub windows_open: bool,
    pub mileage_km: f64,
}

/// The normalized vehicle snapshot
///
/// Built from a repaired status document. The document itself is kept for
/// broadcasting to subscribers so no vendor field is lost.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VehicleState {
    #[serde(skip)]
    document: Value,
    pub vin: String,
    pub battery: BatteryStatus,
    pub charging: ChargingStatus,
    pub plug: PlugStatus,
    pub climatisation: ClimatisationStatus,
    pub body: BodyStatus,
    pub position: GeoPoint,
}

impl VehicleState {
    /// Build the typed view from a (repaired) status document
    pub fn from_document(document: Value) -> Self {
        let doc = &document;
        Self {
            vin: str_at(doc, paths::VIN, ""),
            battery: BatteryStatus {
                soc_pct: f64_at(doc, paths::SOC_PCT, 0.0),
                range_km: f64_at(doc, paths::RANGE_KM, 0.0),
                captured_at: time_at(doc, paths::BATTERY_CAPTURED),
            },
            charging: ChargingStatus {
                state: str_at(doc, paths::CHARGING_STATE, "unknown"),
                charge_type: str_at(doc, paths::CHARGE_TYPE, "invalid"),
                mode: str_at(doc, paths::CHARGE_MODE, "manual"),
                power_kw: f64_at(doc, paths::CHARGE_POWER_KW, 0.0),
                rate_kmph: f64_at(doc, paths::CHARGE_RATE_KMPH, 0.0),
                remaining_min: f64_at(doc, paths::CHARGE_REMAINING_MIN, 0.0),
                target_soc_pct: f64_at(doc, paths::TARGET_SOC_PCT, 100.0),
                captured_at: time_at(doc, paths::CHARGING_CAPTURED),
            },
            plug: PlugStatus {
                connection: PlugConnection::parse(&str_at(doc, paths::PLUG_CONNECTION, "unknown")),
                lock: str_at(doc, paths::PLUG_LOCK, "unknown"),
                external_power: ExternalPower::parse(&str_at(
                    doc,
                    paths::EXTERNAL_POWER,
                    "unknown",
                )),
                captured_at: time_at(doc, paths::PLUG_CAPTURED),
            },
            climatisation: ClimatisationStatus {
                state: str_at(doc, paths::CLIMATE_STATE, CLIMATE_OFF),
                trigger: str_at(doc, paths::CLIMATE_TRIGGER, "off"),
                remaining_min: f64_at(doc, paths::CLIMATE_REMAINING_MIN, 0.0),
                target_temperature_c: f64_at(doc, paths::TARGET_TEMPERATURE_C, 21.0),
                captured_at: time_at(doc, paths::CLIMATE_CAPTURED),
            },
            body: BodyStatus {
                engine_on: flag_at(doc, paths::ENGINE).unwrap_or(false),
                doors_locked: flag_at(doc, paths::DOORS_LOCKED),
                doors_open: flag_at(doc, paths::DOORS_OPEN).unwrap_or(false),
                windows_open: flag_at(doc, paths::WINDOWS_OPEN).unwrap_or(false),
                mileage_km: f64_at(doc, paths::MILEAGE_KM, 0.0),
            },
            position: GeoPoint::new(
                f64_at(doc, paths::LATITUDE, 0.0),
                f64_at(doc, paths::LONGITUDE, 0.0),
            ),
            document,
        }
    }

    /// The full repaired document
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Most recent capture timestamp across all status groups
    pub fn captured_at(&self) -> Option<DateTime<Utc>> {
        [
            self.battery.captured_at,
            self.charging.captured_at,
            self.plug.captured_at,
            self.climatisation.captured_at,
        ]
        .into_iter()
        .flatten()
        .max()
    }
}

fn f64_at(doc: &Value, pointer: &str, default: f64) -> f64 {
    match doc.pointer(pointer) {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(default),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
        _ => default,
    }
}

fn str_at(doc: &Value, pointer: &str, default: &str) -> String {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or(default)
        .to_string()
}

fn time_at(doc: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    doc.pointer(pointer)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Flags are reported either as booleans or as "on"/"off" style strings
fn flag_at(doc: &Value, pointer: &str) -> Option<bool> {
    match doc.pointer(pointer)? {
        Value::Bool(b) => Some(*b),
        Value::String(s) => match s.as_str() {
            "on" | "true" | "locked" | "open" => Some(true),
            "off" | "false" | "unlocked" | "closed" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

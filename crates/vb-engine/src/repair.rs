//! Normalization of raw status documents
//!
//! The remote service regularly omits whole groups (e.g. no climatisation
//! block while the car sleeps). Repair merges the raw document onto a fixed
//! skeleton so every path the engine reads exists afterwards.

use serde_json::{json, Value};
use tracing::{debug, warn};
use vb_core::state::paths;
use vb_core::VehicleState;

/// Reported target temperatures below this are a known sensor glitch
pub const GLITCH_TEMPERATURE_BELOW_C: f64 = 18.0;

const DEFAULT_TARGET_TEMPERATURE_C: f64 = 21.0;

fn skeleton() -> Value {
    json!({
        "vin": "",
        "charging": {
            "status": {
                "battery": {
                    "carCapturedTimestamp": null,
                    "currentSOC_pct": 0,
                    "cruisingRangeElectric_km": 0
                },
                "charging": {
                    "carCapturedTimestamp": null,
                    "chargingState": "unknown",
                    "chargeType": "invalid",
                    "chargeMode": "manual",
                    "remainingChargingTimeToComplete_min": 0,
                    "chargePower_kW": 0,
                    "chargeRate_kmph": 0
                },
                "plug": {
                    "carCapturedTimestamp": null,
                    "plugConnectionState": "unknown",
                    "plugLockState": "unknown",
                    "externalPower": "unknown"
                }
            },
            "settings": {
                "targetSOC_pct": 100
            }
        },
        "climatisation": {
            "data": {
                "climatisationStatus": {
                    "carCapturedTimestamp": null,
                    "remainingClimatisationTime_min": 0,
                    "climatisationState": "off",
                    "climatisationTrigger": "off"
                }
            },
            "settings": {
                "targetTemperature_C": DEFAULT_TARGET_TEMPERATURE_C
            }
        },
        "status": {
            "mileage_km": 0,
            "engine": "off",
            "doors": {
                "locked": "unknown",
                "open": "closed"
            },
            "windows": {
                "open": "closed"
            }
        },
        "parkingposition": {
            "lat": 0.0,
            "lon": 0.0
        }
    })
}

/// Overlay `raw` onto `base`
///
/// Leaves present in `raw` win, including `null`, `0` and `false`. Where the
/// skeleton expects an object and `raw` has something else, the skeleton is
/// kept so nested paths stay reachable.
fn merge(base: &mut Value, raw: Value) {
    match (base, raw) {
        (Value::Object(base), Value::Object(raw)) => {
            for (key, value) in raw {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Object(_), _) => {}
        (slot, value) => *slot = value,
    }
}

#[derive(Debug, Clone)]
pub struct StateRepairer {
    last_good_temperature: f64,
}

impl Default for StateRepairer {
    fn default() -> Self {
        Self::new()
    }
}

impl StateRepairer {
    pub fn new() -> Self {
        Self {
            last_good_temperature: DEFAULT_TARGET_TEMPERATURE_C,
        }
    }

    pub fn last_good_temperature(&self) -> f64 {
        self.last_good_temperature
    }

    /// JSON pointers guaranteed to exist in every repaired document
    pub fn guaranteed_paths() -> Vec<String> {
        skeleton_leaf_paths()
    }

    /// Produce a complete snapshot from whatever the remote returned
    pub fn repair(&mut self, raw: Value) -> VehicleState {
        let mut document = skeleton();
        match raw {
            Value::Object(_) => merge(&mut document, raw),
            Value::Null => debug!("Empty status document, using defaults"),
            other => warn!(kind = json_kind(&other), "Status document is not an object"),
        }

        self.fix_target_temperature(&mut document);
        VehicleState::from_document(document)
    }

    fn fix_target_temperature(&mut self, document: &mut Value) {
        let Some(slot) = document.pointer_mut(paths::TARGET_TEMPERATURE_C) else {
            return;
        };
        let Some(reported) = slot.as_f64() else {
            return;
        };

        if reported < GLITCH_TEMPERATURE_BELOW_C {
            debug!(
                reported,
                substituted = self.last_good_temperature,
                "Replacing implausible target temperature"
            );
            *slot = json!(self.last_good_temperature);
        } else {
            self.last_good_temperature = reported;
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Every leaf path of the skeleton, as JSON pointers
fn skeleton_leaf_paths() -> Vec<String> {
    fn walk(prefix: String, value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => {
                for (key, child) in map {
                    walk(format!("{}/{}", prefix, key), child, out);
                }
            }
            _ => out.push(prefix),
        }
    }

    let mut out = Vec::new();
    walk(String::new(), &skeleton(), &mut out);
    out
}

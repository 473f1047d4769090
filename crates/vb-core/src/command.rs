//! Outbound remote commands and their bookkeeping

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PolicyError;

pub const ACTION_CHARGING: &str = "charging";
pub const ACTION_CLIMATISATION: &str = "climatisation";

pub const STATE_START: &str = "start";
pub const STATE_STOP: &str = "stop";
pub const STATE_SETTINGS: &str = "settings";

/// Body field carrying the requested cabin temperature
pub const BODY_TARGET_TEMPERATURE: &str = "targetTemperature_C";
/// Body field carrying the requested target state of charge
pub const BODY_TARGET_SOC: &str = "targetSOC_pct";

pub const MIN_TARGET_TEMPERATURE_C: f64 = 16.0;
pub const MAX_TARGET_TEMPERATURE_C: f64 = 30.0;
pub const MIN_TARGET_SOC_PCT: f64 = 50.0;

/// A state-changing request against the vehicle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// What to act on, e.g. "charging" or "climatisation"
    pub action: String,
    /// Desired state, e.g. "start", "stop" or "settings"
    pub state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

impl Command {
    pub fn new(action: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            state: state.into(),
            body: None,
        }
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn start_charging() -> Self {
        Self::new(ACTION_CHARGING, STATE_START)
    }

    pub fn stop_charging() -> Self {
        Self::new(ACTION_CHARGING, STATE_STOP)
    }

    pub fn start_climatisation() -> Self {
        Self::new(ACTION_CLIMATISATION, STATE_START)
    }

    pub fn stop_climatisation() -> Self {
        Self::new(ACTION_CLIMATISATION, STATE_STOP)
    }

    /// Key under which the command is tracked while active
    ///
    /// Settings sub-commands get their own slot so they never shadow a
    /// start/stop of the same action.
    pub fn key(&self) -> String {
        command_key(&self.action, &self.state)
    }

    pub fn is(&self, action: &str, state: &str) -> bool {
        self.action == action && self.state == state
    }

    /// Reject requests the vehicle would refuse or misinterpret
    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.action.trim().is_empty() {
            return Err(PolicyError::EmptyAction);
        }
        if self.state.trim().is_empty() {
            return Err(PolicyError::EmptyState {
                action: self.action.clone(),
            });
        }

        if self.state == STATE_SETTINGS && self.body.is_none() {
            return Err(PolicyError::MissingSettingsBody {
                action: self.action.clone(),
            });
        }

        let Some(body) = &self.body else {
            return Ok(());
        };

        if let Some(value) = body.get(BODY_TARGET_TEMPERATURE) {
            let temperature = value
                .as_f64()
                .ok_or(PolicyError::TargetTemperature(f64::NAN))?;
            if !(MIN_TARGET_TEMPERATURE_C..=MAX_TARGET_TEMPERATURE_C).contains(&temperature) {
                return Err(PolicyError::TargetTemperature(temperature));
            }
        }

        if let Some(value) = body.get(BODY_TARGET_SOC) {
            let soc = value.as_f64().ok_or(PolicyError::TargetSoc(f64::NAN))?;
            if !(MIN_TARGET_SOC_PCT..=100.0).contains(&soc) || soc % 10.0 != 0.0 {
                return Err(PolicyError::TargetSoc(soc));
            }
        }

        Ok(())
    }
}

/// Tracking key for an action/state pair
pub fn command_key(action: &str, state: &str) -> String {
    if state == STATE_SETTINGS {
        format!("{}_{}", action, STATE_SETTINGS)
    } else {
        action.to_string()
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.state)
    }
}

/// A command the remote accepted and whose effect is still pending
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCommand {
    pub issued_at: DateTime<Utc>,
    pub requested_state: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested_body: Option<Value>,
}

impl ActiveCommand {
    pub fn issued(command: &Command, at: DateTime<Utc>) -> Self {
        Self {
            issued_at: at,
            requested_state: command.state.clone(),
            requested_body: command.body.clone(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.issued_at
    }
}

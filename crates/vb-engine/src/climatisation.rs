//! Climatisation keep-alive
//!
//! With `climatisationExtend` set, the engine restarts climatisation as soon
//! as the vehicle's own timer has run out, until the battery gets low or the
//! vehicle arrives home.

use chrono::{DateTime, Utc};
use vb_core::{GeoPoint, VehicleState, STATE_START, STATE_STOP};

/// At or below this SOC the extension switches itself off
pub const EXTEND_MIN_SOC_PCT: f64 = 20.0;

/// Per-axis tolerance in degrees for "at home"
pub const HOME_TOLERANCE_DEG: f64 = 0.002;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtendStop {
    LowBattery,
    ArrivedHome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeeperDecision {
    /// Climatisation is on or its timer has not run out yet
    AlreadyRunning,
    /// A climatisation stop was accepted; the extension ends with it
    StopRequested,
    /// A start was already accepted and has not taken effect yet
    StartPending,
    /// Extension is not requested
    Idle,
    /// Engine is running; skip this cycle without touching the flag
    Suspended,
    /// Clear `climatisationExtend` and persist
    DisableExtend(ExtendStop),
    /// Issue a climatisation start
    Start,
}

/// Minutes left on the vehicle's climatisation timer, corrected for snapshot age
pub fn remaining_minutes(state: &VehicleState, now: DateTime<Utc>) -> f64 {
    let reported = state.climatisation.remaining_min;
    let age_min = state
        .climatisation
        .captured_at
        .map(|captured| (now - captured).num_seconds().max(0) as f64 / 60.0)
        .unwrap_or(0.0);
    (reported - age_min).max(0.0)
}

#[derive(Debug, Clone, Default)]
pub struct ClimatisationKeeper {
    home: Option<GeoPoint>,
}

impl ClimatisationKeeper {
    pub fn new(home: Option<GeoPoint>) -> Self {
        Self { home }
    }

    /// `pending` is the requested state of the active `climatisation` command
    pub fn evaluate(
        &self,
        state: &VehicleState,
        extend: bool,
        pending: Option<&str>,
        now: DateTime<Utc>,
    ) -> KeeperDecision {
        if extend && pending == Some(STATE_STOP) {
            return KeeperDecision::StopRequested;
        }
        if remaining_minutes(state, now) > 0.0 || !state.climatisation.is_off() {
            return KeeperDecision::AlreadyRunning;
        }
        if pending == Some(STATE_START) {
            return KeeperDecision::StartPending;
        }
        if !extend {
            return KeeperDecision::Idle;
        }

        if state.battery.soc_pct <= EXTEND_MIN_SOC_PCT {
            KeeperDecision::DisableExtend(ExtendStop::LowBattery)
        } else if state.body.engine_on {
            KeeperDecision::Suspended
        } else if self
            .home
            .is_some_and(|home| home.is_near(&state.position, HOME_TOLERANCE_DEG))
        {
            KeeperDecision::DisableExtend(ExtendStop::ArrivedHome)
        } else {
            KeeperDecision::Start
        }
    }
}

//! Charging session tracking
//!
//! Classifies every snapshot into one of four phases and reports a session
//! summary whenever a charging session ends.

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use vb_core::{ExternalPower, VehicleState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargingPhase {
    NoExternalPower,
    Unplugged,
    PluggedIdle,
    Charging,
}

impl ChargingPhase {
    /// Numeric code as shown to subscribers
    pub fn code(self) -> i8 {
        match self {
            ChargingPhase::NoExternalPower => -1,
            ChargingPhase::Unplugged => 0,
            ChargingPhase::PluggedIdle => 1,
            ChargingPhase::Charging => 2,
        }
    }

    /// An unknown plug counts as unplugged and unknown power as unavailable
    pub fn classify(state: &VehicleState) -> Self {
        if !state.plug.is_connected() {
            ChargingPhase::Unplugged
        } else if state.plug.external_power != ExternalPower::Available {
            ChargingPhase::NoExternalPower
        } else if state.charging.power_kw > 0.0 {
            ChargingPhase::Charging
        } else {
            ChargingPhase::PluggedIdle
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEndReason {
    Unplugged,
    NoExternalPower,
    ChargingStopped,
}

impl std::fmt::Display for SessionEndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            SessionEndReason::Unplugged => "Unplugged",
            SessionEndReason::NoExternalPower => "No external power",
            SessionEndReason::ChargingStopped => "Charging stopped",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub charged_pct: f64,
    pub charged_kwh: f64,
    pub hours: f64,
    pub avg_kw: f64,
    pub max_kw: f64,
    pub starting_soc_pct: Option<f64>,
    pub ending_soc_pct: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionReport {
    pub reason: SessionEndReason,
    pub stats: SessionStats,
}

#[derive(Debug, Clone, Default)]
struct SessionAccumulator {
    starting_soc: Option<f64>,
    started_at: Option<DateTime<Utc>>,
    max_kw: f64,
}

#[derive(Debug, Clone)]
pub struct ChargingSessionTracker {
    battery_capacity_kwh: f64,
    /// `None` until the first snapshot
    phase: Option<ChargingPhase>,
    session: SessionAccumulator,
}

impl ChargingSessionTracker {
    pub fn new(battery_capacity_kwh: f64) -> Self {
        Self {
            battery_capacity_kwh,
            phase: None,
            session: SessionAccumulator::default(),
        }
    }

    pub fn phase(&self) -> Option<ChargingPhase> {
        self.phase
    }

    pub fn max_kw(&self) -> f64 {
        self.session.max_kw
    }

    /// Feed one snapshot; returns a report when a session just ended
    pub fn observe(&mut self, state: &VehicleState, now: DateTime<Utc>) -> Option<SessionReport> {
        let next = ChargingPhase::classify(state);
        let previous = self.phase.replace(next);
        let soc = state.battery.soc_pct;
        let kw = state.charging.power_kw;

        if previous != Some(next) {
            debug!(from = ?previous, to = ?next, soc, kw, "Charging phase changed");
        }

        match next {
            ChargingPhase::Unplugged => {
                let report = (previous.is_some()
                    && previous != Some(ChargingPhase::Unplugged)
                    && self.session.max_kw != 0.0)
                    .then(|| self.report(SessionEndReason::Unplugged, soc, now));
                self.clear();
                report
            }
            ChargingPhase::NoExternalPower => {
                let report = match previous {
                    Some(prev) if prev != ChargingPhase::NoExternalPower => {
                        self.session = SessionAccumulator {
                            starting_soc: Some(soc),
                            started_at: Some(now),
                            max_kw: 0.0,
                        };
                        Some(self.report(SessionEndReason::NoExternalPower, soc, now))
                    }
                    _ => None,
                };
                self.clear();
                report
            }
            ChargingPhase::Charging => {
                if previous == Some(ChargingPhase::Charging) {
                    self.session.max_kw = self.session.max_kw.max(kw);
                } else {
                    self.session = SessionAccumulator {
                        starting_soc: Some(soc),
                        started_at: Some(now),
                        max_kw: kw,
                    };
                }
                None
            }
            ChargingPhase::PluggedIdle => {
                let report = match previous {
                    Some(ChargingPhase::Charging) => {
                        Some(self.report(SessionEndReason::ChargingStopped, soc, now))
                    }
                    Some(ChargingPhase::NoExternalPower) => {
                        info!(soc, "External power available again");
                        None
                    }
                    _ => None,
                };
                self.clear();
                report
            }
        }
    }

    fn report(&self, reason: SessionEndReason, soc: f64, now: DateTime<Utc>) -> SessionReport {
        let session = &self.session;
        let charged_pct = session.starting_soc.map(|start| soc - start).unwrap_or(0.0);
        let charged_kwh = self.battery_capacity_kwh * charged_pct / 100.0;
        let hours = session
            .started_at
            .map(|start| (now - start).num_milliseconds() as f64 / 3_600_000.0)
            .unwrap_or(0.0);
        let avg_kw = if hours > 0.0 { charged_kwh / hours } else { 0.0 };

        SessionReport {
            reason,
            stats: SessionStats {
                charged_pct,
                charged_kwh,
                hours,
                avg_kw,
                max_kw: session.max_kw,
                starting_soc_pct: session.starting_soc,
                ending_soc_pct: soc,
            },
        }
    }

    fn clear(&mut self) {
        self.session = SessionAccumulator::default();
    }
}

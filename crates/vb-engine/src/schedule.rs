//! Time-of-day start commands
//!
//! Each trigger is ticked once per second with local wall-clock time. When
//! the configured minute comes around it opens a retry window and keeps
//! asking for a start until the vehicle reports the wanted state or the
//! window runs out. An expired window is a missed opportunity, not an error.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Timelike};
use tracing::{debug, info};
use vb_core::{
    ClientConfig, Command, ScheduleTime, VehicleState, ACTION_CHARGING, ACTION_CLIMATISATION,
};

/// About ten minutes at one tick per second
pub const CLIMATISATION_WINDOW_TICKS: u32 = 600;
/// About two hours at one tick per second
pub const CHARGING_WINDOW_TICKS: u32 = 7200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Climatisation,
    Charging,
}

impl ScheduleKind {
    pub fn action(self) -> &'static str {
        match self {
            ScheduleKind::Climatisation => ACTION_CLIMATISATION,
            ScheduleKind::Charging => ACTION_CHARGING,
        }
    }

    fn window_ticks(self) -> u32 {
        match self {
            ScheduleKind::Climatisation => CLIMATISATION_WINDOW_TICKS,
            ScheduleKind::Charging => CHARGING_WINDOW_TICKS,
        }
    }

    fn start_command(self) -> Command {
        match self {
            ScheduleKind::Climatisation => Command::start_climatisation(),
            ScheduleKind::Charging => Command::start_charging(),
        }
    }

    /// Configured time, whether it is a one-off, and whether today is enabled
    fn schedule(self, config: &ClientConfig, now: &NaiveDateTime) -> Option<(ScheduleTime, bool)> {
        match self {
            ScheduleKind::Climatisation => {
                let at = config.climatisation_at?;
                let once = config.climatisation_once;
                (once || config.climatisation_weekdays.contains(now.weekday()))
                    .then_some((at, once))
            }
            ScheduleKind::Charging => config.charging_at.map(|at| (at, config.charging_once)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    pub start: Option<Command>,
    /// The schedule was a one-off and must be cleared and persisted
    pub clear_schedule: bool,
}

#[derive(Debug, Clone)]
pub struct ScheduledActionTrigger {
    kind: ScheduleKind,
    remaining_ticks: u32,
    /// Minute the window was last opened, so it opens once per occurrence
    last_opened: Option<(NaiveDate, u32, u32)>,
}

impl ScheduledActionTrigger {
    pub fn new(kind: ScheduleKind) -> Self {
        Self {
            kind,
            remaining_ticks: 0,
            last_opened: None,
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        self.kind
    }

    pub fn remaining_ticks(&self) -> u32 {
        self.remaining_ticks
    }

    pub fn is_armed(&self) -> bool {
        self.remaining_ticks > 0
    }

    pub fn tick(
        &mut self,
        now: NaiveDateTime,
        config: &ClientConfig,
        state: Option<&VehicleState>,
        command_active: bool,
    ) -> TickOutcome {
        let mut outcome = TickOutcome::default();

        if let Some((at, once)) = self.kind.schedule(config, &now) {
            let minute = (now.date(), now.hour(), now.minute());
            if at.matches(&now) && self.last_opened != Some(minute) {
                self.last_opened = Some(minute);
                self.remaining_ticks = self.kind.window_ticks();
                outcome.clear_schedule = once;
                info!(action = self.kind.action(), at = %at, once, "Scheduled start window opened");
            }
        }

        if self.remaining_ticks == 0 {
            return outcome;
        }
        self.remaining_ticks -= 1;

        if command_active {
            return outcome;
        }
        let Some(state) = state else {
            return outcome;
        };

        let achieved = match self.kind {
            ScheduleKind::Climatisation => !state.climatisation.is_inactive(),
            ScheduleKind::Charging => state.charging.power_kw > 0.0,
        };
        if achieved {
            if self.kind == ScheduleKind::Charging {
                debug!("Vehicle is charging, closing scheduled window");
                self.remaining_ticks = 0;
            }
            return outcome;
        }

        outcome.start = Some(self.kind.start_command());
        outcome
    }
}

//! When to poll next
//!
//! Holds the single poll deadline, the failure backoff and the adaptive
//! interval choice. It does no I/O; the orchestrator sleeps until
//! [`PollScheduler::deadline`] and reports back how the poll went.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::debug;

use crate::settings::EngineSettings;

pub const INITIAL_BACKOFF: Duration = Duration::from_secs(10);
pub const MAX_BACKOFF: Duration = Duration::from_secs(320);
/// Backoff from which a failure streak is announced as "offline"
pub const OFFLINE_THRESHOLD: Duration = Duration::from_secs(160);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Polling,
    Backoff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalKind {
    Refresh,
    Drive,
    Slow,
}

#[derive(Debug, Clone, Copy)]
pub struct PollIntervals {
    pub refresh: Duration,
    pub drive: Duration,
    pub slow: Duration,
    pub slow_age: Duration,
}

impl From<&EngineSettings> for PollIntervals {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            refresh: settings.refresh_interval,
            drive: settings.drive_refresh_interval,
            slow: settings.slow_refresh_interval,
            slow_age: settings.slow_refresh_age,
        }
    }
}

/// What the interval choice depends on
#[derive(Debug, Clone)]
pub struct IntervalInputs {
    pub subscribers: usize,
    pub active_commands: usize,
    pub climatisation_extend: bool,
    pub charge_limit_armed: bool,
    pub charge_power_kw: f64,
    pub plugged_in: bool,
    pub captured_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntervalChoice {
    pub kind: IntervalKind,
    pub interval: Duration,
    /// Slow to drive while unplugged: the vehicle is being used
    pub woke_up: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureAction {
    pub retry_after: Duration,
    /// First time this failure streak crossed the offline threshold
    pub notify_offline: bool,
}

#[derive(Debug)]
pub struct PollScheduler {
    intervals: PollIntervals,
    phase: PollPhase,
    deadline: Option<Instant>,
    backoff: Duration,
    last_kind: Option<IntervalKind>,
    offline_notified: bool,
}

impl PollScheduler {
    pub fn new(intervals: PollIntervals) -> Self {
        Self {
            intervals,
            phase: PollPhase::Idle,
            deadline: None,
            backoff: INITIAL_BACKOFF,
            last_kind: None,
            offline_notified: false,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Delay the next failure would wait
    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    pub fn last_interval(&self) -> Option<Duration> {
        self.last_kind.map(|kind| self.interval_of(kind))
    }

    /// Replace the pending deadline
    pub fn arm(&mut self, after: Duration) {
        self.deadline = Some(Instant::now() + after);
    }

    /// Fire the pending timer now instead of stacking another one
    pub fn request_refresh(&mut self) {
        debug!(phase = ?self.phase, "Manual refresh requested");
        self.deadline = Some(Instant::now());
    }

    pub fn begin_poll(&mut self) {
        self.phase = PollPhase::Polling;
        self.deadline = None;
    }

    /// Returns true when a notified outage just ended
    pub fn on_success(&mut self) -> bool {
        self.phase = PollPhase::Idle;
        self.backoff = INITIAL_BACKOFF;
        std::mem::take(&mut self.offline_notified)
    }

    /// Arms the retry and advances the backoff
    pub fn on_failure(&mut self) -> FailureAction {
        let retry_after = self.backoff;
        self.backoff = (self.backoff * 2).min(MAX_BACKOFF);

        let notify_offline = self.backoff >= OFFLINE_THRESHOLD && !self.offline_notified;
        if notify_offline {
            self.offline_notified = true;
        }

        self.phase = PollPhase::Backoff;
        self.arm(retry_after);
        debug!(retry_after = ?retry_after, next_backoff = ?self.backoff, "Poll failed, backing off");

        FailureAction {
            retry_after,
            notify_offline,
        }
    }

    /// Pick the interval after a successful cycle and remember it
    pub fn select_interval(&mut self, inputs: &IntervalInputs) -> IntervalChoice {
        let quiet = inputs.subscribers == 0
            && inputs.active_commands == 0
            && !inputs.climatisation_extend
            && (!inputs.charge_limit_armed || inputs.charge_power_kw == 0.0);

        let kind = if !quiet {
            IntervalKind::Refresh
        } else if self.is_stale(inputs.captured_at, inputs.now) {
            IntervalKind::Slow
        } else {
            IntervalKind::Drive
        };

        let woke_up = self.last_kind == Some(IntervalKind::Slow)
            && kind == IntervalKind::Drive
            && !inputs.plugged_in;
        self.last_kind = Some(kind);

        IntervalChoice {
            kind,
            interval: self.interval_of(kind),
            woke_up,
        }
    }

    /// Select the next interval and arm it
    pub fn schedule_next(&mut self, inputs: &IntervalInputs) -> IntervalChoice {
        let choice = self.select_interval(inputs);
        self.phase = PollPhase::Idle;
        self.arm(choice.interval);
        choice
    }

    /// A snapshot without capture time is treated as stale
    fn is_stale(&self, captured_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        let Some(captured_at) = captured_at else {
            return true;
        };
        // captures from the future count as fresh
        (now - captured_at)
            .to_std()
            .is_ok_and(|age| age >= self.intervals.slow_age)
    }

    fn interval_of(&self, kind: IntervalKind) -> Duration {
        match kind {
            IntervalKind::Refresh => self.intervals.refresh,
            IntervalKind::Drive => self.intervals.drive,
            IntervalKind::Slow => self.intervals.slow,
        }
    }
}

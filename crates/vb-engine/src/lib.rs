//! Vehicle synchronization and automation engine
//!
//! The [`SyncOrchestrator`] owns every piece of mutable engine state and runs
//! as a single task. It decides when to poll the vehicle service, repairs the
//! returned snapshot, runs the automations (charging session tracking,
//! climatisation keep-alive, one-shot charge limit, scheduled starts) and
//! pushes the result to subscribers and sinks. Outbound commands from every
//! source go through one [`CommandQueue`] so the vehicle never sees two at once.
//!
//! Everything else talks to the engine through an [`EngineHandle`].

mod charge_limit;
mod charging;
mod climatisation;
mod command_queue;
mod error;
mod handle;
mod notice;
mod orchestrator;
mod poll_scheduler;
mod repair;
mod schedule;
mod settings;

pub use charge_limit::{ChargeLimitEnforcer, LimitDecision};
pub use charging::{ChargingPhase, ChargingSessionTracker, SessionEndReason, SessionReport, SessionStats};
pub use climatisation::{
    remaining_minutes, ClimatisationKeeper, ExtendStop, KeeperDecision, EXTEND_MIN_SOC_PCT,
    HOME_TOLERANCE_DEG,
};
pub use command_queue::{ActiveCommands, CommandOutcome, CommandQueue};
pub use error::{EngineError, EngineResult};
pub use handle::EngineHandle;
pub use notice::Notice;
pub use orchestrator::{Collaborators, SyncOrchestrator, MAX_RESYNC_PASSES};
pub use poll_scheduler::{
    FailureAction, IntervalChoice, IntervalInputs, IntervalKind, PollIntervals, PollPhase,
    PollScheduler, INITIAL_BACKOFF, MAX_BACKOFF, OFFLINE_THRESHOLD,
};
pub use repair::{StateRepairer, GLITCH_TEMPERATURE_BELOW_C};
pub use schedule::{
    ScheduleKind, ScheduledActionTrigger, TickOutcome, CHARGING_WINDOW_TICKS,
    CLIMATISATION_WINDOW_TICKS,
};
pub use settings::EngineSettings;

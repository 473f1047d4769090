//! The per-vehicle event loop
//!
//! [`SyncOrchestrator`] owns all mutable engine state and runs as one task:
//! the poll timer, the one-second maintenance tick, command outcomes and
//! handle requests are multiplexed with `tokio::select!`, so state is never
//! touched concurrently and no locks are needed around it.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};
use vb_core::{
    ClientConfig, Command, ConfigStore, LogRow, NotificationSink, PersistentLog, RemoteError,
    StateUpdate, SubscriberTransport, TelemetryPoint, TelemetrySink, VehicleCloudClient,
    VehicleState, Webhook, ACTION_CHARGING, ACTION_CLIMATISATION, STATE_START, STATE_STOP,
};

use crate::charge_limit::{ChargeLimitEnforcer, LimitDecision};
use crate::charging::ChargingSessionTracker;
use crate::climatisation::{ClimatisationKeeper, KeeperDecision};
use crate::command_queue::{ActiveCommands, CommandOutcome, CommandQueue};
use crate::handle::{EngineHandle, EngineRequest};
use crate::notice::{Notice, NoticeSender};
use crate::poll_scheduler::{IntervalInputs, PollIntervals, PollScheduler};
use crate::repair::StateRepairer;
use crate::schedule::{ScheduleKind, ScheduledActionTrigger, TickOutcome};
use crate::settings::EngineSettings;

/// Upper bound on back-to-back re-fetches within one cycle
pub const MAX_RESYNC_PASSES: usize = 3;

const MAINTENANCE_PERIOD: Duration = Duration::from_secs(1);
const REQUEST_CHANNEL_CAPACITY: usize = 32;

/// Event name passed to the charge limit webhook
const CHARGE_LIMIT_EVENT: &str = "charge_limit_reached";

/// External services the engine talks to
#[derive(Clone)]
pub struct Collaborators {
    pub client: Arc<dyn VehicleCloudClient>,
    pub transport: Arc<dyn SubscriberTransport>,
    pub store: Arc<dyn ConfigStore>,
    pub notifier: Arc<dyn NotificationSink>,
    pub telemetry: Option<Arc<dyn TelemetrySink>>,
    pub log: Option<Arc<dyn PersistentLog>>,
    pub charge_limit_webhook: Option<Arc<dyn Webhook>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// Nothing more to do; wait for the next interval
    Continue,
    /// An automation changed the vehicle; fetch again right away
    Resync,
}

pub struct SyncOrchestrator {
    settings: EngineSettings,
    collaborators: Collaborators,
    queue: CommandQueue,
    active: ActiveCommands,
    notices: NoticeSender,

    repairer: StateRepairer,
    tracker: ChargingSessionTracker,
    keeper: ClimatisationKeeper,
    scheduler: PollScheduler,
    climatisation_schedule: ScheduledActionTrigger,
    charging_schedule: ScheduledActionTrigger,

    state: Option<VehicleState>,
    config: ClientConfig,
    online: bool,
    /// Sum of every SOC drop between consecutive snapshots
    discharged_pct: f64,
    last_telemetry: Option<String>,
    last_log_row: Option<LogRow>,

    requests: mpsc::Receiver<EngineRequest>,
    outcomes: mpsc::UnboundedReceiver<CommandOutcome>,
}

impl SyncOrchestrator {
    /// Load the client config, start the command worker and arm the first poll
    pub async fn start(settings: EngineSettings, collaborators: Collaborators) -> (Self, EngineHandle) {
        let config = match collaborators.store.load_client_config().await {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "Could not load client config, using defaults");
                ClientConfig::default()
            }
        };

        let active = ActiveCommands::new();
        let (outcome_tx, outcomes) = mpsc::unbounded_channel();
        let queue = CommandQueue::spawn(collaborators.client.clone(), active.clone(), outcome_tx);
        let (request_tx, requests) = mpsc::channel(REQUEST_CHANNEL_CAPACITY);
        let notices = NoticeSender::spawn(collaborators.notifier.clone());

        let mut scheduler = PollScheduler::new(PollIntervals::from(&settings));
        scheduler.request_refresh();

        let handle = EngineHandle::new(request_tx, queue.clone());
        let orchestrator = Self {
            repairer: StateRepairer::new(),
            tracker: ChargingSessionTracker::new(settings.battery_capacity_kwh),
            keeper: ClimatisationKeeper::new(settings.home),
            scheduler,
            climatisation_schedule: ScheduledActionTrigger::new(ScheduleKind::Climatisation),
            charging_schedule: ScheduledActionTrigger::new(ScheduleKind::Charging),
            state: None,
            config,
            online: false,
            discharged_pct: 0.0,
            last_telemetry: None,
            last_log_row: None,
            settings,
            collaborators,
            queue,
            active,
            notices,
            requests,
            outcomes,
        };

        (orchestrator, handle)
    }

    /// Drive the engine until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            charge_limit = self.config.charge_limit_pct,
            extend = self.config.climatisation_extend,
            "Vehicle sync engine started"
        );

        let mut maintenance = tokio::time::interval(MAINTENANCE_PERIOD);
        maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            let deadline = self.scheduler.deadline();

            tokio::select! {
                _ = wait_until(deadline) => {
                    self.poll_once().await;
                }
                _ = maintenance.tick() => {
                    self.maintenance_tick(Utc::now(), Local::now().naive_local()).await;
                }
                Some(outcome) = self.outcomes.recv() => {
                    self.handle_outcome(outcome).await;
                }
                request = self.requests.recv() => match request {
                    Some(EngineRequest::Shutdown) | None => {
                        info!("Received shutdown signal");
                        break;
                    }
                    Some(request) => self.handle_request(request).await,
                }
            }
        }

        info!("Vehicle sync engine stopped");
    }

    pub fn state(&self) -> Option<&VehicleState> {
        self.state.as_ref()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &PollScheduler {
        &self.scheduler
    }

    pub fn active_commands(&self) -> &ActiveCommands {
        &self.active
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn battery_cycles(&self) -> f64 {
        self.discharged_pct / 100.0
    }

    /// What subscribers get for the current state
    pub fn current_update(&self, new_data: bool) -> Option<StateUpdate> {
        let state = self.state.as_ref()?;
        Some(StateUpdate {
            vehicle: state.document().clone(),
            active_commands: self.active.snapshot(),
            config: self.config.clone(),
            new_data,
            online: self.online,
            battery_cycles: self.battery_cycles(),
        })
    }

    /// One poll cycle, including any immediate re-fetches it triggers
    pub async fn poll_once(&mut self) {
        for pass in 0..MAX_RESYNC_PASSES {
            self.scheduler.begin_poll();

            let raw = match self.collaborators.client.fetch_status().await {
                Ok(raw) => raw,
                Err(err) => {
                    self.handle_poll_failure(err);
                    return;
                }
            };

            if self.scheduler.on_success() {
                self.notify(Notice::Online);
            }
            self.online = true;

            match self.synchronize(raw, Utc::now()).await {
                CycleOutcome::Continue => {
                    self.schedule_next(Utc::now());
                    return;
                }
                CycleOutcome::Resync => debug!(pass, "Re-synchronizing immediately"),
            }
        }

        warn!(
            passes = MAX_RESYNC_PASSES,
            "Resync limit reached, waiting for the regular interval"
        );
        self.schedule_next(Utc::now());
    }

    fn handle_poll_failure(&mut self, err: RemoteError) {
        warn!(error = %err, "Vehicle status poll failed");
        self.online = false;
        self.collaborators
            .transport
            .broadcast_problem(&format!("Vehicle status unavailable: {}", err));

        let action = self.scheduler.on_failure();
        if action.notify_offline {
            self.notify(Notice::Offline);
        }
    }

    async fn synchronize(&mut self, raw: serde_json::Value, now: DateTime<Utc>) -> CycleOutcome {
        // outcomes that arrived during the fetch go first
        self.drain_outcomes().await;
        let state = self.repairer.repair(raw);

        if let Some(previous) = &self.state {
            let drop = previous.battery.soc_pct - state.battery.soc_pct;
            if drop > 0.0 {
                self.discharged_pct += drop;
            }
        }

        let session = self.tracker.observe(&state, now);
        self.state = Some(state.clone());
        if let Some(report) = session {
            self.notify(Notice::SessionEnded(report));
        }

        self.broadcast(true);

        if self.run_keeper(&state, now).await == CycleOutcome::Resync {
            return CycleOutcome::Resync;
        }
        if self.run_charge_limit(&state).await == CycleOutcome::Resync {
            return CycleOutcome::Resync;
        }

        self.push_telemetry(&state).await;
        self.append_log(&state, now).await;

        CycleOutcome::Continue
    }

    async fn run_keeper(&mut self, state: &VehicleState, now: DateTime<Utc>) -> CycleOutcome {
        let pending = self
            .active
            .get(ACTION_CLIMATISATION)
            .map(|command| command.requested_state);

        match self.keeper.evaluate(
            state,
            self.config.climatisation_extend,
            pending.as_deref(),
            now,
        ) {
            KeeperDecision::StopRequested => {
                info!("Climatisation stop accepted, clearing extension");
                self.config.climatisation_extend = false;
                self.persist_config().await;
                self.broadcast(false);
            }
            KeeperDecision::DisableExtend(reason) => {
                info!(reason = ?reason, soc = state.battery.soc_pct, "Disabling climatisation extension");
                self.config.climatisation_extend = false;
                self.persist_config().await;
                self.broadcast(false);
                self.notify(Notice::ExtendDisabled {
                    reason,
                    soc_pct: state.battery.soc_pct,
                });
            }
            KeeperDecision::Start => {
                info!(soc = state.battery.soc_pct, "Extending climatisation");
                if self.queue.submit(Command::start_climatisation()).await {
                    return CycleOutcome::Resync;
                }
            }
            KeeperDecision::Suspended => debug!("Engine running, climatisation extension suspended"),
            decision => trace!(decision = ?decision, "Climatisation keeper idle"),
        }

        CycleOutcome::Continue
    }

    async fn run_charge_limit(&mut self, state: &VehicleState) -> CycleOutcome {
        let stop_pending = self.active.is_active_with_state(ACTION_CHARGING, STATE_STOP);

        let LimitDecision::Reached { dispatch_stop } =
            ChargeLimitEnforcer::evaluate(&self.config, state, stop_pending)
        else {
            return CycleOutcome::Continue;
        };

        let limit_pct = self.config.charge_limit_pct;
        let soc_pct = state.battery.soc_pct;
        info!(soc = soc_pct, limit = limit_pct, dispatch_stop, "Charge limit reached");

        if dispatch_stop {
            if let Some(webhook) = &self.collaborators.charge_limit_webhook {
                let payload = json!({"event": CHARGE_LIMIT_EVENT, "soc": soc_pct, "limit": limit_pct});
                if let Err(e) = webhook.call(CHARGE_LIMIT_EVENT, &payload).await {
                    debug!(error = %e, "Charge limit webhook failed");
                }
            }
            self.notify(Notice::ChargeLimitReached { soc_pct, limit_pct });
            self.queue.submit(Command::stop_charging()).await;
        }

        self.config.disarm_charge_limit();
        self.persist_config().await;
        CycleOutcome::Resync
    }

    async fn push_telemetry(&mut self, state: &VehicleState) {
        let Some(sink) = &self.collaborators.telemetry else {
            return;
        };

        let point = TelemetryPoint::from_state(state);
        let serialized = match serde_json::to_string(&point) {
            Ok(serialized) => serialized,
            Err(e) => {
                debug!(error = %e, "Could not serialize telemetry point");
                return;
            }
        };
        if self.last_telemetry.as_deref() == Some(serialized.as_str()) {
            trace!("Telemetry unchanged, skipping push");
            return;
        }

        match sink.push(&point).await {
            Ok(()) => self.last_telemetry = Some(serialized),
            Err(e) => debug!(error = %e, "Telemetry push failed"),
        }
    }

    async fn append_log(&mut self, state: &VehicleState, now: DateTime<Utc>) {
        let Some(log) = &self.collaborators.log else {
            return;
        };

        let row = LogRow::from_state(state, now);
        if self
            .last_log_row
            .as_ref()
            .is_some_and(|last| last.same_fields(&row))
        {
            trace!("Log row unchanged, skipping");
            return;
        }

        match log.append_row(&row).await {
            Ok(()) => self.last_log_row = Some(row),
            Err(e) => debug!(error = %e, "Could not append log row"),
        }
    }

    fn schedule_next(&mut self, now: DateTime<Utc>) {
        let Some(state) = &self.state else {
            self.scheduler.arm(self.settings.refresh_interval);
            return;
        };

        let inputs = IntervalInputs {
            subscribers: self.collaborators.transport.subscriber_count(),
            active_commands: self.active.len(),
            climatisation_extend: self.config.climatisation_extend,
            charge_limit_armed: self.config.charge_limit_armed(),
            charge_power_kw: state.charging.power_kw,
            plugged_in: state.plug.is_connected(),
            captured_at: state.captured_at(),
            now,
        };

        let choice = self.scheduler.schedule_next(&inputs);
        debug!(kind = ?choice.kind, interval = ?choice.interval, "Next poll scheduled");

        if choice.woke_up {
            self.notify(Notice::WokeUp);
        }
    }

    /// Expire stale commands and run the time-of-day schedules
    pub async fn maintenance_tick(&mut self, now: DateTime<Utc>, local: NaiveDateTime) {
        let expired = self.active.sweep(now, self.settings.command_timeout);
        for (key, command) in &expired {
            debug!(key = %key, state = %command.requested_state, "Active command expired");

            let climate_still_off = self
                .state
                .as_ref()
                .is_some_and(|state| state.climatisation.is_off());
            if key == ACTION_CLIMATISATION && command.requested_state == STATE_START && climate_still_off {
                warn!("Climatisation start expired without effect");
                self.notify(Notice::ClimatisationFailed);
            }
        }
        if !expired.is_empty() {
            self.broadcast(false);
        }

        let outcome = self.climatisation_schedule.tick(
            local,
            &self.config,
            self.state.as_ref(),
            self.command_in_progress(ACTION_CLIMATISATION),
        );
        self.apply_schedule(ScheduleKind::Climatisation, outcome).await;

        let outcome = self.charging_schedule.tick(
            local,
            &self.config,
            self.state.as_ref(),
            self.command_in_progress(ACTION_CHARGING),
        );
        self.apply_schedule(ScheduleKind::Charging, outcome).await;
    }

    async fn apply_schedule(&mut self, kind: ScheduleKind, outcome: TickOutcome) {
        if outcome.clear_schedule {
            match kind {
                ScheduleKind::Climatisation => self.config.climatisation_at = None,
                ScheduleKind::Charging => self.config.charging_at = None,
            }
            self.persist_config().await;
            self.broadcast(false);
        }

        if let Some(command) = outcome.start {
            info!(command = %command, "Issuing scheduled start");
            self.queue.dispatch(command);
        }
    }

    fn command_in_progress(&self, key: &str) -> bool {
        self.active.is_active(key) || self.queue.is_pending(key)
    }

    async fn handle_outcome(&mut self, outcome: CommandOutcome) {
        match outcome {
            CommandOutcome::Completed { command } => {
                if command.is(ACTION_CLIMATISATION, STATE_STOP) && self.config.climatisation_extend {
                    info!("Climatisation stopped, clearing extension");
                    self.config.climatisation_extend = false;
                    self.persist_config().await;
                }
                self.broadcast(false);
            }
            CommandOutcome::Failed { command, error } => {
                self.collaborators
                    .transport
                    .broadcast_problem(&format!("Command {} failed: {}", command, error));
            }
        }
    }

    /// Drain command outcomes that are already waiting
    pub async fn drain_outcomes(&mut self) {
        while let Ok(outcome) = self.outcomes.try_recv() {
            self.handle_outcome(outcome).await;
        }
    }

    async fn handle_request(&mut self, request: EngineRequest) {
        match request {
            EngineRequest::ManualRefresh => self.scheduler.request_refresh(),
            EngineRequest::UpdateConfig { config, reply } => {
                let needs_refresh = config.charge_limit_pct != self.config.charge_limit_pct
                    || config.climatisation_extend != self.config.climatisation_extend;
                self.config = config;
                self.persist_config().await;
                self.broadcast(false);
                if needs_refresh {
                    self.scheduler.request_refresh();
                }
                let _ = reply.send(());
            }
            EngineRequest::SetChargeLimit { pct, reply } => {
                info!(limit = pct, "Charge limit set");
                self.config.charge_limit_pct = pct;
                self.persist_config().await;
                self.broadcast(false);
                self.scheduler.request_refresh();
                let _ = reply.send(());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.current_update(false));
            }
            EngineRequest::ClientConfig { reply } => {
                let _ = reply.send(self.config.clone());
            }
            EngineRequest::Shutdown => {}
        }
    }

    fn broadcast(&self, new_data: bool) {
        if let Some(update) = self.current_update(new_data) {
            self.collaborators.transport.broadcast(&update);
        }
    }

    async fn persist_config(&self) {
        if let Err(e) = self.collaborators.store.save_client_config(&self.config).await {
            warn!(error = %e, "Failed to persist client config");
        }
    }

    fn notify(&self, notice: Notice) {
        self.notices.send(notice);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

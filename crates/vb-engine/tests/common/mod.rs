//! Test doubles for the engine's collaborators
//!
//! Every mock records what it received so tests can assert on it after
//! driving the orchestrator directly.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use vb_core::{
    ClientConfig, Command, ConfigStore, LogRow, NotificationSink, PersistentLog, RemoteError,
    SinkError, StateUpdate, StoreError, SubscriberTransport, TelemetryPoint, TelemetrySink,
    VehicleCloudClient, Webhook,
};
use vb_engine::{Collaborators, EngineHandle, EngineSettings, SyncOrchestrator};

/// Scripted vehicle service
///
/// Fetches pop scripted results; once the script is empty the last
/// successful status is served again.
#[derive(Default)]
pub struct MockCloudClient {
    script: Mutex<VecDeque<Result<Value, RemoteError>>>,
    last_status: Mutex<Option<Value>>,
    fetches: AtomicUsize,
    commands: Mutex<Vec<Command>>,
    command_delay: Mutex<Duration>,
    command_failure: Mutex<Option<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockCloudClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_status(&self, status: Value) {
        self.script.lock().unwrap().push_back(Ok(status));
    }

    pub fn push_failure(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(RemoteError::new(message)));
    }

    pub fn set_command_delay(&self, delay: Duration) {
        *self.command_delay.lock().unwrap() = delay;
    }

    pub fn fail_commands(&self, message: &str) {
        *self.command_failure.lock().unwrap() = Some(message.to_string());
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VehicleCloudClient for MockCloudClient {
    async fn fetch_status(&self) -> Result<Value, RemoteError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Ok(status)) => {
                *self.last_status.lock().unwrap() = Some(status.clone());
                Ok(status)
            }
            Some(Err(e)) => Err(e),
            None => self
                .last_status
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| RemoteError::new("no status scripted")),
        }
    }

    async fn send_command(&self, command: &Command) -> Result<(), RemoteError> {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(running, Ordering::SeqCst);

        let delay = *self.command_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        self.commands.lock().unwrap().push(command.clone());
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.command_failure.lock().unwrap().clone() {
            Some(message) => Err(RemoteError::new(message)),
            None => Ok(()),
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    texts: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

impl RecordingNotifier {
    /// Every delivery takes `delay` before it is recorded
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.texts().iter().filter(|t| t.contains(needle)).count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.texts.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTelemetry {
    points: Mutex<Vec<TelemetryPoint>>,
}

impl RecordingTelemetry {
    pub fn len(&self) -> usize {
        self.points.lock().unwrap().len()
    }
}

#[async_trait]
impl TelemetrySink for RecordingTelemetry {
    async fn push(&self, point: &TelemetryPoint) -> Result<(), SinkError> {
        self.points.lock().unwrap().push(point.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingLog {
    rows: Mutex<Vec<LogRow>>,
}

impl RecordingLog {
    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }
}

#[async_trait]
impl PersistentLog for RecordingLog {
    async fn append_row(&self, row: &LogRow) -> Result<(), SinkError> {
        self.rows.lock().unwrap().push(row.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingWebhook {
    calls: Mutex<Vec<(String, Value)>>,
}

impl RecordingWebhook {
    pub fn calls(&self) -> Vec<(String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Webhook for RecordingWebhook {
    async fn call(&self, event: &str, payload: &Value) -> Result<(), SinkError> {
        self.calls
            .lock()
            .unwrap()
            .push((event.to_string(), payload.clone()));
        Ok(())
    }
}

/// Config store kept in memory
#[derive(Default)]
pub struct MemoryConfigStore {
    config: Mutex<Option<ClientConfig>>,
    saves: AtomicUsize,
}

impl MemoryConfigStore {
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            saves: AtomicUsize::new(0),
        }
    }

    pub fn saved(&self) -> Option<ClientConfig> {
        self.config.lock().unwrap().clone()
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn load_client_config(&self) -> Result<ClientConfig, StoreError> {
        Ok(self.config.lock().unwrap().clone().unwrap_or_default())
    }

    async fn save_client_config(&self, config: &ClientConfig) -> Result<(), StoreError> {
        *self.config.lock().unwrap() = Some(config.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingTransport {
    subscribers: AtomicUsize,
    updates: Mutex<Vec<StateUpdate>>,
    problems: Mutex<Vec<String>>,
}

impl RecordingTransport {
    pub fn set_subscribers(&self, count: usize) {
        self.subscribers.store(count, Ordering::SeqCst);
    }

    pub fn updates(&self) -> Vec<StateUpdate> {
        self.updates.lock().unwrap().clone()
    }

    pub fn problems(&self) -> Vec<String> {
        self.problems.lock().unwrap().clone()
    }
}

impl SubscriberTransport for RecordingTransport {
    fn broadcast(&self, update: &StateUpdate) {
        self.updates.lock().unwrap().push(update.clone());
    }

    fn broadcast_problem(&self, text: &str) {
        self.problems.lock().unwrap().push(text.to_string());
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.load(Ordering::SeqCst)
    }
}

/// An orchestrator wired to recording mocks
pub struct TestEngine {
    pub orchestrator: SyncOrchestrator,
    pub handle: EngineHandle,
    pub client: Arc<MockCloudClient>,
    pub transport: Arc<RecordingTransport>,
    pub store: Arc<MemoryConfigStore>,
    pub notifier: Arc<RecordingNotifier>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub log: Arc<RecordingLog>,
    pub webhook: Arc<RecordingWebhook>,
}

impl TestEngine {
    pub async fn start(config: ClientConfig) -> Self {
        Self::start_with(EngineSettings::default(), config).await
    }

    pub async fn start_with(settings: EngineSettings, config: ClientConfig) -> Self {
        let client = MockCloudClient::new();
        let transport = Arc::new(RecordingTransport::default());
        let store = Arc::new(MemoryConfigStore::with_config(config));
        let notifier = Arc::new(RecordingNotifier::default());
        let telemetry = Arc::new(RecordingTelemetry::default());
        let log = Arc::new(RecordingLog::default());
        let webhook = Arc::new(RecordingWebhook::default());

        let collaborators = Collaborators {
            client: client.clone(),
            transport: transport.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            telemetry: Some(telemetry.clone()),
            log: Some(log.clone()),
            charge_limit_webhook: Some(webhook.clone()),
        };
        let (orchestrator, handle) = SyncOrchestrator::start(settings, collaborators).await;

        Self {
            orchestrator,
            handle,
            client,
            transport,
            store,
            notifier,
            telemetry,
            log,
            webhook,
        }
    }
}

/// A status document captured at `captured_at`
pub fn status(captured_at: DateTime<Utc>, soc: f64, power_kw: f64, plug: &str) -> Value {
    let ts = captured_at.to_rfc3339();
    json!({
        "vin": "WVWZZZTESTVIN0001",
        "charging": {
            "status": {
                "battery": {"carCapturedTimestamp": ts, "currentSOC_pct": soc, "cruisingRangeElectric_km": 250},
                "charging": {"carCapturedTimestamp": ts, "chargingState": if power_kw > 0.0 { "charging" } else { "readyForCharging" }, "chargePower_kW": power_kw},
                "plug": {"carCapturedTimestamp": ts, "plugConnectionState": plug, "plugLockState": "locked", "externalPower": "available"}
            }
        },
        "climatisation": {
            "data": {"climatisationStatus": {"carCapturedTimestamp": ts, "climatisationState": "off", "remainingClimatisationTime_min": 0}},
            "settings": {"targetTemperature_C": 21.0}
        }
    })
}

/// Let the command and notification workers finish anything queued
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

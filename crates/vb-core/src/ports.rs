//! Interfaces of the collaborators the engine talks to
//!
//! Everything vendor or transport specific lives behind these traits so the
//! engine can be driven by mocks in tests and by HTTP adapters in the server.

use async_trait::async_trait;
use serde_json::Value;

use crate::client_config::ClientConfig;
use crate::command::Command;
use crate::error::{RemoteError, SinkError, StoreError};
use crate::telemetry::{LogRow, StateUpdate, TelemetryPoint};

/// The remote vehicle service
#[async_trait]
pub trait VehicleCloudClient: Send + Sync {
    /// Fetch the raw, possibly partial, status document
    async fn fetch_status(&self) -> Result<Value, RemoteError>;

    /// Ask the vehicle to change state
    async fn send_command(&self, command: &Command) -> Result<(), RemoteError>;
}

/// Best-effort human readable notifications (chat relay, push, ...)
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, text: &str) -> Result<(), SinkError>;
}

/// Third-party telemetry ingestion
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn push(&self, point: &TelemetryPoint) -> Result<(), SinkError>;
}

/// Append-only history of snapshots
#[async_trait]
pub trait PersistentLog: Send + Sync {
    async fn append_row(&self, row: &LogRow) -> Result<(), SinkError>;
}

/// External hook invoked before an automated action, e.g. the charge limit stop
#[async_trait]
pub trait Webhook: Send + Sync {
    async fn call(&self, event: &str, payload: &Value) -> Result<(), SinkError>;
}

/// Persistence of the user policy
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn load_client_config(&self) -> Result<ClientConfig, StoreError>;

    async fn save_client_config(&self, config: &ClientConfig) -> Result<(), StoreError>;
}

/// Live subscriber fan-out
pub trait SubscriberTransport: Send + Sync {
    fn broadcast(&self, update: &StateUpdate);

    fn broadcast_problem(&self, text: &str);

    /// Number of currently connected subscribers
    fn subscriber_count(&self) -> usize;
}

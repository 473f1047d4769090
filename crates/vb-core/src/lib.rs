//! Core types for the vehicle bridge
//!
//! This crate provides the types shared by every other crate in the
//! workspace: the typed [`VehicleState`] view, outbound [`Command`]s and
//! their [`ActiveCommand`] bookkeeping, the user policy [`ClientConfig`],
//! payloads for subscribers and sinks, and the collaborator traits the
//! engine is written against.

mod client_config;
mod command;
mod error;
pub mod ports;
pub mod state;
mod telemetry;

pub use client_config::{ClientConfig, ScheduleTime, WeekdayMask, CHARGE_LIMIT_DISABLED};
pub use command::{
    command_key, ActiveCommand, Command, ACTION_CHARGING, ACTION_CLIMATISATION,
    BODY_TARGET_SOC, BODY_TARGET_TEMPERATURE, STATE_SETTINGS, STATE_START, STATE_STOP,
};
pub use error::{PolicyError, RemoteError, SinkError, StoreError};
pub use ports::{
    ConfigStore, NotificationSink, PersistentLog, SubscriberTransport, TelemetrySink,
    VehicleCloudClient, Webhook,
};
pub use state::{
    ExternalPower, GeoPoint, PlugConnection, VehicleState, CLIMATE_INVALID, CLIMATE_OFF,
};
pub use telemetry::{LogRow, StateUpdate, TelemetryPoint, LOG_COLUMNS};

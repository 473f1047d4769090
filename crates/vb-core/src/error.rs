//! Error types shared by the engine and its collaborators

use thiserror::Error;

/// A failed call against the remote vehicle service
///
/// Opaque on purpose: polling treats any failure as transient and commands
/// surface it once without inspecting the cause.
#[derive(Debug, Clone, Error)]
#[error("remote vehicle service: {message}")]
pub struct RemoteError {
    pub message: String,
}

impl RemoteError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Delivery failure of a notification, telemetry push, log row or webhook
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Failure to load or persist the client configuration
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("config store unavailable: {0}")]
    Unavailable(String),

    #[error("stored client config is invalid: {0}")]
    Invalid(String),
}

/// A request rejected before it reaches the vehicle
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("command action must not be empty")]
    EmptyAction,

    #[error("command state for '{action}' must not be empty")]
    EmptyState { action: String },

    #[error("settings command for '{action}' requires a body")]
    MissingSettingsBody { action: String },

    #[error("target temperature {0} °C is out of range")]
    TargetTemperature(f64),

    #[error("target state of charge {0}% is not allowed")]
    TargetSoc(f64),

    #[error("charge limit {0}% must be between 1 and 100")]
    ChargeLimit(u8),

    #[error("invalid schedule time '{0}', expected HH:MM")]
    ScheduleTime(String),
}

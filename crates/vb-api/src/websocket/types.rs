//! WebSocket message types

use serde::{Deserialize, Serialize};
use vb_core::ClientConfig;
use vb_event_bus::BusMessage;

/// Incoming message from a subscriber
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IncomingMessage {
    Command {
        #[serde(default)]
        id: Option<u64>,
        action: String,
        state: String,
        #[serde(default)]
        body: Option<serde_json::Value>,
    },
    /// Ask for a fresh poll
    Update,
    SetChargeLimit {
        #[serde(default)]
        id: Option<u64>,
        charge_limit_pct: u8,
    },
    Config {
        #[serde(default)]
        id: Option<u64>,
        config: ClientConfig,
    },
}

/// Outgoing message to a subscriber
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum OutgoingMessage {
    Bus(BusMessage),
    Result(ResultMessage),
}

#[derive(Debug, Serialize)]
pub struct ResultMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    #[serde(rename = "type")]
    pub msg_type: &'static str,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
}

impl ResultMessage {
    pub fn success(id: Option<u64>, success: bool) -> Self {
        Self {
            id,
            msg_type: "result",
            success,
            error: None,
        }
    }

    pub fn error(id: Option<u64>, code: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            msg_type: "result",
            success: false,
            error: Some(ErrorInfo {
                code: code.to_string(),
                message: message.into(),
            }),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

//! WebSocket connection handling
//!
//! Each connection holds one hub subscription for its whole lifetime, which
//! is what makes it count as a live subscriber for the poll interval choice.

use axum::extract::ws::{Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use vb_core::Command;
use vb_engine::EngineError;
use vb_event_bus::BusMessage;

use crate::AppState;

use super::types::{IncomingMessage, OutgoingMessage, ResultMessage};

const OUTBOUND_CAPACITY: usize = 64;

pub async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.hub.subscribe();
    let subscriber = subscription.id();
    info!(subscriber = %subscriber, "WebSocket subscriber connected");

    if let Some(update) = state.hub.latest() {
        let greeting = OutgoingMessage::Bus(BusMessage::Update { update });
        if let Err(e) = send_message(&mut sender, &greeting).await {
            warn!(subscriber = %subscriber, error = %e, "Failed to send initial state");
            return;
        }
    }
    if let Err(e) = state.handle.request_manual_refresh().await {
        debug!(error = %e, "Connect-time refresh not possible");
    }

    let (tx, mut rx) = mpsc::channel::<OutgoingMessage>(OUTBOUND_CAPACITY);

    let send_task = tokio::spawn(async move {
        loop {
            let outgoing = tokio::select! {
                message = subscription.recv() => match message {
                    Some(message) => OutgoingMessage::Bus(message),
                    None => break,
                },
                reply = rx.recv() => match reply {
                    Some(reply) => reply,
                    None => break,
                },
            };
            if send_message(&mut sender, &outgoing).await.is_err() {
                break;
            }
        }
    });

    while let Some(result) = receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if let Some(reply) = handle_message(&state, &text).await {
                    if tx.send(reply).await.is_err() {
                        break;
                    }
                }
            }
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(subscriber = %subscriber, error = %e, "WebSocket error");
                break;
            }
        }
    }

    send_task.abort();
    info!(subscriber = %subscriber, "WebSocket subscriber disconnected");
}

/// Run one inbound message; returns the reply to send, if any
pub(crate) async fn handle_message(state: &AppState, text: &str) -> Option<OutgoingMessage> {
    let message = match serde_json::from_str::<IncomingMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!(error = %e, "Unparseable WebSocket message");
            return Some(OutgoingMessage::Result(ResultMessage::error(
                None,
                "invalid_format",
                e.to_string(),
            )));
        }
    };

    let reply = match message {
        IncomingMessage::Command {
            id,
            action,
            state: wanted,
            body,
        } => {
            let mut command = Command::new(action, wanted);
            command.body = body;
            match state.handle.request_command(command).await {
                Ok(success) => ResultMessage::success(id, success),
                Err(e) => error_result(id, e),
            }
        }
        IncomingMessage::Update => {
            if let Err(e) = state.handle.request_manual_refresh().await {
                debug!(error = %e, "Refresh request dropped");
            }
            return None;
        }
        IncomingMessage::SetChargeLimit {
            id,
            charge_limit_pct,
        } => match state.handle.set_charge_limit(charge_limit_pct).await {
            Ok(()) => ResultMessage::success(id, true),
            Err(e) => error_result(id, e),
        },
        IncomingMessage::Config { id, config } => {
            match state.handle.request_config_update(config).await {
                Ok(()) => ResultMessage::success(id, true),
                Err(e) => error_result(id, e),
            }
        }
    };

    Some(OutgoingMessage::Result(reply))
}

fn error_result(id: Option<u64>, error: EngineError) -> ResultMessage {
    let code = match error {
        EngineError::Policy(_) => "invalid_request",
        EngineError::Stopped => "engine_stopped",
    };
    ResultMessage::error(id, code, error.to_string())
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    msg: &OutgoingMessage,
) -> Result<(), String> {
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    sender
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

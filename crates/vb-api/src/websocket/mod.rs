//! Live subscriber WebSocket
//!
//! A connection first receives the latest state (if any) and triggers a
//! refresh; after that it gets every `update` and `problem` the engine
//! broadcasts. Inbound messages map onto the engine handle.

mod connection;
mod types;

use axum::{
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
};

use crate::AppState;

pub(crate) use connection::handle_message;
pub use types::{ErrorInfo, IncomingMessage, OutgoingMessage, ResultMessage};

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_socket(socket, state))
}

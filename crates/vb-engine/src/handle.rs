use std::collections::HashMap;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;
use vb_core::{ActiveCommand, ClientConfig, Command, PolicyError, StateUpdate, CHARGE_LIMIT_DISABLED};

use crate::command_queue::CommandQueue;
use crate::error::{EngineError, EngineResult};

/// Requests the orchestrator serves between cycles
#[derive(Debug)]
pub(crate) enum EngineRequest {
    ManualRefresh,
    UpdateConfig {
        config: ClientConfig,
        reply: oneshot::Sender<()>,
    },
    SetChargeLimit {
        pct: u8,
        reply: oneshot::Sender<()>,
    },
    Snapshot {
        reply: oneshot::Sender<Option<StateUpdate>>,
    },
    ClientConfig {
        reply: oneshot::Sender<ClientConfig>,
    },
    Shutdown,
}

/// Cloneable entry point into a running engine
///
/// Commands go straight into the shared command queue; everything else is
/// served by the orchestrator task between cycles.
#[derive(Clone)]
pub struct EngineHandle {
    requests: mpsc::Sender<EngineRequest>,
    queue: CommandQueue,
}

impl EngineHandle {
    pub(crate) fn new(requests: mpsc::Sender<EngineRequest>, queue: CommandQueue) -> Self {
        Self { requests, queue }
    }

    /// Validate and dispatch; resolves once the vehicle answered
    pub async fn request_command(&self, command: Command) -> EngineResult<bool> {
        command.validate()?;
        if self.requests.is_closed() {
            return Err(EngineError::Stopped);
        }
        Ok(self.queue.submit(command).await)
    }

    pub async fn request_manual_refresh(&self) -> EngineResult<()> {
        self.send(EngineRequest::ManualRefresh).await
    }

    /// Replace the whole client config
    pub async fn request_config_update(&self, config: ClientConfig) -> EngineResult<()> {
        config.validate()?;
        let (reply, done) = oneshot::channel();
        self.send(EngineRequest::UpdateConfig { config, reply }).await?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    /// Arm (or with 100, disarm) the one-shot charge limit
    pub async fn set_charge_limit(&self, pct: u8) -> EngineResult<()> {
        if pct == 0 || pct > CHARGE_LIMIT_DISABLED {
            return Err(PolicyError::ChargeLimit(pct).into());
        }
        let (reply, done) = oneshot::channel();
        self.send(EngineRequest::SetChargeLimit { pct, reply }).await?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    /// The current state as subscribers see it; `None` before the first poll
    pub async fn snapshot(&self) -> EngineResult<Option<StateUpdate>> {
        let (reply, done) = oneshot::channel();
        self.send(EngineRequest::Snapshot { reply }).await?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    pub async fn client_config(&self) -> EngineResult<ClientConfig> {
        let (reply, done) = oneshot::channel();
        self.send(EngineRequest::ClientConfig { reply }).await?;
        done.await.map_err(|_| EngineError::Stopped)
    }

    pub fn active_commands(&self) -> HashMap<String, ActiveCommand> {
        self.queue.active().snapshot()
    }

    pub async fn shutdown(&self) {
        debug!("Engine shutdown requested");
        let _ = self.requests.send(EngineRequest::Shutdown).await;
    }

    pub fn is_running(&self) -> bool {
        !self.requests.is_closed()
    }

    async fn send(&self, request: EngineRequest) -> EngineResult<()> {
        self.requests
            .send(request)
            .await
            .map_err(|_| EngineError::Stopped)
    }
}

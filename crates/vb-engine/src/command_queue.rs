//! Serialized dispatch of outbound commands
//!
//! Every submitter (subscribers, schedules, automations) goes through the same
//! channel into one worker task. The worker awaits each remote call before
//! taking the next, so at most one state-changing request is ever in flight.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use ulid::Ulid;
use vb_core::{ActiveCommand, Command, RemoteError, VehicleCloudClient};

/// Commands the vehicle accepted, keyed by [`Command::key`]
#[derive(Debug, Clone, Default)]
pub struct ActiveCommands {
    inner: Arc<DashMap<String, ActiveCommand>>,
}

impl ActiveCommands {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any earlier entry for the same key
    pub fn record(&self, command: &Command, now: DateTime<Utc>) {
        self.inner
            .insert(command.key(), ActiveCommand::issued(command, now));
    }

    pub fn get(&self, key: &str) -> Option<ActiveCommand> {
        self.inner.get(key).map(|entry| entry.value().clone())
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    pub fn is_active_with_state(&self, key: &str, state: &str) -> bool {
        self.inner
            .get(key)
            .is_some_and(|entry| entry.requested_state == state)
    }

    pub fn remove(&self, key: &str) -> Option<ActiveCommand> {
        self.inner.remove(key).map(|(_, command)| command)
    }

    pub fn snapshot(&self) -> HashMap<String, ActiveCommand> {
        self.inner
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Remove and return every entry older than `timeout`
    pub fn sweep(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<(String, ActiveCommand)> {
        let expired: Vec<String> = self
            .inner
            .iter()
            .filter(|entry| {
                entry
                    .value()
                    .age(now)
                    .to_std()
                    .is_ok_and(|age| age >= timeout)
            })
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| self.inner.remove(&key))
            .collect()
    }
}

/// Result of one dispatched command, reported back to the orchestrator
#[derive(Debug, Clone)]
pub enum CommandOutcome {
    Completed { command: Command },
    Failed { command: Command, error: RemoteError },
}

struct QueuedCommand {
    id: Ulid,
    command: Command,
    reply: oneshot::Sender<bool>,
}

#[derive(Clone)]
pub struct CommandQueue {
    tx: mpsc::UnboundedSender<QueuedCommand>,
    active: ActiveCommands,
    /// Queued or in-flight commands per key, until the vehicle answered
    pending: Arc<DashMap<String, usize>>,
}

impl CommandQueue {
    /// Start the worker; it runs until every clone of the queue is dropped
    pub fn spawn(
        client: Arc<dyn VehicleCloudClient>,
        active: ActiveCommands,
        outcomes: mpsc::UnboundedSender<CommandOutcome>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(DashMap::new());
        tokio::spawn(run_worker(client, active.clone(), pending.clone(), outcomes, rx));
        Self {
            tx,
            active,
            pending,
        }
    }

    pub fn active(&self) -> &ActiveCommands {
        &self.active
    }

    /// Whether a command for `key` is waiting for the worker or the vehicle
    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Queue `command` and wait for its turn and result
    pub async fn submit(&self, command: Command) -> bool {
        match self.enqueue(command) {
            Some(done) => done.await.unwrap_or(false),
            None => false,
        }
    }

    /// Queue `command` without waiting; the result arrives as a [`CommandOutcome`]
    pub fn dispatch(&self, command: Command) -> bool {
        self.enqueue(command).is_some()
    }

    fn enqueue(&self, command: Command) -> Option<oneshot::Receiver<bool>> {
        let (reply, done) = oneshot::channel();
        let key = command.key();
        let queued = QueuedCommand {
            id: Ulid::new(),
            command,
            reply,
        };
        debug!(id = %queued.id, command = %queued.command, "Queueing command");

        *self.pending.entry(key.clone()).or_insert(0) += 1;
        if self.tx.send(queued).is_err() {
            warn!("Command worker is gone, dropping command");
            release(&self.pending, &key);
            return None;
        }
        Some(done)
    }
}

fn release(pending: &DashMap<String, usize>, key: &str) {
    pending.remove_if_mut(key, |_, count| {
        *count -= 1;
        *count == 0
    });
}

async fn run_worker(
    client: Arc<dyn VehicleCloudClient>,
    active: ActiveCommands,
    pending: Arc<DashMap<String, usize>>,
    outcomes: mpsc::UnboundedSender<CommandOutcome>,
    mut rx: mpsc::UnboundedReceiver<QueuedCommand>,
) {
    while let Some(QueuedCommand { id, command, reply }) = rx.recv().await {
        debug!(id = %id, command = %command, "Dispatching command");

        let result = client.send_command(&command).await;
        if result.is_ok() {
            active.record(&command, Utc::now());
        }
        release(&pending, &command.key());

        let (succeeded, outcome) = match result {
            Ok(()) => {
                info!(id = %id, command = %command, "Command accepted");
                (true, CommandOutcome::Completed { command })
            }
            Err(error) => {
                warn!(id = %id, command = %command, error = %error, "Command failed");
                (false, CommandOutcome::Failed { command, error })
            }
        };

        let _ = outcomes.send(outcome);
        let _ = reply.send(succeeded);
    }

    debug!("Command queue closed");
}

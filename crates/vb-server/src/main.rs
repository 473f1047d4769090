//! Vehicle bridge server
//!
//! Loads `bridge.yaml`, wires the concrete adapters into the sync engine and
//! serves the REST/WebSocket API until Ctrl-C.

mod cloud;
mod sinks;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vb_api::AppState;
use vb_config::{BridgeConfig, DEFAULT_CONFIG_FILE};
use vb_core::{NotificationSink, PersistentLog, TelemetrySink, Webhook};
use vb_engine::{Collaborators, EngineSettings, SyncOrchestrator};
use vb_event_bus::SubscriberHub;
use vb_storage::{JsonConfigStore, Storage};

use crate::cloud::HttpVehicleClient;
use crate::sinks::{AbrpTelemetry, CsvLog, HttpWebhook, LogNotifier, WebhookNotifier};

#[derive(Parser)]
#[command(name = "vehicle-bridge")]
#[command(about = "Keeps a vehicle in sync and automates charging and climatisation", long_about = None)]
#[command(version)]
struct Cli {
    /// Directory holding bridge.yaml, secrets.yaml and the storage dir
    #[arg(long, default_value = ".")]
    config_dir: PathBuf,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config_file: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let config = BridgeConfig::load(&cli.config_dir, &cli.config_file).with_context(|| {
        format!(
            "loading {}",
            cli.config_dir.join(&cli.config_file).display()
        )
    })?;

    info!(vin = %config.vehicle.vin, "Starting vehicle bridge");

    let hub = SubscriberHub::new();
    let collaborators = build_collaborators(&config, &hub)?;
    let (orchestrator, handle) =
        SyncOrchestrator::start(EngineSettings::from(&config), collaborators).await;
    let engine = tokio::spawn(orchestrator.run());

    let state = AppState {
        handle: handle.clone(),
        hub,
        api_key: config.server.api_key.as_deref().map(Arc::from),
    };
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let server = tokio::spawn(async move {
        if let Err(e) = vb_api::start_server(state, &addr).await {
            error!(error = %e, "API server stopped");
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    handle.shutdown().await;
    server.abort();
    if let Err(e) = engine.await {
        warn!(error = %e, "Engine task ended abnormally");
    }

    Ok(())
}

fn build_collaborators(config: &BridgeConfig, hub: &SubscriberHub) -> Result<Collaborators> {
    let client = HttpVehicleClient::new(&config.vehicle).context("creating vehicle client")?;
    let store = JsonConfigStore::new(Storage::new(config.storage_dir.clone()));

    let notifier: Arc<dyn NotificationSink> = match &config.notify.webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())?),
        None => Arc::new(LogNotifier),
    };
    let telemetry = match &config.abrp {
        Some(abrp) => Some(Arc::new(AbrpTelemetry::new(abrp.clone())?) as Arc<dyn TelemetrySink>),
        None => None,
    };
    let charge_limit_webhook = match &config.charge_limit_webhook {
        Some(url) => Some(Arc::new(HttpWebhook::new(url.clone())?) as Arc<dyn Webhook>),
        None => None,
    };
    let log = config
        .csv_log
        .as_ref()
        .map(|path| Arc::new(CsvLog::new(path.clone())) as Arc<dyn PersistentLog>);

    Ok(Collaborators {
        client: Arc::new(client),
        transport: Arc::new(hub.clone()),
        store: Arc::new(store),
        notifier,
        telemetry,
        log,
        charge_limit_webhook,
    })
}

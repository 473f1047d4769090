//! Outbound adapters: telemetry, notifications, webhook and the CSV log

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use vb_config::AbrpConfig;
use vb_core::{
    LogRow, NotificationSink, PersistentLog, SinkError, TelemetryPoint, TelemetrySink, Webhook,
    LOG_COLUMNS,
};

const ABRP_TELEMETRY_URL: &str = "https://api.iternio.com/1/tlm/send";
const SINK_TIMEOUT: Duration = Duration::from_secs(15);
const CSV_SEPARATOR: &str = ";";

fn http_client() -> reqwest::Result<Client> {
    Client::builder().timeout(SINK_TIMEOUT).build()
}

fn delivery(error: reqwest::Error) -> SinkError {
    SinkError::Delivery(error.to_string())
}

async fn post_json(client: &Client, url: &str, body: &Value) -> Result<(), SinkError> {
    client
        .post(url)
        .json(body)
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(delivery)?;
    Ok(())
}

/// A Better Route Planner live telemetry
pub struct AbrpTelemetry {
    client: Client,
    config: AbrpConfig,
}

impl AbrpTelemetry {
    pub fn new(config: AbrpConfig) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client()?,
            config,
        })
    }
}

#[async_trait]
impl TelemetrySink for AbrpTelemetry {
    async fn push(&self, point: &TelemetryPoint) -> Result<(), SinkError> {
        let mut tlm = serde_json::to_value(point)?;
        if let (Some(model), Some(fields)) = (&self.config.car_model, tlm.as_object_mut()) {
            fields.insert("car_model".to_string(), json!(model));
        }

        self.client
            .post(ABRP_TELEMETRY_URL)
            .query(&[
                ("api_key", self.config.api_key.as_str()),
                ("token", self.config.token.as_str()),
                ("tlm", tlm.to_string().as_str()),
            ])
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(delivery)?;
        debug!(soc = point.soc, "Telemetry pushed");
        Ok(())
    }
}

/// Posts `{"text": ...}` to a chat relay
pub struct WebhookNotifier {
    client: Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client()?,
            url,
        })
    }
}

#[async_trait]
impl NotificationSink for WebhookNotifier {
    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        post_json(&self.client, &self.url, &json!({ "text": text })).await
    }
}

/// Notifications with nowhere to go end up in the log
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, text: &str) -> Result<(), SinkError> {
        info!(text, "Vehicle notification");
        Ok(())
    }
}

/// Charge limit webhook; the payload already carries the event name
pub struct HttpWebhook {
    client: Client,
    url: String,
}

impl HttpWebhook {
    pub fn new(url: String) -> reqwest::Result<Self> {
        Ok(Self {
            client: http_client()?,
            url,
        })
    }
}

#[async_trait]
impl Webhook for HttpWebhook {
    async fn call(&self, event: &str, payload: &Value) -> Result<(), SinkError> {
        debug!(event, url = %self.url, "Calling webhook");
        post_json(&self.client, &self.url, payload).await
    }
}

/// Semicolon separated log, header written when the file is created
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn format_row(row: &LogRow) -> String {
        let mut line = row.timestamp.to_rfc3339();
        for field in &row.fields {
            line.push_str(CSV_SEPARATOR);
            line.push_str(field);
        }
        line.push('\n');
        line
    }
}

#[async_trait]
impl PersistentLog for CsvLog {
    async fn append_row(&self, row: &LogRow) -> Result<(), SinkError> {
        let is_new = !tokio::fs::try_exists(&self.path).await.unwrap_or(false);
        if is_new {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;

        if is_new {
            let header = format!("{}\n", LOG_COLUMNS.join(CSV_SEPARATOR));
            file.write_all(header.as_bytes()).await?;
        }
        file.write_all(Self::format_row(row).as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

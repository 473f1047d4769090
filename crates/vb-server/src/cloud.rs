//! HTTP client for the vehicle gateway

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client, Response};
use serde_json::Value;
use tracing::debug;
use vb_config::VehicleConfig;
use vb_core::{Command, RemoteError, VehicleCloudClient};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct HttpVehicleClient {
    client: Client,
    base_url: String,
    vin: String,
    token: String,
}

impl HttpVehicleClient {
    pub fn new(config: &VehicleConfig) -> reqwest::Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            vin: config.vin.clone(),
            token: config.token.clone(),
        })
    }

    fn status_url(&self) -> String {
        format!("{}/vehicles/{}/status", self.base_url, self.vin)
    }

    fn command_url(&self, command: &Command) -> String {
        format!(
            "{}/vehicles/{}/{}/{}",
            self.base_url, self.vin, command.action, command.state
        )
    }

    /// Any transport error or non-2xx answer is a `RemoteError`
    fn check(result: reqwest::Result<Response>) -> Result<Response, RemoteError> {
        let response = result.map_err(|e| RemoteError::new(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::new(format!("HTTP {}", status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl VehicleCloudClient for HttpVehicleClient {
    async fn fetch_status(&self) -> Result<Value, RemoteError> {
        let result = self
            .client
            .get(self.status_url())
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token))
            .send()
            .await;
        let response = Self::check(result)?;
        response
            .json::<Value>()
            .await
            .map_err(|e| RemoteError::new(format!("invalid status body: {}", e)))
    }

    async fn send_command(&self, command: &Command) -> Result<(), RemoteError> {
        let url = self.command_url(command);
        debug!(url = %url, "Sending command");

        let mut request = self
            .client
            .post(&url)
            .header(header::AUTHORIZATION, format!("Bearer {}", self.token));
        if let Some(body) = &command.body {
            request = request.json(body);
        }

        Self::check(request.send().await).map(|_| ())
    }
}

//! API client for communicating with the supervisor daemon

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use supervisor_lib::{
    DeploymentProgressSnapshot, HealthResponse, HostTelemetrySample, ServerResourceUsage,
};
use url::Url;

/// API client for the supervisor daemon
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let (status, body) = self.fetch(path).await?;
        if !status.is_success() {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        serde_json::from_str(&body).context("Failed to parse response")
    }

    /// GET a health endpoint, which reports failures with 503 and a body
    pub async fn get_health(&self) -> Result<HealthResponse> {
        let (status, body) = self.fetch("healthz").await?;
        if !status.is_success() && status != StatusCode::SERVICE_UNAVAILABLE {
            anyhow::bail!("API error ({}): {}", status, body);
        }
        serde_json::from_str(&body).context("Failed to parse health response")
    }

    async fn fetch(&self, path: &str) -> Result<(StatusCode, String)> {
        let url = self.base_url.join(path).context("Invalid path")?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request")?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Ok((status, body))
    }

    pub async fn host_telemetry(&self) -> Result<HostTelemetry> {
        self.get("api/v1/telemetry/host").await
    }

    pub async fn server_telemetry(&self) -> Result<Vec<ServerTelemetry>> {
        self.get("api/v1/telemetry/servers").await
    }

    pub async fn processes(&self) -> Result<ProcessList> {
        self.get("api/v1/processes").await
    }

    pub async fn deployment_progress(&self) -> Result<DeploymentProgressSnapshot> {
        self.get("api/v1/deployment/progress").await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostTelemetry {
    pub health_percent: f64,
    pub sample: Option<HostTelemetrySample>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerTelemetry {
    pub server_id: u32,
    pub running: bool,
    pub pid: Option<u32>,
    pub usage: Option<ServerResourceUsage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessEntry {
    pub server_id: u32,
    pub pid: u32,
    #[serde(default)]
    pub tracked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessList {
    pub strategy: String,
    pub processes: Vec<ProcessEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_get_processes() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/processes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"strategy":"procfs","processes":[{"server_id":3,"pid":812,"tracked":true}]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let list = client.processes().await.unwrap();
        assert_eq!(list.strategy, "procfs");
        assert_eq!(list.processes[0].server_id, 3);
        assert_eq!(list.processes[0].pid, 812);
        assert!(list.processes[0].tracked);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_host_without_sample() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/telemetry/host")
            .with_status(200)
            .with_body(r#"{"health_percent":100.0,"sample":null}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let host = client.host_telemetry().await.unwrap();
        assert_eq!(host.health_percent, 100.0);
        assert!(host.sample.is_none());
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/api/v1/telemetry/servers")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.server_telemetry().await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_unhealthy_response_is_parsed() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(503)
            .with_body(
                r#"{"status":"unhealthy","components":{"deployment":{"status":"unhealthy","message":"steamcmd failed","last_check_timestamp":0}}}"#,
            )
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let health = client.get_health().await.unwrap();
        assert_eq!(
            health.components[&supervisor_lib::Component::Deployment]
                .message
                .as_deref(),
            Some("steamcmd failed")
        );
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(ApiClient::new("not a url").is_err());
    }
}

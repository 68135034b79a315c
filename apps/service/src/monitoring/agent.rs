use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::config::ServerConfig;
use crate::monitoring::prober::{Prober, ProberFactory};
use crate::monitoring::types::Finding;

/// Wire format of one failed job record as reported by the server agent
#[derive(Debug, Deserialize)]
struct FailedJobRecord {
    job_name: String,
    failed_at: DateTime<Utc>,
    #[serde(default)]
    message: String,
    #[serde(default)]
    duration_seconds: u64,
}

/// HTTP prober for the per-server agent
pub struct AgentProber {
    client: reqwest::Client,
    base_url: Url,
    auth_token: Option<String>,
    server_name: String,
}

impl AgentProber {
    pub fn new(server: &ServerConfig) -> Result<Self> {
        let base_url = Url::parse(&server.endpoint)
            .map_err(|e| anyhow!("invalid endpoint for {}: {}", server.name, e))?;

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(server.options.connect_timeout_seconds))
            .timeout(Duration::from_secs(server.options.request_timeout_seconds))
            .build()?;

        Ok(Self {
            client,
            base_url,
            auth_token: server.auth_token.clone(),
            server_name: server.name.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).map_err(|e| anyhow!("invalid agent path {}: {}", path, e))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait::async_trait]
impl Prober for AgentProber {
    async fn ping(&self) -> Result<()> {
        let url = self.endpoint("health")?;

        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(|e| anyhow!("agent unreachable: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("agent health check returned status {}", response.status()));
        }

        Ok(())
    }

    async fn fetch_findings(&self, lookback_hours: u32) -> Result<Vec<Finding>> {
        let url = self.endpoint("jobs/failed")?;

        let response = self
            .authorize(self.client.get(url))
            .query(&[("lookback_hours", lookback_hours)])
            .send()
            .await
            .map_err(|e| anyhow!("failed-jobs query failed: {}", e))?;

        if !response.status().is_success() {
            return Err(anyhow!("failed-jobs query returned status {}", response.status()));
        }

        let records: Vec<FailedJobRecord> = response
            .json()
            .await
            .map_err(|e| anyhow!("failed to decode agent response: {}", e))?;

        Ok(records
            .into_iter()
            .map(|r| Finding {
                server: self.server_name.clone(),
                job_name: r.job_name,
                failed_at: r.failed_at,
                message: r.message,
                duration_seconds: r.duration_seconds,
            })
            .collect())
    }
}

/// Factory producing one `AgentProber` per cycle and server
pub struct AgentProberFactory;

impl ProberFactory for AgentProberFactory {
    fn create(&self, server: &ServerConfig) -> Result<Box<dyn Prober>> {
        Ok(Box::new(AgentProber::new(server)?))
    }
}

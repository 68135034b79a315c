use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use serde::Serialize;
use tracing::{debug, info};
use url::Url;

use crate::config::NotificationConfig;
use crate::monitoring::types::{Finding, Report};

const MAX_MESSAGE_LENGTH: usize = 100;

/// Payload pushed to the configured webhook
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
}

/// Transport seam so tests can capture payloads without a webhook.
#[async_trait::async_trait]
pub trait NotificationSink: Send + Sync {
    async fn push(&self, payload: &NotificationPayload) -> Result<()>;
}

/// Posts payloads as JSON to a webhook URL
pub struct WebhookSink {
    client: reqwest::Client,
    url: Url,
}

impl WebhookSink {
    pub fn new(url: &str) -> Result<Self> {
        let url = Url::parse(url).map_err(|e| anyhow!("invalid webhook url: {e}"))?;
        Ok(Self { client: reqwest::Client::new(), url })
    }
}

#[async_trait::async_trait]
impl NotificationSink for WebhookSink {
    async fn push(&self, payload: &NotificationPayload) -> Result<()> {
        let response = self
            .client
            .post(self.url.clone())
            .json(payload)
            .send()
            .await
            .map_err(|e| anyhow!("webhook request failed: {e}"))?;

        if !response.status().is_success() {
            return Err(anyhow!("webhook returned status {}", response.status()));
        }

        Ok(())
    }
}

/// Turns reports with failed jobs into webhook notifications.
pub struct Notifier {
    config: NotificationConfig,
    sink: Box<dyn NotificationSink>,
}

impl Notifier {
    pub fn new(config: NotificationConfig) -> Result<Self> {
        let url = config
            .webhook_url
            .as_deref()
            .ok_or_else(|| anyhow!("notification webhook url is not configured"))?;
        let sink = Box::new(WebhookSink::new(url)?);
        Ok(Self { config, sink })
    }

    pub fn with_sink(config: NotificationConfig, sink: Box<dyn NotificationSink>) -> Self {
        Self { config, sink }
    }

    /// Push notifications for the report's findings. A report without
    /// findings pushes nothing.
    pub async fn notify(&self, report: &Report) -> Result<()> {
        if report.findings.is_empty() {
            debug!("no failed jobs, skipping notification");
            return Ok(());
        }

        if self.config.grouping.enabled {
            let payload = grouped_payload(
                &report.findings,
                self.config.grouping.max_jobs_per_notification,
            );
            self.sink.push(&payload).await?;
            info!("pushed grouped notification for {} findings", report.findings.len());
        } else {
            for finding in &report.findings {
                self.sink.push(&single_payload(finding)).await?;
            }
            info!("pushed {} notifications", report.findings.len());
        }

        Ok(())
    }
}

fn grouped_payload(findings: &[Finding], max_jobs: usize) -> NotificationPayload {
    let mut by_server: BTreeMap<&str, Vec<&Finding>> = BTreeMap::new();
    for finding in findings {
        by_server.entry(finding.server.as_str()).or_default().push(finding);
    }

    let title = match (findings.len(), by_server.len()) {
        (1, _) => "Scheduled job failed".to_string(),
        (n, 1) => format!("{n} scheduled jobs failed"),
        (n, m) => format!("{n} scheduled jobs failed on {m} servers"),
    };

    let mut lines = Vec::new();
    let mut listed = 0;
    for (server, jobs) in &by_server {
        if listed == max_jobs {
            break;
        }
        let take = (max_jobs - listed).min(jobs.len());
        let names: Vec<&str> = jobs.iter().take(take).map(|j| j.job_name.as_str()).collect();
        listed += take;
        lines.push(format!("{server}: {}", names.join(", ")));
    }
    if listed < findings.len() {
        lines.push(format!("... and {} more", findings.len() - listed));
    }

    NotificationPayload { title, body: lines.join("\n") }
}

fn single_payload(finding: &Finding) -> NotificationPayload {
    NotificationPayload {
        title: "Scheduled job failed".to_string(),
        body: format!(
            "{}: {} - {}",
            finding.server,
            finding.job_name,
            truncate_message(&finding.message)
        ),
    }
}

fn truncate_message(message: &str) -> String {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return message.to_string();
    }
    let truncated: String = message.chars().take(MAX_MESSAGE_LENGTH - 3).collect();
    format!("{truncated}...")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use chrono::Utc;
    use uuid::Uuid;

    use crate::config::GroupingConfig;
    use crate::monitoring::types::ReportStatus;

    #[derive(Clone, Default)]
    struct RecordingSink {
        payloads: Arc<Mutex<Vec<NotificationPayload>>>,
    }

    #[async_trait::async_trait]
    impl NotificationSink for RecordingSink {
        async fn push(&self, payload: &NotificationPayload) -> Result<()> {
            self.payloads.lock().unwrap().push(payload.clone());
            Ok(())
        }
    }

    fn finding(server: &str, job: &str, message: &str) -> Finding {
        Finding {
            server: server.to_string(),
            job_name: job.to_string(),
            failed_at: Utc::now(),
            message: message.to_string(),
            duration_seconds: 10,
        }
    }

    fn report(findings: Vec<Finding>) -> Report {
        let status =
            if findings.is_empty() { ReportStatus::Success } else { ReportStatus::FailedJobs };
        Report {
            id: Uuid::new_v4(),
            status,
            started_at: Utc::now(),
            duration_ms: 3,
            servers_checked: 2,
            servers_reachable: 2,
            servers_unreachable: Vec::new(),
            findings,
            summary: String::new(),
        }
    }

    fn notification_config(grouping: bool, max_jobs: usize) -> NotificationConfig {
        NotificationConfig {
            enabled: true,
            webhook_url: Some("https://hooks.internal/vigil".to_string()),
            grouping: GroupingConfig { enabled: grouping, max_jobs_per_notification: max_jobs },
        }
    }

    fn notifier(sink: &RecordingSink, grouping: bool, max_jobs: usize) -> Notifier {
        Notifier::with_sink(notification_config(grouping, max_jobs), Box::new(sink.clone()))
    }

    #[tokio::test]
    async fn test_no_findings_pushes_nothing() {
        let sink = RecordingSink::default();
        notifier(&sink, true, 5).notify(&report(vec![])).await.unwrap();
        assert!(sink.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_grouped_notification() {
        let sink = RecordingSink::default();
        let report = report(vec![
            finding("db01", "Nightly ETL", "exit 1"),
            finding("db01", "Backup Full", "disk full"),
            finding("db02", "Reindex", "deadlock"),
        ]);

        notifier(&sink, true, 5).notify(&report).await.unwrap();

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].title, "3 scheduled jobs failed on 2 servers");
        assert_eq!(payloads[0].body, "db01: Nightly ETL, Backup Full\ndb02: Reindex");
    }

    #[tokio::test]
    async fn test_grouped_single_failure_title() {
        let sink = RecordingSink::default();
        let report = report(vec![finding("db01", "Nightly ETL", "exit 1")]);

        notifier(&sink, true, 5).notify(&report).await.unwrap();

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads[0].title, "Scheduled job failed");
    }

    #[tokio::test]
    async fn test_grouped_single_server_title() {
        let sink = RecordingSink::default();
        let report = report(vec![
            finding("db01", "Nightly ETL", "exit 1"),
            finding("db01", "Backup Full", "disk full"),
        ]);

        notifier(&sink, true, 5).notify(&report).await.unwrap();

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads[0].title, "2 scheduled jobs failed");
    }

    #[tokio::test]
    async fn test_grouped_notification_truncates_job_list() {
        let sink = RecordingSink::default();
        let report = report(vec![
            finding("db01", "Job A", ""),
            finding("db01", "Job B", ""),
            finding("db02", "Job C", ""),
            finding("db02", "Job D", ""),
        ]);

        notifier(&sink, true, 2).notify(&report).await.unwrap();

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads[0].body, "db01: Job A, Job B\n... and 2 more");
    }

    #[tokio::test]
    async fn test_ungrouped_pushes_one_per_finding() {
        let sink = RecordingSink::default();
        let report = report(vec![
            finding("db01", "Nightly ETL", "exit 1"),
            finding("db02", "Reindex", "deadlock"),
        ]);

        notifier(&sink, false, 5).notify(&report).await.unwrap();

        let payloads = sink.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads[0].body, "db01: Nightly ETL - exit 1");
        assert_eq!(payloads[1].body, "db02: Reindex - deadlock");
    }

    #[test]
    fn test_truncate_message() {
        let long = "x".repeat(150);
        let truncated = truncate_message(&long);
        assert_eq!(truncated.chars().count(), MAX_MESSAGE_LENGTH);
        assert!(truncated.ends_with("..."));

        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn test_notifier_new_requires_webhook_url() {
        let config = NotificationConfig { webhook_url: None, ..Default::default() };
        assert!(Notifier::new(config).is_err());
    }
}

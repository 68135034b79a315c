use std::sync::Arc;
use std::time::Instant;

use anyhow::{Result, anyhow};
use chrono::Utc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{Config, ServerConfig};
use crate::monitoring::agent::AgentProberFactory;
use crate::monitoring::filter;
use crate::monitoring::prober::ProberFactory;
use crate::monitoring::types::{Finding, Report, ReportStatus, ServerOutcome};

const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Orchestrates one monitoring cycle across the configured fleet.
pub struct Monitor {
    config: Arc<Config>,
    factory: Arc<dyn ProberFactory>,
}

impl Monitor {
    pub fn new(config: Arc<Config>) -> Self {
        Self::with_factory(config, Arc::new(AgentProberFactory))
    }

    pub fn with_factory(config: Arc<Config>, factory: Arc<dyn ProberFactory>) -> Self {
        Self { config, factory }
    }

    /// Check every enabled server and aggregate the outcomes into a report.
    ///
    /// Never fails: configuration problems and unreachable servers are
    /// reported through the report status instead.
    pub async fn check_all(&self, cancel: &CancellationToken) -> Report {
        let started_at = Utc::now();
        let started = Instant::now();
        let id = Uuid::new_v4();

        let servers: Vec<ServerConfig> =
            self.config.enabled_servers().into_iter().cloned().collect();

        if servers.is_empty() {
            warn!(cycle = %id, "no enabled servers configured");
            return Report {
                id,
                status: ReportStatus::Error,
                started_at,
                duration_ms: started.elapsed().as_millis() as u64,
                servers_checked: 0,
                servers_reachable: 0,
                servers_unreachable: Vec::new(),
                findings: Vec::new(),
                summary: "No enabled servers configured".to_string(),
            };
        }

        info!(cycle = %id, servers = servers.len(), "starting monitoring cycle");

        let outcomes = if self.config.monitoring.parallel.enabled {
            self.check_parallel(servers, cancel).await
        } else {
            self.check_sequential(servers, cancel).await
        };

        let report = aggregate(id, started_at, started.elapsed().as_millis() as u64, outcomes);
        info!(cycle = %id, status = %report.status, "{}", report.summary);
        report
    }

    /// Check a single server by name through the same aggregation path.
    pub async fn check_server(&self, name: &str, cancel: &CancellationToken) -> Result<Report> {
        let started_at = Utc::now();
        let started = Instant::now();
        let id = Uuid::new_v4();

        let server = self
            .config
            .servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| anyhow!("unknown server: {name}"))?
            .clone();

        info!(cycle = %id, server = %server.name, "starting single-server check");

        let lookback = self.config.lookback_for(&server);
        let outcomes = probe_server(self.factory.clone(), server, lookback, cancel.clone())
            .await
            .into_iter()
            .collect();

        Ok(aggregate(id, started_at, started.elapsed().as_millis() as u64, outcomes))
    }

    async fn check_parallel(
        &self,
        servers: Vec<ServerConfig>,
        cancel: &CancellationToken,
    ) -> Vec<ServerOutcome> {
        let limit = match self.config.monitoring.parallel.max_concurrent {
            0 => DEFAULT_MAX_CONCURRENT,
            n => n,
        };
        let semaphore = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        for server in servers {
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();
            let factory = self.factory.clone();
            let lookback = self.config.lookback_for(&server);

            tasks.spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return None,
                    permit = semaphore.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return None,
                    },
                };
                probe_server(factory, server, lookback, cancel).await
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!("server check task failed: {e}"),
            }
        }
        outcomes
    }

    async fn check_sequential(
        &self,
        servers: Vec<ServerConfig>,
        cancel: &CancellationToken,
    ) -> Vec<ServerOutcome> {
        let mut outcomes = Vec::new();
        for server in servers {
            if cancel.is_cancelled() {
                break;
            }
            let lookback = self.config.lookback_for(&server);
            if let Some(outcome) =
                probe_server(self.factory.clone(), server, lookback, cancel.clone()).await
            {
                outcomes.push(outcome);
            }
        }
        outcomes
    }
}

/// Probe one server. Returns `None` when the cycle was canceled before the
/// check completed, so partial cycles only carry finished outcomes.
async fn probe_server(
    factory: Arc<dyn ProberFactory>,
    server: ServerConfig,
    lookback_hours: u32,
    cancel: CancellationToken,
) -> Option<ServerOutcome> {
    if cancel.is_cancelled() {
        return None;
    }

    debug!(server = %server.name, lookback_hours, "checking server");

    let prober = match factory.create(&server) {
        Ok(prober) => prober,
        Err(e) => {
            warn!(server = %server.name, "failed to create prober: {e}");
            return Some(ServerOutcome::unreachable(server.name, e.to_string()));
        }
    };

    let ping = tokio::select! {
        _ = cancel.cancelled() => return None,
        ping = prober.ping() => ping,
    };
    if let Err(e) = ping {
        warn!(server = %server.name, "server unreachable: {e}");
        return Some(ServerOutcome::unreachable(server.name, e.to_string()));
    }

    let findings = tokio::select! {
        _ = cancel.cancelled() => return None,
        findings = prober.fetch_findings(lookback_hours) => findings,
    };
    let findings = match findings {
        Ok(findings) => findings,
        Err(e) => {
            warn!(server = %server.name, "failed-jobs query failed: {e}");
            return Some(ServerOutcome::degraded(server.name, e.to_string()));
        }
    };

    let filtered: Vec<_> = findings
        .into_iter()
        .filter(|f| filter::passes(&f.job_name, &server.jobs.include, &server.jobs.exclude))
        .collect();

    debug!(server = %server.name, findings = filtered.len(), "server check finished");
    Some(ServerOutcome::reachable(server.name, filtered))
}

fn aggregate(
    id: Uuid,
    started_at: chrono::DateTime<Utc>,
    duration_ms: u64,
    outcomes: Vec<ServerOutcome>,
) -> Report {
    let servers_checked = outcomes.len();
    let servers_reachable = outcomes.iter().filter(|o| o.reachable).count();

    let mut servers_unreachable: Vec<String> =
        outcomes.iter().filter(|o| !o.reachable).map(|o| o.server.clone()).collect();
    servers_unreachable.sort();

    let findings: Vec<_> = outcomes.into_iter().flat_map(|o| o.findings).collect();

    let status = if servers_checked > 0 && servers_reachable == 0 {
        ReportStatus::Error
    } else if !findings.is_empty() {
        ReportStatus::FailedJobs
    } else {
        ReportStatus::Success
    };

    let summary = generate_summary(status, servers_checked, servers_reachable, &findings);

    Report {
        id,
        status,
        started_at,
        duration_ms,
        servers_checked,
        servers_reachable,
        servers_unreachable,
        findings,
        summary,
    }
}

fn generate_summary(
    status: ReportStatus,
    servers_checked: usize,
    servers_reachable: usize,
    findings: &[Finding],
) -> String {
    match status {
        ReportStatus::Error => {
            format!("All {} {} unreachable", servers_checked, plural(servers_checked, "server"))
        }
        ReportStatus::FailedJobs => {
            let affected: std::collections::BTreeSet<_> =
                findings.iter().map(|f| f.server.as_str()).collect();
            format!(
                "{} failed {} on {} {}",
                findings.len(),
                plural(findings.len(), "job"),
                affected.len(),
                plural(affected.len(), "server")
            )
        }
        ReportStatus::Success => {
            format!("No failed jobs on {} {}", servers_reachable, plural(servers_reachable, "server"))
        }
    }
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 { word.to_string() } else { format!("{word}s") }
}

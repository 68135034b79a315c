use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall status of a monitoring cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    Success,
    FailedJobs,
    Error,
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReportStatus::Success => write!(f, "success"),
            ReportStatus::FailedJobs => write!(f, "failed_jobs"),
            ReportStatus::Error => write!(f, "error"),
        }
    }
}

/// A single failed job observed on a monitored server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    /// Name of the server the job ran on
    pub server: String,

    /// Name of the scheduled job that failed
    pub job_name: String,

    /// Timestamp of the failed run
    pub failed_at: DateTime<Utc>,

    /// Failure message reported by the server agent
    pub message: String,

    /// How long the failed run took, in seconds
    pub duration_seconds: u64,
}

/// Per-server result of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerOutcome {
    /// Name of the checked server
    pub server: String,

    /// Whether the server agent answered the ping
    pub reachable: bool,

    /// Failed jobs that survived the server's include/exclude filters
    pub findings: Vec<Finding>,

    /// Error message (if the check itself failed)
    pub error: Option<String>,
}

impl ServerOutcome {
    pub fn unreachable(server: String, error: String) -> Self {
        Self { server, reachable: false, findings: Vec::new(), error: Some(error) }
    }

    pub fn reachable(server: String, findings: Vec<Finding>) -> Self {
        Self { server, reachable: true, findings, error: None }
    }

    pub fn degraded(server: String, error: String) -> Self {
        Self { server, reachable: true, findings: Vec::new(), error: Some(error) }
    }
}

/// Aggregated result of one monitoring cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Unique id of this cycle
    pub id: Uuid,

    /// Overall classification of the cycle
    pub status: ReportStatus,

    /// When the cycle started
    pub started_at: DateTime<Utc>,

    /// How long the cycle took, in milliseconds
    pub duration_ms: u64,

    /// Number of servers that were checked
    pub servers_checked: usize,

    /// Number of servers whose agent answered
    pub servers_reachable: usize,

    /// Names of servers whose agent did not answer
    pub servers_unreachable: Vec<String>,

    /// Failed jobs across all reachable servers
    pub findings: Vec<Finding>,

    /// Human-readable one-line summary
    pub summary: String,
}

impl Report {
    pub fn has_failed_jobs(&self) -> bool {
        !self.findings.is_empty()
    }

    /// Map the report status onto the process exit code contract.
    pub fn exit_code(&self) -> u8 {
        match self.status {
            ReportStatus::Success => 0,
            ReportStatus::FailedJobs => 1,
            ReportStatus::Error => 3,
        }
    }
}

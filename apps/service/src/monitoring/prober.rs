use anyhow::Result;

use crate::config::ServerConfig;
use crate::monitoring::types::Finding;

/// Prober trait for querying one monitored server
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Cheap reachability check against the server agent
    async fn ping(&self) -> Result<()>;

    /// Fetch failed jobs from the last `lookback_hours` hours
    async fn fetch_findings(&self, lookback_hours: u32) -> Result<Vec<Finding>>;
}

/// Factory seam so each cycle gets a fresh prober and tests can inject
/// doubles without touching the network.
pub trait ProberFactory: Send + Sync {
    fn create(&self, server: &ServerConfig) -> Result<Box<dyn Prober>>;
}

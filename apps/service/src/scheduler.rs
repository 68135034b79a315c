use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, LocalResult, TimeZone, Utc};
use futures::future::BoxFuture;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{RetryConfig, SchedulerConfig};

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("invalid check time {time:?}: {reason}")]
    InvalidTime { time: String, reason: String },
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("no scheduled jobs")]
    NoScheduledJobs,
}

/// Parse a `HH:MM` fire time on the 24h clock.
pub fn parse_time(time: &str) -> Result<(u32, u32), SchedulerError> {
    let invalid = |reason: &str| SchedulerError::InvalidTime {
        time: time.to_string(),
        reason: reason.to_string(),
    };

    let (hour, minute) = time.split_once(':').ok_or_else(|| invalid("expected HH:MM"))?;
    let hour: u32 = hour.parse().map_err(|_| invalid("hour is not a number"))?;
    let minute: u32 = minute.parse().map_err(|_| invalid("minute is not a number"))?;

    if hour > 23 {
        return Err(invalid("hour out of range"));
    }
    if minute > 59 {
        return Err(invalid("minute out of range"));
    }

    Ok((hour, minute))
}

/// Timezone the fire times are interpreted in
#[derive(Debug, Clone, Copy)]
enum Zone {
    Local,
    Named(chrono_tz::Tz),
}

impl Zone {
    fn resolve(name: Option<&str>) -> Result<Self, SchedulerError> {
        match name {
            None => Ok(Zone::Local),
            Some(name) => name
                .parse::<chrono_tz::Tz>()
                .map(Zone::Named)
                .map_err(|_| SchedulerError::InvalidTimezone(name.to_string())),
        }
    }

    /// Next wall-clock occurrence of `hour:minute` strictly after `after`.
    ///
    /// Ambiguous local times (DST fold) resolve to the earlier instant;
    /// nonexistent local times (DST gap) skip to the next day.
    fn next_fire(&self, after: DateTime<Utc>, hour: u32, minute: u32) -> Option<DateTime<Utc>> {
        match self {
            Zone::Local => next_fire_in(&chrono::Local, after, hour, minute),
            Zone::Named(tz) => next_fire_in(tz, after, hour, minute),
        }
    }
}

fn next_fire_in<Tz: TimeZone>(
    tz: &Tz,
    after: DateTime<Utc>,
    hour: u32,
    minute: u32,
) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(tz);

    for day_offset in 0..=2u64 {
        let date = local_after.date_naive().checked_add_days(Days::new(day_offset))?;
        let candidate =
            match tz.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, minute, 0) {
                LocalResult::Single(dt) => Some(dt),
                LocalResult::Ambiguous(earliest, _) => Some(earliest),
                LocalResult::None => None,
            };

        if let Some(candidate) = candidate {
            let candidate = candidate.with_timezone(&Utc);
            if candidate > after {
                return Some(candidate);
            }
        }
    }

    None
}

/// Compute the soonest upcoming fire time for a scheduler configuration
/// without spawning any trigger tasks.
pub fn next_run_from_config(config: &SchedulerConfig) -> Result<DateTime<Utc>, SchedulerError> {
    let zone = Zone::resolve(config.timezone.as_deref())?;

    let mut triggers = Vec::with_capacity(config.check_times.len());
    for time in &config.check_times {
        triggers.push(parse_time(time)?);
    }

    let now = Utc::now();
    triggers
        .iter()
        .filter_map(|&(hour, minute)| zone.next_fire(now, hour, minute))
        .min()
        .ok_or(SchedulerError::NoScheduledJobs)
}

/// Cycle handler invoked at each fire time.
///
/// The token aborts in-flight work when the caller force-cancels; a normal
/// scheduler stop lets the running cycle finish.
pub type Handler = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// Wall-clock scheduler that fires the monitoring cycle at configured
/// times of day.
pub struct Scheduler {
    zone: Zone,
    check_times: Vec<String>,
    retry: RetryConfig,
    retry_delay: Duration,
    handler: Handler,
    cycle_cancel: CancellationToken,
    shutdown: CancellationToken,
    triggers: Vec<(u32, u32)>,
    handles: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("zone", &self.zone)
            .field("check_times", &self.check_times)
            .field("retry", &self.retry)
            .field("retry_delay", &self.retry_delay)
            .field("triggers", &self.triggers)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(config: &SchedulerConfig, handler: Handler) -> Result<Self, SchedulerError> {
        let zone = Zone::resolve(config.timezone.as_deref())?;

        Ok(Self {
            zone,
            check_times: config.check_times.clone(),
            retry: config.retry.clone(),
            retry_delay: Duration::from_secs(config.retry.delay_seconds),
            handler,
            cycle_cancel: CancellationToken::new(),
            shutdown: CancellationToken::new(),
            triggers: Vec::new(),
            handles: Vec::new(),
        })
    }

    /// Override the delay between retry attempts. Used by tests to avoid
    /// real waits.
    #[cfg(test)]
    fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Token that force-aborts an in-flight cycle when canceled
    pub fn cycle_token(&self) -> CancellationToken {
        self.cycle_cancel.clone()
    }

    /// Parse all fire times and spawn one daily trigger task per time.
    ///
    /// Any malformed time fails the whole start and registers nothing.
    pub fn start(&mut self) -> Result<(), SchedulerError> {
        let mut triggers = Vec::with_capacity(self.check_times.len());
        for time in &self.check_times {
            triggers.push(parse_time(time)?);
        }

        for &(hour, minute) in &triggers {
            let zone = self.zone;
            let handler = self.handler.clone();
            let retry = self.retry.clone();
            let retry_delay = self.retry_delay;
            let cycle_cancel = self.cycle_cancel.clone();
            let shutdown = self.shutdown.clone();

            self.handles.push(tokio::spawn(async move {
                trigger_loop(zone, hour, minute, handler, retry, retry_delay, cycle_cancel, shutdown)
                    .await;
            }));
        }

        self.triggers = triggers;
        info!(triggers = self.triggers.len(), "scheduler started");
        Ok(())
    }

    /// Soonest upcoming fire time across all registered triggers
    pub fn next_run(&self) -> Result<DateTime<Utc>, SchedulerError> {
        self.next_run_after(Utc::now())
    }

    fn next_run_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, SchedulerError> {
        self.triggers
            .iter()
            .filter_map(|&(hour, minute)| self.zone.next_fire(after, hour, minute))
            .min()
            .ok_or(SchedulerError::NoScheduledJobs)
    }

    /// Cancel pending trigger sleeps and wait for the trigger tasks.
    ///
    /// A cycle that is already running finishes first; only the cycle
    /// token force-aborts in-flight work.
    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        for handle in self.handles.drain(..) {
            if let Err(e) = handle.await {
                error!("trigger task failed during shutdown: {e}");
            }
        }
        info!("scheduler stopped");
    }
}

#[allow(clippy::too_many_arguments)]
async fn trigger_loop(
    zone: Zone,
    hour: u32,
    minute: u32,
    handler: Handler,
    retry: RetryConfig,
    retry_delay: Duration,
    cycle_cancel: CancellationToken,
    shutdown: CancellationToken,
) {
    loop {
        let Some(next) = zone.next_fire(Utc::now(), hour, minute) else {
            error!(hour, minute, "could not compute next fire time, trigger disabled");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);

        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        run_cycle(&handler, &cycle_cancel, &retry, retry_delay).await;
    }
}

/// Run one cycle, retrying per policy. Failures are logged and swallowed
/// so the trigger keeps firing.
async fn run_cycle(
    handler: &Handler,
    cycle_cancel: &CancellationToken,
    retry: &RetryConfig,
    retry_delay: Duration,
) {
    let attempts = if retry.enabled { retry.max_attempts.max(1) } else { 1 };

    let mut last_error = None;
    for attempt in 1..=attempts {
        match handler(cycle_cancel.clone()).await {
            Ok(()) => {
                if attempt > 1 {
                    info!(attempt, "monitoring cycle succeeded after retry");
                }
                return;
            }
            Err(e) => {
                warn!(attempt, attempts, "monitoring cycle failed: {e}");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(retry_delay).await;
                }
            }
        }
    }

    if let Some(e) = last_error {
        error!(attempts, "monitoring cycle abandoned until next fire: {e}");
    }
}

use std::{env, fmt, fs, path};

use serde::{Deserialize, Serialize};
use url::Url;

use crate::scheduler::parse_time;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(path::PathBuf),
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub servers: Vec<ServerConfig>,
    pub scheduler: SchedulerConfig,
    pub monitoring: MonitoringConfig,
    pub notification: NotificationConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Unique display name of the server
    pub name: String,

    /// Base URL of the server agent, e.g. `http://db01.internal:9131/`
    pub endpoint: String,

    pub enabled: bool,

    /// Bearer token for the agent; supports `${VAR}` / `${VAR:default}`
    pub auth_token: Option<String>,

    /// Per-server override of the global lookback window
    pub lookback_hours: Option<u32>,

    pub options: ServerOptions,

    pub jobs: JobFilterConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            endpoint: String::new(),
            enabled: true,
            auth_token: None,
            lookback_hours: None,
            options: ServerOptions::default(),
            jobs: JobFilterConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerOptions {
    pub connect_timeout_seconds: u64,
    pub request_timeout_seconds: u64,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self { connect_timeout_seconds: 10, request_timeout_seconds: 30 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct JobFilterConfig {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Daily fire times as `HH:MM` (24h clock)
    pub check_times: Vec<String>,

    /// IANA timezone name; the process-local zone when unset
    pub timezone: Option<String>,

    pub retry: RetryConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { check_times: vec!["08:00".to_string()], timezone: None, retry: RetryConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { enabled: true, max_attempts: 3, delay_seconds: 60 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Global lookback window for failed-job queries, in hours
    pub lookback_hours: u32,

    pub parallel: ParallelConfig,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self { lookback_hours: 24, parallel: ParallelConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub enabled: bool,

    /// Upper bound on concurrent server checks; 0 falls back to the default
    pub max_concurrent: usize,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self { enabled: true, max_concurrent: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    pub webhook_url: Option<String>,
    pub grouping: GroupingConfig,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { enabled: false, webhook_url: None, grouping: GroupingConfig::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupingConfig {
    pub enabled: bool,
    pub max_jobs_per_notification: usize,
}

impl Default for GroupingConfig {
    fn default() -> Self {
        Self { enabled: true, max_jobs_per_notification: 5 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "compact".to_string() }
    }
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Option<path::PathBuf> {
    let base = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else {
        env::home_dir()?.join(".config")
    };

    Some(base.join("vigil/config.toml"))
}

/// Expand `${VAR}` and `${VAR:default}` references against the process
/// environment. An unset variable without a default is an error.
fn expand_env(value: &str) -> Result<String, ConfigError> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(ConfigError::Invalid(format!("unterminated variable reference in {value:?}")));
        };
        let reference = &after[..end];
        let (name, default) = match reference.split_once(':') {
            Some((name, default)) => (name, Some(default)),
            None => (reference, None),
        };

        match env::var(name) {
            Ok(var) => out.push_str(&var),
            Err(_) => match default {
                Some(default) => out.push_str(default),
                None => {
                    return Err(ConfigError::Invalid(format!(
                        "environment variable {name} is not set"
                    )));
                }
            },
        }

        rest = &after[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}

impl Config {
    /// Load and validate the configuration.
    ///
    /// An explicit path must exist. Otherwise `./config.toml` is tried
    /// first, then the user config directory.
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path = match optional_path {
            Some(path) => {
                let path = path.as_ref().to_path_buf();
                if !path.exists() {
                    return Err(ConfigError::NotFound(path));
                }
                path
            }
            None => {
                let local = path::PathBuf::from("config.toml");
                if local.exists() {
                    local
                } else {
                    match default_config_path() {
                        Some(path) if path.exists() => path,
                        _ => return Err(ConfigError::NotFound(local)),
                    }
                }
            }
        };

        let raw = fs::read_to_string(&config_path)?;
        let mut config: Config = toml::from_str(&raw)?;

        for server in &mut config.servers {
            if let Some(token) = &server.auth_token {
                server.auth_token = Some(expand_env(token)?);
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.servers.is_empty() {
            return Err(ConfigError::Invalid("at least one server must be configured".to_string()));
        }

        let mut seen = std::collections::HashSet::new();
        for server in &self.servers {
            if server.name.is_empty() {
                return Err(ConfigError::Invalid("server name must not be empty".to_string()));
            }
            if !seen.insert(server.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate server name: {}",
                    server.name
                )));
            }

            let url = Url::parse(&server.endpoint).map_err(|e| {
                ConfigError::Invalid(format!("invalid endpoint for {}: {}", server.name, e))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConfigError::Invalid(format!(
                    "endpoint for {} must be http or https",
                    server.name
                )));
            }

            if server.lookback_hours == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "lookback_hours for {} must be positive",
                    server.name
                )));
            }
        }

        if self.monitoring.lookback_hours == 0 {
            return Err(ConfigError::Invalid("monitoring.lookback_hours must be positive".to_string()));
        }

        if self.scheduler.check_times.is_empty() {
            return Err(ConfigError::Invalid("scheduler.check_times must not be empty".to_string()));
        }
        for time in &self.scheduler.check_times {
            parse_time(time)
                .map_err(|e| ConfigError::Invalid(format!("invalid check time: {e}")))?;
        }

        if self.notification.enabled {
            let Some(webhook) = &self.notification.webhook_url else {
                return Err(ConfigError::Invalid(
                    "notification.webhook_url is required when notifications are enabled"
                        .to_string(),
                ));
            };
            Url::parse(webhook).map_err(|e| {
                ConfigError::Invalid(format!("invalid notification.webhook_url: {e}"))
            })?;
        }

        Ok(())
    }

    /// Servers that take part in a monitoring cycle
    pub fn enabled_servers(&self) -> Vec<&ServerConfig> {
        self.servers.iter().filter(|s| s.enabled).collect()
    }

    /// Effective lookback window for a server
    pub fn lookback_for(&self, server: &ServerConfig) -> u32 {
        server.lookback_hours.unwrap_or(self.monitoring.lookback_hours)
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_2 = write_indented(2);

        writeln!(f, "Current Configuration:")?;

        write_title_1(f, "Servers")?;
        for server in &self.servers {
            write_1(f, "Name", &server.name)?;
            write_2(f, "Endpoint", &server.endpoint)?;
            write_2(f, "Enabled", &server.enabled)?;
            write_2(f, "Lookback Hours", &self.lookback_for(server))?;
            write_2(f, "Include Patterns", &server.jobs.include.len())?;
            write_2(f, "Exclude Patterns", &server.jobs.exclude.len())?;
        }

        write_title_1(f, "Scheduler")?;
        write_1(f, "Check Times", &self.scheduler.check_times.join(", "))?;
        write_1(f, "Timezone", &self.scheduler.timezone.as_deref().unwrap_or("local"))?;
        write_1(f, "Retry Enabled", &self.scheduler.retry.enabled)?;
        write_1(f, "Retry Max Attempts", &self.scheduler.retry.max_attempts)?;
        write_1(f, "Retry Delay Seconds", &self.scheduler.retry.delay_seconds)?;

        write_title_1(f, "Monitoring")?;
        write_1(f, "Lookback Hours", &self.monitoring.lookback_hours)?;
        write_1(f, "Parallel Enabled", &self.monitoring.parallel.enabled)?;
        write_1(f, "Max Concurrent", &self.monitoring.parallel.max_concurrent)?;

        write_title_1(f, "Notification")?;
        write_1(f, "Enabled", &self.notification.enabled)?;
        write_1(f, "Webhook Configured", &self.notification.webhook_url.is_some())?;
        write_1(f, "Grouping Enabled", &self.notification.grouping.enabled)?;

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        write_1(f, "Format", &self.logging.format)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn valid_config() -> Config {
        Config {
            servers: vec![ServerConfig {
                name: "db01".to_string(),
                endpoint: "http://db01.internal:9131/".to_string(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn write_temp_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scheduler.check_times, vec!["08:00".to_string()]);
        assert!(config.scheduler.retry.enabled);
        assert_eq!(config.scheduler.retry.max_attempts, 3);
        assert_eq!(config.monitoring.lookback_hours, 24);
        assert_eq!(config.monitoring.parallel.max_concurrent, 5);
        assert!(!config.notification.enabled);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_from_file() {
        let file = write_temp_config(
            r#"
            [[servers]]
            name = "db01"
            endpoint = "http://db01.internal:9131/"

            [[servers]]
            name = "db02"
            endpoint = "https://db02.internal:9131/"
            enabled = false
            lookback_hours = 48

            [scheduler]
            check_times = ["06:30", "18:00"]
            timezone = "Europe/Amsterdam"
            "#,
        );

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.enabled_servers().len(), 1);
        assert_eq!(config.lookback_for(&config.servers[1]), 48);
        assert_eq!(config.lookback_for(&config.servers[0]), 24);
        assert_eq!(config.scheduler.check_times.len(), 2);
        assert_eq!(config.scheduler.timezone.as_deref(), Some("Europe/Amsterdam"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = Config::load(Some("/nonexistent/vigil.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_rejects_malformed_toml() {
        let file = write_temp_config("servers = not toml");
        assert!(matches!(Config::load(Some(file.path())).unwrap_err(), ConfigError::Parse(_)));
    }

    #[test]
    fn test_validate_requires_servers() {
        let config = Config::default();
        assert!(matches!(config.validate().unwrap_err(), ConfigError::Invalid(_)));
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let mut config = valid_config();
        config.servers.push(config.servers[0].clone());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate server name"));
    }

    #[test]
    fn test_validate_rejects_empty_name() {
        let mut config = valid_config();
        config.servers[0].name = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = valid_config();
        config.servers[0].endpoint = "ftp://db01.internal/".to_string();
        assert!(config.validate().is_err());

        config.servers[0].endpoint = "not a url".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_check_time() {
        let mut config = valid_config();
        config.scheduler.check_times = vec!["25:00".to_string()];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("invalid check time"));
    }

    #[test]
    fn test_validate_rejects_zero_lookback() {
        let mut config = valid_config();
        config.monitoring.lookback_hours = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.servers[0].lookback_hours = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_notification_needs_webhook() {
        let mut config = valid_config();
        config.notification.enabled = true;
        assert!(config.validate().is_err());

        config.notification.webhook_url = Some("https://hooks.internal/vigil".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_expand_env_with_default() {
        assert_eq!(expand_env("${VIGIL_TEST_UNSET_VAR:fallback}").unwrap(), "fallback");
    }

    #[test]
    fn test_expand_env_set_variable() {
        // SAFETY: test-local variable name, no concurrent reader depends on it.
        unsafe { env::set_var("VIGIL_TEST_TOKEN", "s3cret") };
        assert_eq!(expand_env("Bearer ${VIGIL_TEST_TOKEN}").unwrap(), "Bearer s3cret");
    }

    #[test]
    fn test_expand_env_unset_without_default_errors() {
        assert!(expand_env("${VIGIL_TEST_DEFINITELY_UNSET}").is_err());
    }

    #[test]
    fn test_expand_env_passthrough() {
        assert_eq!(expand_env("plain-token").unwrap(), "plain-token");
    }

    #[test]
    fn test_expand_env_unterminated_reference() {
        assert!(expand_env("${OOPS").is_err());
    }
}

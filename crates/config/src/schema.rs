/// Config schema types (monitor, processor, reconciliation, store).
use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHECK_PERIOD_MS: u64 = 10_000;
pub const DEFAULT_STABILITY_PERIOD_MS: u64 = 2_000;
/// Stability periods below this are replaced by the default.
pub const MIN_STABILITY_PERIOD_MS: i64 = 1_000;
pub const DEFAULT_PROCESSOR_ID: &str = "Default";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DirmonConfig {
    pub monitor: MonitorConfig,
    pub processor: ProcessorConfig,
    pub reconcile: ReconcileConfig,
    pub store: StoreConfig,
    /// How long shutdown waits for an in-flight poll tick.
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

impl Default for DirmonConfig {
    fn default() -> Self {
        Self {
            monitor: MonitorConfig::default(),
            processor: ProcessorConfig::default(),
            reconcile: ReconcileConfig::default(),
            store: StoreConfig::default(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl DirmonConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    /// Configured database URL, or a SQLite file in the data directory.
    pub fn database_url(&self) -> String {
        self.store
            .database_url
            .clone()
            .unwrap_or_else(|| default_database_url(&crate::loader::data_dir()))
    }
}

fn default_shutdown_grace_ms() -> u64 {
    1_000
}

/// The monitored directory and how it is polled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Directory to monitor. Required.
    pub dir: Option<PathBuf>,
    /// Regex a file name must match in full. Unset matches everything.
    pub file_regex: Option<String>,
    /// Poll interval; unset or ≤ 0 means 10 s.
    pub check_period_ms: Option<i64>,
    /// Quiet time before a file is processed; unset or < 1000 means 2 s.
    pub stability_period_ms: Option<i64>,
}

impl MonitorConfig {
    pub fn file_regex(&self) -> &str {
        self.file_regex.as_deref().unwrap_or(".*")
    }

    pub fn check_period(&self) -> Duration {
        let ms = match self.check_period_ms {
            Some(ms) if ms > 0 => ms as u64,
            _ => DEFAULT_CHECK_PERIOD_MS,
        };
        Duration::from_millis(ms)
    }

    pub fn stability_period(&self) -> Duration {
        let ms = match self.stability_period_ms {
            Some(ms) if ms >= MIN_STABILITY_PERIOD_MS => ms as u64,
            _ => DEFAULT_STABILITY_PERIOD_MS,
        };
        Duration::from_millis(ms)
    }
}

/// Which processor handles changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub id: String,
    /// Command for the `Shell` processor.
    pub command: Option<String>,
    /// Per-invocation limit for the `Shell` processor. Unset waits forever.
    pub timeout_secs: Option<u64>,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            id: DEFAULT_PROCESSOR_ID.into(),
            command: None,
            timeout_secs: None,
        }
    }
}

impl ProcessorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Timers of the reconciliation passes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub startup_delay_ms: u64,
    /// Zero falls back to the default.
    pub retry_interval_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            startup_delay_ms: 10_000,
            retry_interval_ms: DEFAULT_RETRY_INTERVAL_MS,
        }
    }
}

pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 120_000;

impl ReconcileConfig {
    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        match self.retry_interval_ms {
            0 => Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            ms => Duration::from_millis(ms),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// sqlx SQLite URL, e.g. `sqlite:///var/lib/dirmon/dirmon.db?mode=rwc`.
    pub database_url: Option<String>,
}

pub fn default_database_url(data_dir: &std::path::Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join("dirmon.db").display())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: DirmonConfig = toml::from_str("").unwrap();
        assert!(config.monitor.dir.is_none());
        assert_eq!(config.monitor.file_regex(), ".*");
        assert_eq!(config.monitor.check_period(), Duration::from_secs(10));
        assert_eq!(config.monitor.stability_period(), Duration::from_secs(2));
        assert_eq!(config.processor.id, "Default");
        assert_eq!(config.reconcile.startup_delay(), Duration::from_secs(10));
        assert_eq!(config.reconcile.retry_interval(), Duration::from_secs(120));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(1));
    }

    #[test]
    fn out_of_range_periods_are_defaulted() {
        let config: DirmonConfig = toml::from_str(
            r#"
[monitor]
check_period_ms = -5
stability_period_ms = 999

[reconcile]
retry_interval_ms = 0
"#,
        )
        .unwrap();
        assert_eq!(config.monitor.check_period(), Duration::from_secs(10));
        assert_eq!(config.monitor.stability_period(), Duration::from_secs(2));
        assert_eq!(config.reconcile.retry_interval(), Duration::from_secs(120));
    }

    #[test]
    fn in_range_periods_are_kept() {
        let config: DirmonConfig = toml::from_str(
            r#"
shutdown_grace_ms = 250

[monitor]
dir = "/srv/inbox"
file_regex = '.*\.csv'
check_period_ms = 500
stability_period_ms = 1000

[processor]
id = "Shell"
command = "upload"
timeout_secs = 30
"#,
        )
        .unwrap();
        assert_eq!(config.monitor.dir, Some(PathBuf::from("/srv/inbox")));
        assert_eq!(config.monitor.file_regex(), r".*\.csv");
        assert_eq!(config.monitor.check_period(), Duration::from_millis(500));
        assert_eq!(config.monitor.stability_period(), Duration::from_millis(1000));
        assert_eq!(config.processor.timeout(), Some(Duration::from_secs(30)));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(250));
    }

    #[test]
    fn explicit_database_url_wins() {
        let mut config = DirmonConfig::default();
        config.store.database_url = Some("sqlite::memory:".into());
        assert_eq!(config.database_url(), "sqlite::memory:");
    }

    #[test]
    fn default_database_url_points_into_data_dir() {
        let url = default_database_url(std::path::Path::new("/var/lib/dirmon"));
        assert_eq!(url, "sqlite:///var/lib/dirmon/dirmon.db?mode=rwc");
    }
}

use crate::ConfigError;
use crate::aggregator::FetchStrategy;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(3600);

/// Where and how CSV artifacts are written.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportConfig {
    pub export_dir: PathBuf,
    /// Artifacts older than this are pruned on the next export.
    pub retention: Duration,
    pub exclude_from_backup: bool,
}

impl ExportConfig {
    pub fn new(export_dir: impl Into<PathBuf>) -> Self {
        Self {
            export_dir: export_dir.into(),
            retention: DEFAULT_RETENTION,
            exclude_from_backup: true,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// `Documents/HealthStats`, or `./exports` when there is no documents dir.
    pub fn default_export_dir() -> PathBuf {
        dirs::document_dir()
            .map(|d| d.join("HealthStats"))
            .unwrap_or_else(|| PathBuf::from("exports"))
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self::new(Self::default_export_dir())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    pub export: ExportConfig,
    pub fetch_strategy: FetchStrategy,
    pub log_level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_with(|k| std::env::var(k).ok())
    }

    /// Testable helper that reads configuration values using the provided
    /// function instead of the process environment.
    pub fn from_env_with<F>(mut get: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let export_dir = get("HEALTH_STATS_EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(ExportConfig::default_export_dir);

        let retention = match get("HEALTH_STATS_RETENTION_SECS") {
            Some(v) => v
                .trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .map_err(|_| ConfigError::Invalid {
                    name: "HEALTH_STATS_RETENTION_SECS",
                    value: v,
                })?,
            None => DEFAULT_RETENTION,
        };

        let exclude_from_backup = match get("HEALTH_STATS_EXCLUDE_FROM_BACKUP") {
            Some(v) => parse_bool(&v).ok_or(ConfigError::Invalid {
                name: "HEALTH_STATS_EXCLUDE_FROM_BACKUP",
                value: v,
            })?,
            None => true,
        };

        let fetch_strategy = match get("HEALTH_STATS_FETCH_STRATEGY") {
            Some(v) => FetchStrategy::parse(&v).ok_or(ConfigError::Invalid {
                name: "HEALTH_STATS_FETCH_STRATEGY",
                value: v,
            })?,
            None => FetchStrategy::default(),
        };

        let log_level = get("HEALTH_STATS_LOG_LEVEL")
            .or_else(|| get("RUST_LOG"))
            .unwrap_or_else(|| "info".into());

        Ok(Self {
            export: ExportConfig {
                export_dir,
                retention,
                exclude_from_backup,
            },
            fetch_strategy,
            log_level,
        })
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

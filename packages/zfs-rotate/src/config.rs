// Configuration management
use crate::backend::zfs::DEFAULT_ZFS_PATH;
use crate::period::Period;
use crate::rotation::DEFAULT_CONCURRENCY;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;

/// Environment variable naming a config file
pub const CONFIG_ENV: &str = "ZFS_ROTATE_CONFIG";

/// Tool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Prefix of every snapshot name this tool owns
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Path to the zfs binary
    #[serde(default = "default_zfs_path")]
    pub zfs_path: PathBuf,

    /// Maximum number of datasets rotated at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Stamp snapshots in UTC instead of local time
    #[serde(default)]
    pub utc: bool,

    /// Keep-count overrides per period
    #[serde(default)]
    pub retention: RetentionCounts,
}

/// Signed keep-counts as written by the user; validated into a
/// `RetentionPolicy` before anything touches the backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetentionCounts {
    #[serde(default, alias = "hours", skip_serializing_if = "Option::is_none")]
    pub hourly: Option<i64>,
    #[serde(default, alias = "days", skip_serializing_if = "Option::is_none")]
    pub daily: Option<i64>,
    #[serde(default, alias = "months", skip_serializing_if = "Option::is_none")]
    pub monthly: Option<i64>,
    #[serde(default, alias = "years", skip_serializing_if = "Option::is_none")]
    pub yearly: Option<i64>,
}

impl RetentionCounts {
    /// Counts that were set, in period order
    pub fn counts(&self) -> Vec<(Period, i64)> {
        [
            (Period::Hourly, self.hourly),
            (Period::Daily, self.daily),
            (Period::Monthly, self.monthly),
            (Period::Yearly, self.yearly),
        ]
        .into_iter()
        .filter_map(|(period, count)| count.map(|count| (period, count)))
        .collect()
    }

    pub fn set(&mut self, period: Period, count: i64) {
        let slot = match period {
            Period::Hourly => &mut self.hourly,
            Period::Daily => &mut self.daily,
            Period::Monthly => &mut self.monthly,
            Period::Yearly => &mut self.yearly,
        };
        *slot = Some(count);
    }
}

fn default_prefix() -> String {
    "auto".to_string()
}

fn default_zfs_path() -> PathBuf {
    PathBuf::from(DEFAULT_ZFS_PATH)
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

impl Config {
    /// Load configuration with the following priority:
    /// 1. `explicit` (the --config flag)
    /// 2. ZFS_ROTATE_CONFIG environment variable
    /// 3. ~/.config/zfs-rotate/config.toml, if present
    /// 4. Defaults
    pub async fn load(explicit: Option<&Path>) -> Result<Self> {
        // Priority 1: Command line
        if let Some(path) = explicit {
            return Self::from_file(path).await;
        }

        // Priority 2: Environment variable
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&env_path)).await;
        }

        // Priority 3: Config file
        if let Some(config_path) = Self::config_file_path() {
            if config_path.exists() {
                return Self::from_file(&config_path).await;
            }
        }

        // Priority 4: Default
        Ok(Self::default())
    }

    /// Read and parse one TOML file
    pub async fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Get the config file path (~/.config/zfs-rotate/config.toml)
    fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("zfs-rotate").join("config.toml"))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            zfs_path: default_zfs_path(),
            concurrency: default_concurrency(),
            utc: false,
            retention: RetentionCounts::default(),
        }
    }
}

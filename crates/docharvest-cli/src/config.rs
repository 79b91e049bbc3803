//! Configuration loading and resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use docharvest::{IgnorePatterns, Timeouts, BROWSER_TEMP_PATTERNS};

/// Default template for final file names.
pub const DEFAULT_FILENAME_TEMPLATE: &str = "{date}_{category}_{subject}";

/// Effective settings of one harvest run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    /// Directory the browser downloads into and the watcher observes.
    pub download_dir: PathBuf,
    /// Where renamed documents end up. Defaults to `download_dir`.
    pub output_dir: Option<PathBuf>,
    /// Template for final names; `{key}` expands any document attribute.
    pub filename_template: String,
    pub headless: bool,
    pub chromium_path: Option<PathBuf>,
    pub poll_interval_ms: u64,
    /// Temporary download names to ignore, as shell patterns.
    pub ignore_patterns: Vec<String>,
    pub timeouts: TimeoutConfig,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            download_dir: PathBuf::from("."),
            output_dir: None,
            filename_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            headless: true,
            chromium_path: None,
            poll_interval_ms: 100,
            ignore_patterns: BROWSER_TEMP_PATTERNS.iter().map(|p| p.to_string()).collect(),
            timeouts: TimeoutConfig::default(),
        }
    }
}

/// `[timeouts]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub login_secs: u64,
    pub second_factor_secs: u64,
    pub settle_ms: u64,
    /// Give up on a single download after this long. Unset waits forever.
    pub download_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            login_secs: 30,
            second_factor_secs: 120,
            settle_ms: 1000,
            download_secs: Some(300),
        }
    }
}

impl HarvestConfig {
    pub fn session_timeouts(&self) -> Timeouts {
        Timeouts {
            login: Duration::from_secs(self.timeouts.login_secs),
            second_factor: Duration::from_secs(self.timeouts.second_factor_secs),
            settle: Duration::from_millis(self.timeouts.settle_ms),
        }
    }

    pub fn download_timeout(&self) -> Option<Duration> {
        self.timeouts.download_secs.map(Duration::from_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn ignore(&self) -> Result<IgnorePatterns> {
        IgnorePatterns::new(&self.ignore_patterns).context("invalid ignore_patterns")
    }

    pub fn output_dir(&self) -> &Path {
        self.output_dir.as_deref().unwrap_or(&self.download_dir)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to render configuration")
    }
}

/// Resolve the config file path.
///
/// Priority: explicit flag, `DOCHARVEST_CONFIG`, `./docharvest.toml`,
/// then `~/.config/docharvest/config.toml`.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(env_path) = std::env::var("DOCHARVEST_CONFIG") {
        return PathBuf::from(env_path);
    }

    let cwd_config = PathBuf::from("docharvest.toml");
    if cwd_config.exists() {
        return cwd_config;
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("docharvest")
        .join("config.toml")
}

/// Load the configuration, falling back to defaults when no file exists.
///
/// An explicitly requested file must exist.
pub fn load(explicit: Option<&str>) -> Result<HarvestConfig> {
    let path = resolve_config_path(explicit);
    if !path.exists() {
        if explicit.is_some() {
            anyhow::bail!("config file not found: {}", path.display());
        }
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(HarvestConfig::default());
    }

    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = HarvestConfig::from_toml(&text)
        .with_context(|| format!("in {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

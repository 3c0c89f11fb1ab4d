use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE: &str = "deploy-tracker.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub tracking: TrackingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestratorConfig {
    pub url: String,
    /// SSE endpoint for progress events, relative to `url`.
    #[serde(default = "default_push_path")]
    pub push_path: String,
    #[serde(default = "default_true")]
    pub push_enabled: bool,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_push_path() -> String {
    "/hub/deploy".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            push_path: default_push_path(),
            push_enabled: true,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl OrchestratorConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PlatformConfig {
    /// Namespace targeted until an action or platform load names another.
    /// Unset means the orchestrator's own default platform.
    #[serde(default)]
    pub default_namespace: Option<String>,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub user_email: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            default_namespace: None,
            branch: default_branch(),
            user_email: None,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct TrackingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Pause after `done` before trusting a platform refresh.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_platform_debounce_ms")]
    pub platform_debounce_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_settle_delay_ms() -> u64 {
    3000
}

fn default_platform_debounce_ms() -> u64 {
    1000
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            platform_debounce_ms: default_platform_debounce_ms(),
        }
    }
}

impl TrackingConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn platform_debounce(&self) -> Duration {
        Duration::from_millis(self.platform_debounce_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct LoggingConfig {
    pub level: Option<String>,
    pub directory: Option<String>,
    pub retention_days: Option<u64>,
}

impl Config {
    pub fn load_with_path() -> Result<(Self, Option<PathBuf>)> {
        let mut candidates = Vec::new();

        if let Ok(explicit) = std::env::var("DEPLOY_TRACKER_CONFIG") {
            candidates.push(PathBuf::from(explicit));
        }

        candidates.push(PathBuf::from(CONFIG_FILE));

        if let Some(dir) = dirs::config_dir() {
            candidates.push(dir.join("deploy-tracker").join(CONFIG_FILE));
        }

        candidates.push(crate::paths::config_dir().join(CONFIG_FILE));

        for path in candidates {
            if path.exists() {
                let config = Self::load_from(&path)?;
                return Ok((config, Some(path)));
            }
        }

        Ok((Config::default(), None))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Config at {:?} is invalid: {}", path, e))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let parsed = url::Url::parse(self.orchestrator.url.trim()).map_err(|e| {
            anyhow::anyhow!(
                "Orchestrator URL '{}' is invalid: {}",
                self.orchestrator.url,
                e
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            anyhow::bail!(
                "Orchestrator URL must start with http:// or https://, got: {}",
                self.orchestrator.url
            );
        }
        if let Some(ns) = &self.platform.default_namespace {
            if ns.trim().is_empty() {
                anyhow::bail!("platform.default_namespace cannot be empty when set");
            }
        }
        if self.platform.branch.trim().is_empty() {
            anyhow::bail!("platform.branch cannot be empty");
        }
        if self.tracking.poll_interval_ms == 0 {
            anyhow::bail!("tracking.poll_interval_ms must be greater than 0");
        }
        if self.orchestrator.request_timeout_secs == 0 {
            anyhow::bail!("orchestrator.request_timeout_secs must be greater than 0");
        }
        Ok(())
    }
}

//! ---
//! xp_section: "01-core-functionality"
//! xp_subsection: "module"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Shared primitives and utilities for the experience host."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_home_url() -> String {
    "exp://expo.io/@exponent/home".to_owned()
}

fn default_deep_link_delimiter() -> char {
    '+'
}

fn default_show_onboarding() -> bool {
    true
}

fn default_development() -> bool {
    cfg!(debug_assertions)
}

fn default_optimistic_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_remote_kernel_url() -> String {
    "https://exp.host/@exponent/home/index.exp?platform=android".to_owned()
}

fn default_local_kernel_url() -> String {
    "http://127.0.0.1:8081".to_owned()
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_user_agent() -> String {
    format!("xphost/{}", env!("CARGO_PKG_VERSION"))
}

fn default_error_capacity() -> usize {
    100
}

fn default_preferences_path() -> PathBuf {
    PathBuf::from("target/xphost/preferences.json")
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_log_to_file() -> bool {
    true
}

/// Primary configuration object for the experience host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HostConfig {
    #[serde(default)]
    pub host: HostSection,
    #[serde(default)]
    pub kernel: KernelConfig,
    #[serde(default)]
    pub fetcher: FetcherConfig,
    #[serde(default)]
    pub errors: ErrorLogConfig,
    #[serde(default)]
    pub preferences: PreferencesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`HostConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedHostConfig {
    pub config: HostConfig,
    pub source: Option<PathBuf>,
}

impl HostConfig {
    pub const ENV_CONFIG_PATH: &str = "XPHOST_CONFIG";

    /// Load configuration from disk, respecting the `XPHOST_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration together with the effective source path.
    ///
    /// Unlike an orchestrator deployment the host can run without any file at
    /// all, so a miss on every candidate yields the defaults.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedHostConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedHostConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedHostConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        debug!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using defaults"
        );
        Ok(LoadedHostConfig {
            config: HostConfig::default(),
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        contents
            .parse::<HostConfig>()
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.host.validate()?;
        self.kernel.validate()?;
        if self.errors.capacity == 0 {
            return Err(anyhow!("errors.capacity must be at least 1"));
        }
        Ok(())
    }
}

impl std::str::FromStr for HostConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HostConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Identity of the host and the behaviour toggles that apply to every experience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSection {
    /// Manifest URL that designates the home surface instead of an experience.
    #[serde(default = "default_home_url")]
    pub home_url: String,
    /// Character separating a manifest URL from its deep-link suffix.
    #[serde(default = "default_deep_link_delimiter")]
    pub deep_link_delimiter: char,
    /// Whether the onboarding overlay may be shown on the first launch.
    #[serde(default = "default_show_onboarding")]
    pub show_onboarding: bool,
    /// Development builds synthesise stack frames for errors that carry none.
    #[serde(default = "default_development")]
    pub development: bool,
}

impl Default for HostSection {
    fn default() -> Self {
        Self {
            home_url: default_home_url(),
            deep_link_delimiter: default_deep_link_delimiter(),
            show_onboarding: default_show_onboarding(),
            development: default_development(),
        }
    }
}

impl HostSection {
    pub fn validate(&self) -> Result<()> {
        if self.home_url.trim().is_empty() {
            return Err(anyhow!("host.home_url must not be empty"));
        }
        if self.deep_link_delimiter == '/' {
            return Err(anyhow!("host.deep_link_delimiter cannot be the path separator"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KernelConfig {
    /// How long an optimistic handoff waits for its surface before it is abandoned.
    #[serde(default = "default_optimistic_timeout", rename = "optimistic_timeout_ms")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub optimistic_timeout: Duration,
    /// Load the home bundle from the published remote URL instead of a local dev server.
    #[serde(default)]
    pub use_remote_bundle: bool,
    #[serde(default = "default_remote_kernel_url")]
    pub remote_kernel_url: String,
    /// Fallback for the local dev server when no base URL has been cached.
    #[serde(default = "default_local_kernel_url")]
    pub default_local_kernel_url: String,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            optimistic_timeout: default_optimistic_timeout(),
            use_remote_bundle: false,
            remote_kernel_url: default_remote_kernel_url(),
            default_local_kernel_url: default_local_kernel_url(),
        }
    }
}

impl KernelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.optimistic_timeout.is_zero() {
            return Err(anyhow!("kernel.optimistic_timeout_ms must be greater than zero"));
        }
        Url::parse(&self.remote_kernel_url)
            .with_context(|| format!("invalid kernel.remote_kernel_url {}", self.remote_kernel_url))?;
        Url::parse(&self.default_local_kernel_url).with_context(|| {
            format!(
                "invalid kernel.default_local_kernel_url {}",
                self.default_local_kernel_url
            )
        })?;
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    #[serde(default = "default_fetch_timeout", rename = "timeout_secs")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorLogConfig {
    /// Number of reported errors retained before the oldest is evicted.
    #[serde(default = "default_error_capacity")]
    pub capacity: usize,
}

impl Default for ErrorLogConfig {
    fn default() -> Self {
        Self {
            capacity: default_error_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreferencesConfig {
    #[serde(default = "default_preferences_path")]
    pub path: PathBuf,
}

impl Default for PreferencesConfig {
    fn default() -> Self {
        Self {
            path: default_preferences_path(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write a daily rolling JSON file under `directory`.
    #[serde(default = "default_log_to_file")]
    pub file: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file: default_log_to_file(),
        }
    }
}

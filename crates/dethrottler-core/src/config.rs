use crate::duration::{format_duration, humanized};
use crate::error::{ConfigError, Result};
use crate::types::{TaintDescriptor, TaintEffect, Thresholds, DEFAULT_TAINT_KEY};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable consulted when `nodeName` is not set in the file
pub const NODE_NAME_ENV: &str = "NODE_NAME";

/// Shortest accepted poll interval
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Longest accepted poll interval
pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// How to reach the cluster API server
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApiServerConfig {
    /// Base URL (e.g. "https://10.0.0.1:6443"). When unset the in-cluster
    /// service environment is used.
    pub url: Option<String>,
    /// File holding a bearer token
    pub token_file: Option<PathBuf>,
    /// PEM bundle trusted in addition to the system roots
    pub ca_file: Option<PathBuf>,
    /// Skip TLS certificate verification (development only)
    pub insecure: bool,
}

/// Top-level dethrottler configuration, read from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DethrottlerConfig {
    /// Node this controller governs. Falls back to `$NODE_NAME`.
    pub node_name: String,
    pub taint_key: String,
    pub taint_effect: TaintEffect,
    pub thresholds: Thresholds,
    #[serde(with = "humanized")]
    pub poll_interval: Duration,
    /// Minimum time since the last overloaded sample before the taint is removed
    #[serde(with = "humanized")]
    pub cooldown_period: Duration,
    /// Upper bound for the best-effort taint removal at shutdown
    #[serde(with = "humanized")]
    pub shutdown_timeout: Duration,
    pub api_server: ApiServerConfig,
    /// kubeconfig whose current context is used when neither `apiServer.url`
    /// nor the in-cluster environment is available. Relative paths resolve
    /// against the config file's directory.
    pub kubeconfig_path: Option<PathBuf>,
    /// Kernel load-average source
    pub load_avg_path: PathBuf,
    /// Serve Prometheus metrics on this address when set
    pub metrics_addr: Option<SocketAddr>,
    /// Absolute path the config was loaded from
    #[serde(skip)]
    pub config_file_path: Option<PathBuf>,
}

impl Default for DethrottlerConfig {
    fn default() -> Self {
        Self {
            node_name: String::new(),
            taint_key: DEFAULT_TAINT_KEY.to_string(),
            taint_effect: TaintEffect::NoSchedule,
            thresholds: Thresholds::default(),
            poll_interval: Duration::from_secs(10),
            cooldown_period: Duration::from_secs(5 * 60),
            shutdown_timeout: Duration::from_secs(10),
            api_server: ApiServerConfig::default(),
            kubeconfig_path: None,
            load_avg_path: PathBuf::from("/proc/loadavg"),
            metrics_addr: None,
            config_file_path: None,
        }
    }
}

impl DethrottlerConfig {
    /// Load, default and validate the config file at `path`, reading
    /// `$NODE_NAME` from the process environment.
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_env(path, |name| std::env::var(name).ok())
    }

    /// Like [`DethrottlerConfig::load`] but with an injectable environment lookup
    pub fn load_with_env(path: &Path, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let display = path.display().to_string();

        let abs_path = std::path::absolute(path)
            .map_err(|e| ConfigError::invalid_path(&display, format!("cannot resolve: {}", e)))?;

        let metadata = std::fs::metadata(&abs_path)
            .map_err(|e| ConfigError::unreadable(abs_path.display().to_string(), e.to_string()))?;
        if metadata.is_dir() {
            return Err(ConfigError::invalid_path(
                abs_path.display().to_string(),
                "is a directory, not a file",
            ));
        }

        let has_yaml_ext = abs_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if !has_yaml_ext {
            return Err(ConfigError::invalid_path(
                abs_path.display().to_string(),
                "must have a .yaml or .yml extension",
            ));
        }

        let content = std::fs::read_to_string(&abs_path)
            .map_err(|e| ConfigError::unreadable(abs_path.display().to_string(), e.to_string()))?;

        let mut config = Self::from_yaml_str(&content, &abs_path.display().to_string())?;
        if let Some(dir) = abs_path.parent() {
            config.kubeconfig_path = config.kubeconfig_path.take().map(|p| dir.join(p));
        }
        config.config_file_path = Some(abs_path);
        config.apply_env_defaults(env);
        config.validate()?;

        debug!(
            "Loaded config from {:?}",
            config.config_file_path.as_deref().unwrap_or(path)
        );
        Ok(config)
    }

    /// Parse YAML without validating. `origin` names the source in errors.
    pub fn from_yaml_str(content: &str, origin: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let raw: serde_yaml::Value = serde_yaml::from_str(content)
            .map_err(|e| ConfigError::parse_error(origin, e.to_string()))?;
        if raw.is_null() {
            return Ok(Self::default());
        }

        // Checked up front so a typo reports the effect-specific diagnostic
        if let Some(effect) = raw.get("taintEffect").and_then(serde_yaml::Value::as_str) {
            effect.parse::<TaintEffect>()?;
        }

        let mut config: Self = serde_yaml::from_value(raw)
            .map_err(|e| ConfigError::parse_error(origin, e.to_string()))?;

        if config.taint_key.is_empty() {
            config.taint_key = DEFAULT_TAINT_KEY.to_string();
        }
        Ok(config)
    }

    /// Fill `node_name` from the environment if the file left it empty
    pub fn apply_env_defaults(&mut self, env: impl Fn(&str) -> Option<String>) {
        if self.node_name.is_empty() {
            if let Some(name) = env(NODE_NAME_ENV) {
                self.node_name = name.trim().to_string();
            }
        }
    }

    /// Check the invariants the controller relies on.
    ///
    /// An empty node name is deliberately not rejected here; the controller
    /// refuses to start without one.
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval < MIN_POLL_INTERVAL {
            return Err(ConfigError::validation_failed(
                format!(
                    "pollInterval must be at least {}, got {}",
                    format_duration(MIN_POLL_INTERVAL),
                    format_duration(self.poll_interval)
                ),
                "Set pollInterval to a value between 1s and 5m",
            ));
        }
        if self.poll_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::validation_failed(
                format!(
                    "pollInterval should not exceed {}, got {}",
                    format_duration(MAX_POLL_INTERVAL),
                    format_duration(self.poll_interval)
                ),
                "Set pollInterval to a value between 1s and 5m",
            ));
        }

        if self.cooldown_period < self.poll_interval {
            return Err(ConfigError::validation_failed(
                format!(
                    "cooldownPeriod ({}) must not be shorter than pollInterval ({})",
                    format_duration(self.cooldown_period),
                    format_duration(self.poll_interval)
                ),
                "Increase cooldownPeriod or decrease pollInterval",
            ));
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::validation_failed(
                "shutdownTimeout must be greater than zero",
                "Set shutdownTimeout to a few seconds (default: 10s)",
            ));
        }

        if self.taint_key.trim().is_empty() {
            return Err(ConfigError::validation_failed(
                "taintKey must not be empty",
                format!("Omit taintKey to use the default '{}'", DEFAULT_TAINT_KEY),
            ));
        }

        let t = &self.thresholds;
        if [t.load1m, t.load5m, t.load15m]
            .iter()
            .any(|v| !v.is_finite() || *v < 0.0)
        {
            return Err(ConfigError::validation_failed(
                "load thresholds must be finite and cannot be negative",
                "Use 0 to disable a period, or a positive per-core load value",
            ));
        }

        if !t.any_enabled() {
            return Err(ConfigError::validation_failed(
                "at least one load threshold must be set (non-zero)",
                "Set one of thresholds.load1m, thresholds.load5m or thresholds.load15m",
            ));
        }

        Ok(())
    }

    /// The taint identity configured for this controller
    pub fn taint_descriptor(&self) -> TaintDescriptor {
        TaintDescriptor::new(self.taint_key.clone(), self.taint_effect)
    }
}

//! File-based configuration for a whole fetch deployment.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use fetchflow_store::{LockRetry, PoolConfig, SqliteTuning};
use serde::{Deserialize, Serialize};

use crate::breaker::{BreakerConfig, BreakerRegistry};
use crate::executor::{DispatchStrategy, OrchestratorConfig};
use crate::fetcher::ProcessFetcher;
use crate::ratelimit::{AdaptiveConfig, DistributedConfig, RateLimitConfig, MIN_RATE};
use crate::retry::RetryPassConfig;

pub const CONFIG_ENV: &str = "FETCHFLOW_CONFIG";
pub const REDIS_URL_ENV: &str = "FETCHFLOW_REDIS_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("config {path} is neither valid JSON nor YAML: {message}")]
    Parse { path: PathBuf, message: String },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    #[default]
    Threads,
    Processes,
    Cooperative,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitMode {
    #[default]
    Fixed,
    Adaptive,
    Distributed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FetchflowConfig {
    pub strategy: StrategyKind,
    pub max_workers: usize,
    pub max_concurrent: usize,
    pub worker_command: Option<String>,
    pub worker_args: Vec<String>,
    pub worker_timeout_secs: u64,
    pub rate_limit: RateLimitSection,
    pub retry: RetrySection,
    pub breakers: BreakersSection,
    pub store: StoreSection,
}

impl Default for FetchflowConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::default(),
            max_workers: 5,
            max_concurrent: 10,
            worker_command: None,
            worker_args: Vec::new(),
            worker_timeout_secs: 120,
            rate_limit: RateLimitSection::default(),
            retry: RetrySection::default(),
            breakers: BreakersSection::default(),
            store: StoreSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitSection {
    pub mode: RateLimitMode,
    /// Calls per second; for adaptive mode the starting rate.
    pub rate: f64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub adaptation_interval_secs: u64,
    pub redis_url: String,
    pub key: String,
}

impl Default for RateLimitSection {
    fn default() -> Self {
        let adaptive = AdaptiveConfig::default();
        let distributed = DistributedConfig::default();
        Self {
            mode: RateLimitMode::default(),
            rate: 1.0,
            min_rate: adaptive.min_rate,
            max_rate: adaptive.max_rate,
            adaptation_interval_secs: adaptive.adaptation_interval.as_secs(),
            redis_url: distributed.redis_url,
            key: distributed.key,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySection {
    pub enabled: bool,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            enabled: true,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakerSection {
    pub failure_threshold: u32,
    pub recovery_timeout_secs: u64,
    pub success_threshold: u32,
}

impl Default for BreakerSection {
    fn default() -> Self {
        Self::from(&BreakerConfig::default())
    }
}

impl From<&BreakerConfig> for BreakerSection {
    fn from(c: &BreakerConfig) -> Self {
        Self {
            failure_threshold: c.failure_threshold,
            recovery_timeout_secs: c.recovery_timeout.as_secs(),
            success_threshold: c.success_threshold,
        }
    }
}

impl BreakerSection {
    pub fn to_breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            success_threshold: self.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BreakersSection {
    pub default: BreakerSection,
    pub overrides: BTreeMap<String, BreakerSection>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreSection {
    pub path: Option<PathBuf>,
    pub max_connections: usize,
    pub acquire_timeout_ms: u64,
    pub busy_timeout_ms: u64,
    pub batch_size: usize,
    /// Attempts at `BEGIN IMMEDIATE` before giving up on a locked database.
    pub lock_retries: u32,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 10,
            acquire_timeout_ms: 30_000,
            busy_timeout_ms: 30_000,
            batch_size: 1_000,
            lock_retries: LockRetry::default().max_attempts,
        }
    }
}

impl FetchflowConfig {
    /// Reads a JSON or YAML file. Keys that are absent take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&content).map_err(|message| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        })?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Loads `explicit`, else the file named by `FETCHFLOW_CONFIG`, else
    /// defaults (still subject to environment overrides).
    pub fn load_or_default(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::load(path),
            None => {
                let mut config = Self::default();
                config.apply_env();
                config.validate()?;
                Ok(config)
            }
        }
    }

    fn parse(content: &str) -> Result<Self, String> {
        let trimmed = content.trim_start();
        if trimmed.is_empty() {
            return Ok(Self::default());
        }
        if trimmed.starts_with('{') {
            return serde_json::from_str(content).map_err(|e| e.to_string());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(REDIS_URL_ENV) {
            if !url.trim().is_empty() {
                self.rate_limit.redis_url = url;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.max_workers == 0 {
            return invalid("max_workers must be at least 1");
        }
        if self.max_concurrent == 0 {
            return invalid("max_concurrent must be at least 1");
        }
        if self.store.max_connections == 0 {
            return invalid("store.max_connections must be at least 1");
        }
        if self.store.batch_size == 0 {
            return invalid("store.batch_size must be at least 1");
        }
        let rl = &self.rate_limit;
        if !(rl.rate.is_finite() && rl.rate >= 0.0) {
            return invalid("rate_limit.rate must be a non-negative number");
        }
        if rl.rate > 0.0 && rl.rate < MIN_RATE {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.rate must be 0 (unlimited) or at least {MIN_RATE}"
            )));
        }
        if rl.mode == RateLimitMode::Adaptive {
            if !(rl.min_rate.is_finite() && rl.min_rate >= MIN_RATE) {
                return Err(ConfigError::Invalid(format!(
                    "rate_limit.min_rate must be at least {MIN_RATE}"
                )));
            }
            if !rl.max_rate.is_finite() || rl.min_rate > rl.max_rate {
                return invalid("rate_limit.min_rate must not exceed rate_limit.max_rate");
            }
        }
        if self.strategy == StrategyKind::Processes && self.worker_command.is_none() {
            return invalid("the processes strategy needs worker_command");
        }
        Ok(())
    }

    pub fn rate_limit_config(&self) -> RateLimitConfig {
        let rl = &self.rate_limit;
        match rl.mode {
            RateLimitMode::Fixed => RateLimitConfig::Fixed { rate: rl.rate },
            RateLimitMode::Adaptive => RateLimitConfig::Adaptive(AdaptiveConfig {
                initial_rate: rl.rate,
                min_rate: rl.min_rate,
                max_rate: rl.max_rate,
                adaptation_interval: Duration::from_secs(rl.adaptation_interval_secs),
                ..AdaptiveConfig::default()
            }),
            RateLimitMode::Distributed => RateLimitConfig::Distributed(DistributedConfig {
                rate: rl.rate,
                redis_url: rl.redis_url.clone(),
                key: rl.key.clone(),
                ..DistributedConfig::default()
            }),
        }
    }

    pub fn breaker_registry(&self) -> BreakerRegistry {
        self.breakers.overrides.iter().fold(
            BreakerRegistry::new(self.breakers.default.to_breaker_config()),
            |registry, (name, section)| registry.with_override(name.clone(), section.to_breaker_config()),
        )
    }

    pub fn retry_config(&self) -> RetryPassConfig {
        RetryPassConfig {
            enabled: self.retry.enabled,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
        }
    }

    /// The worker command as a fetcher, if one is configured.
    pub fn process_fetcher(&self) -> Option<ProcessFetcher> {
        let program = self.worker_command.as_ref()?;
        Some(
            ProcessFetcher::new(program)
                .with_args(self.worker_args.iter().cloned())
                .with_timeout(Duration::from_secs(self.worker_timeout_secs)),
        )
    }

    pub fn dispatch_strategy(&self) -> Result<DispatchStrategy, ConfigError> {
        Ok(match self.strategy {
            StrategyKind::Threads => DispatchStrategy::Threads {
                max_workers: self.max_workers,
            },
            StrategyKind::Cooperative => DispatchStrategy::Cooperative {
                max_concurrent: self.max_concurrent,
            },
            StrategyKind::Processes => DispatchStrategy::Processes {
                max_workers: self.max_workers,
                command: self
                    .process_fetcher()
                    .ok_or_else(|| ConfigError::Invalid("the processes strategy needs worker_command".into()))?,
                rate_limit: self.rate_limit_config(),
            },
        })
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        Ok(OrchestratorConfig {
            strategy: self.dispatch_strategy()?,
            retry: self.retry_config(),
        })
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            max_connections: self.store.max_connections,
            acquire_timeout: Duration::from_millis(self.store.acquire_timeout_ms),
            ..PoolConfig::default()
        }
    }

    pub fn sqlite_tuning(&self) -> SqliteTuning {
        SqliteTuning {
            busy_timeout: Duration::from_millis(self.store.busy_timeout_ms),
            ..SqliteTuning::default()
        }
    }

    pub fn lock_retry(&self) -> LockRetry {
        LockRetry {
            max_attempts: self.store.lock_retries.max(1),
            ..LockRetry::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_all_defaults() {
        assert_eq!(FetchflowConfig::parse("").unwrap(), FetchflowConfig::default());
        assert_eq!(FetchflowConfig::parse("{}").unwrap(), FetchflowConfig::default());
    }

    #[test]
    fn yaml_overrides_only_named_keys() {
        let config = FetchflowConfig::parse(
            r#"
strategy: cooperative
max_concurrent: 32
rate_limit:
  mode: adaptive
  rate: 2.5
retry:
  enabled: false
breakers:
  overrides:
    slow_api:
      failure_threshold: 2
      recovery_timeout_secs: 5
      success_threshold: 1
store:
  path: /tmp/items.db
  batch_size: 250
"#,
        )
        .unwrap();

        assert_eq!(config.strategy, StrategyKind::Cooperative);
        assert_eq!(config.max_workers, 5);
        assert_eq!(config.store.max_connections, 10);
        assert_eq!(config.store.batch_size, 250);
        assert!(!config.retry_config().enabled);

        match config.rate_limit_config() {
            RateLimitConfig::Adaptive(a) => {
                assert_eq!(a.initial_rate, 2.5);
                assert_eq!(a.min_rate, 0.1);
                assert_eq!(a.max_rate, 10.0);
            }
            other => panic!("unexpected limiter config {other:?}"),
        }

        let registry = config.breaker_registry();
        assert_eq!(registry.config_for("slow_api").failure_threshold, 2);
        assert_eq!(registry.config_for("slow_api").recovery_timeout, Duration::from_secs(5));
        assert_eq!(registry.config_for("other"), &BreakerConfig::default());

        match config.dispatch_strategy().unwrap() {
            DispatchStrategy::Cooperative { max_concurrent } => assert_eq!(max_concurrent, 32),
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn json_is_accepted() {
        let config = FetchflowConfig::parse(r#"{"max_workers": 3, "retry": {"base_delay_ms": 10}}"#).unwrap();
        assert_eq!(config.max_workers, 3);
        assert_eq!(config.retry_config().base_delay, Duration::from_millis(10));
        assert_eq!(config.retry_config().max_delay, Duration::from_secs(30));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(FetchflowConfig::parse("max_wrokers: 3").is_err());
    }

    #[test]
    fn zero_sizes_fail_validation() {
        let config = FetchflowConfig {
            max_workers: 0,
            ..FetchflowConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = FetchflowConfig::default();
        config.store.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rates_too_small_to_space_are_rejected() {
        let mut config = FetchflowConfig::default();
        config.rate_limit.rate = 1e-20;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.rate_limit.rate = 0.0;
        config.validate().unwrap();

        config.rate_limit.mode = RateLimitMode::Adaptive;
        config.rate_limit.rate = 1.0;
        config.rate_limit.min_rate = 0.0;
        assert!(config.validate().is_err());

        config.rate_limit.min_rate = 0.5;
        config.rate_limit.max_rate = f64::INFINITY;
        assert!(config.validate().is_err());

        config.rate_limit.max_rate = 2.0;
        config.validate().unwrap();
    }

    #[test]
    fn processes_needs_a_command() {
        let config = FetchflowConfig {
            strategy: StrategyKind::Processes,
            ..FetchflowConfig::default()
        };
        assert!(config.validate().is_err());

        let config = FetchflowConfig {
            strategy: StrategyKind::Processes,
            worker_command: Some("fetch-worker".into()),
            worker_args: vec!["--json".into()],
            ..FetchflowConfig::default()
        };
        config.validate().unwrap();
        match config.dispatch_strategy().unwrap() {
            DispatchStrategy::Processes {
                command,
                max_workers,
                rate_limit,
            } => {
                assert_eq!(max_workers, 5);
                assert_eq!(rate_limit, config.rate_limit_config());
                assert_eq!(command.program(), "fetch-worker");
                assert_eq!(command.args(), ["--json".to_string()]);
            }
            other => panic!("unexpected strategy {other:?}"),
        }
    }

    #[test]
    fn load_reads_files_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fetchflow.yaml");
        std::fs::write(&path, "max_workers: 7\nstore:\n  lock_retries: 9\n").unwrap();
        let config = FetchflowConfig::load(&path).unwrap();
        assert_eq!(config.max_workers, 7);
        assert_eq!(config.lock_retry().max_attempts, 9);

        let missing = FetchflowConfig::load(dir.path().join("nope.yaml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}

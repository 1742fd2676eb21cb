//! Runtime configuration.

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The operator's logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,

    /// The data-plane image used by MemoryBrokers.
    pub memory_broker_image: String,
    /// The pull policy of the MemoryBroker image.
    #[serde(default = "Config::default_pull_policy")]
    pub memory_broker_image_pull_policy: String,

    /// The data-plane image used by RedisBrokers.
    pub redis_broker_image: String,
    /// The pull policy of the RedisBroker image.
    #[serde(default = "Config::default_pull_policy")]
    pub redis_broker_image_pull_policy: String,
    /// The image of the embedded Redis deployed for RedisBrokers without a user provided Redis.
    #[serde(default = "Config::default_redis_image")]
    pub redis_image: String,

    /// The image used by replay jobs. Replay jobs are disabled when not set.
    #[serde(default)]
    pub replay_image: Option<String>,
    /// The pull policy of the replay image.
    #[serde(default = "Config::default_pull_policy")]
    pub replay_image_pull_policy: String,

    /// Deploy a status ConfigMap next to every broker.
    #[serde(default)]
    pub broker_status_configmap: bool,

    /// The number of workers of each controller.
    #[serde(default = "Config::default_workers")]
    pub workers: usize,
    /// The namespace watched by the operator, all namespaces when empty.
    #[serde(default)]
    pub watch_namespace: String,
    /// The port of the metrics & healthcheck server.
    #[serde(default = "Config::default_metrics_port")]
    pub metrics_port: u16,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routing just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        let config: Self = envy::from_env().context("error building config from env")?;
        config.validate()?;
        Ok(config)
    }

    /// Check the parsed values for consistency.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.memory_broker_image.is_empty(), "MEMORY_BROKER_IMAGE must not be empty");
        anyhow::ensure!(!self.redis_broker_image.is_empty(), "REDIS_BROKER_IMAGE must not be empty");
        anyhow::ensure!(self.workers > 0, "WORKERS must be greater than 0");
        Ok(())
    }

    /// The image used by replay jobs, if they are enabled.
    pub fn replay_image(&self) -> Option<&str> {
        self.replay_image.as_deref().filter(|image| !image.is_empty())
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_pull_policy() -> String {
        "IfNotPresent".into()
    }

    fn default_redis_image() -> String {
        "redis:7.0".into()
    }

    fn default_workers() -> usize {
        2
    }

    fn default_metrics_port() -> u16 {
        9090
    }
}

#[cfg(test)]
impl Config {
    /// A config used for testing.
    pub fn new_test() -> Self {
        Self {
            rust_log: "debug".into(),
            memory_broker_image: "gcr.io/triggermesh/memory-broker:test".into(),
            memory_broker_image_pull_policy: Self::default_pull_policy(),
            redis_broker_image: "gcr.io/triggermesh/redis-broker:test".into(),
            redis_broker_image_pull_policy: Self::default_pull_policy(),
            redis_image: Self::default_redis_image(),
            replay_image: None,
            replay_image_pull_policy: Self::default_pull_policy(),
            broker_status_configmap: false,
            workers: 1,
            watch_namespace: String::new(),
            metrics_port: Self::default_metrics_port(),
        }
    }
}

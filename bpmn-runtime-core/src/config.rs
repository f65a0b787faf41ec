//! Engine configuration: defaults and YAML loading.
//!
//! Every field has a default so a partial YAML document (or none at all)
//! yields a usable configuration.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub command: CommandConfig,
    pub deployment_cache: DeploymentCacheConfig,
    pub agenda: AgendaConfig,
    pub job_executor: JobExecutorConfig,
}

/// Retry policy of the command executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    /// Attempts per command before a version conflict is surfaced.
    pub max_attempts: u32,
    /// Initial backoff between attempts, doubled each time.
    pub retry_backoff_ms: u64,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_ms: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploymentCacheConfig {
    pub capacity: usize,
}

impl Default for DeploymentCacheConfig {
    fn default() -> Self {
        Self { capacity: 128 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgendaConfig {
    /// Upper bound on operations one command may run.
    pub max_steps: usize,
}

impl Default for AgendaConfig {
    fn default() -> Self {
        Self { max_steps: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobExecutorConfig {
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    pub lock_duration_ms: i64,
    pub default_retries: u32,
    pub retry_delay_ms: i64,
    /// Generated per executor when absent.
    pub lock_owner: Option<String>,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_interval_ms: 1_000,
            lock_duration_ms: 300_000,
            default_retries: 3,
            retry_delay_ms: 5_000,
            lock_owner: None,
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig =
            serde_yaml::from_str(yaml).context("Parsing engine configuration")?;
        config.check()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
        Self::from_yaml_str(&content).with_context(|| format!("Loading {}", path.display()))
    }

    fn check(&self) -> Result<()> {
        if self.command.max_attempts == 0 {
            anyhow::bail!("command.max_attempts must be at least 1");
        }
        if self.deployment_cache.capacity == 0 {
            anyhow::bail!("deployment_cache.capacity must be at least 1");
        }
        if self.job_executor.batch_size == 0 {
            anyhow::bail!("job_executor.batch_size must be at least 1");
        }
        Ok(())
    }
}

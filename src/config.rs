use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::ItemKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub scheduler: SchedulerConfig,
    pub dispatch: DispatchConfig,
    pub scoring: ScoringConfig,
    pub storage: StorageConfig,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub instance_id: String,
    pub interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub subject_batch_size: usize,
    pub max_history: usize,
    pub start_paused: bool,
    /// A worker whose heartbeat is older than this is reported unhealthy.
    pub healthy_heartbeat_secs: u64,
    /// How long a pass lease lives without renewal. Heartbeats renew it.
    pub pass_lease_secs: u64,
    /// Background jobs with no finished run for this long are reported stale.
    pub stale_after_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            instance_id: "default".to_string(),
            interval_secs: 15,
            heartbeat_interval_secs: 30,
            subject_batch_size: 50,
            max_history: 100,
            start_paused: false,
            healthy_heartbeat_secs: 300,
            pass_lease_secs: 600,
            stale_after_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub max_concurrent_calls: usize,
    pub call_timeout_ms: u64,
    pub default_batch_size: usize,
    pub provider_batch_sizes: HashMap<String, usize>,
    pub default_provider: String,
    pub max_suggested_per_gap: usize,
    pub subject_backoff_max_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrent_calls: 4,
            call_timeout_ms: 120_000,
            default_batch_size: 3,
            provider_batch_sizes: HashMap::new(),
            default_provider: "default".to_string(),
            max_suggested_per_gap: 20,
            subject_backoff_max_secs: 3600,
        }
    }
}

/// How stored scores are split into high / medium / low.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DistributionThresholds {
    /// `score > high` is high, `score < low` is low, everything else medium.
    Fixed { high: f64, low: f64 },
    /// Equal-width thirds of the observed score range.
    Terciles,
}

impl Default for DistributionThresholds {
    fn default() -> Self {
        DistributionThresholds::Fixed { high: 200.0, low: 100.0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: f64,
    pub recency_weight: f64,
    pub difficulty_weight: f64,
    pub recency_horizon_days: f64,
    pub min_score: f64,
    pub max_score: f64,
    pub known_penalty_floor: f64,
    pub weak_min_attempts: u32,
    pub weak_accuracy_threshold: f64,
    pub weak_topic_limit: usize,
    pub item_kinds: Vec<ItemKind>,
    pub distribution: DistributionThresholds,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 100.0,
            recency_weight: 2.0,
            difficulty_weight: 2.0,
            recency_horizon_days: 30.0,
            min_score: 1.0,
            max_score: 1000.0,
            known_penalty_floor: 0.01,
            weak_min_attempts: 3,
            weak_accuracy_threshold: 0.6,
            weak_topic_limit: 5,
            item_kinds: ItemKind::ALL.to_vec(),
            distribution: DistributionThresholds::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("drillr")
                .join("drillr.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub api_key_env: String,
    pub timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8080/v1/generate".to_string(),
            api_key_env: "DRILLR_BACKEND_API_KEY".to_string(),
            timeout_ms: 120_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            scheduler: SchedulerConfig::default(),
            dispatch: DispatchConfig::default(),
            scoring: ScoringConfig::default(),
            storage: StorageConfig::default(),
            backend: BackendConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            let config = Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()))?;
            config.validate()?;
            return Ok(config);
        }

        let project_name = env!("CARGO_PKG_NAME");

        // Primary location: ~/.config/<project>/<project>.yml
        if let Some(config_dir) = dirs::config_dir() {
            let primary_config = config_dir.join(project_name).join(format!("{}.yml", project_name));
            if primary_config.exists() {
                match Self::load_from_file(&primary_config) {
                    Ok(config) => {
                        config.validate()?;
                        return Ok(config);
                    }
                    Err(e) => {
                        log::warn!("Failed to load config from {}: {}", primary_config.display(), e);
                    }
                }
            }
        }

        // Fallback location: ./<project>.yml
        let fallback_config = PathBuf::from(format!("{}.yml", project_name));
        if fallback_config.exists() {
            match Self::load_from_file(&fallback_config) {
                Ok(config) => {
                    config.validate()?;
                    return Ok(config);
                }
                Err(e) => {
                    log::warn!("Failed to load config from {}: {}", fallback_config.display(), e);
                }
            }
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Reject settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.instance_id.trim().is_empty() {
            eyre::bail!("scheduler.instance_id must not be empty");
        }
        if self.scheduler.interval_secs == 0 {
            eyre::bail!("scheduler.interval_secs must be greater than zero");
        }
        if self.scheduler.heartbeat_interval_secs == 0 {
            eyre::bail!("scheduler.heartbeat_interval_secs must be greater than zero");
        }
        if self.scheduler.pass_lease_secs <= self.scheduler.heartbeat_interval_secs {
            eyre::bail!(
                "scheduler.pass_lease_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.scheduler.pass_lease_secs,
                self.scheduler.heartbeat_interval_secs
            );
        }
        if self.scheduler.subject_batch_size == 0 {
            eyre::bail!("scheduler.subject_batch_size must be greater than zero");
        }
        if self.dispatch.max_concurrent_calls == 0 {
            eyre::bail!("dispatch.max_concurrent_calls must be greater than zero");
        }
        if self.dispatch.default_batch_size == 0 {
            eyre::bail!("dispatch.default_batch_size must be greater than zero");
        }
        if let Some((provider, _)) = self.dispatch.provider_batch_sizes.iter().find(|(_, size)| **size == 0) {
            eyre::bail!("dispatch.provider_batch_sizes.{} must be greater than zero", provider);
        }
        if self.scoring.min_score <= 0.0 || self.scoring.min_score > self.scoring.max_score {
            eyre::bail!(
                "scoring bounds invalid: min_score {} max_score {}",
                self.scoring.min_score,
                self.scoring.max_score
            );
        }
        if self.scoring.recency_horizon_days <= 0.0 {
            eyre::bail!("scoring.recency_horizon_days must be positive");
        }
        if !(0.0..=1.0).contains(&self.scoring.weak_accuracy_threshold) {
            eyre::bail!("scoring.weak_accuracy_threshold must be within [0, 1]");
        }
        if self.scoring.item_kinds.is_empty() {
            eyre::bail!("scoring.item_kinds must name at least one kind");
        }
        if let DistributionThresholds::Fixed { high, low } = self.scoring.distribution {
            if low > high {
                eyre::bail!("scoring.distribution: low ({}) exceeds high ({})", low, high);
            }
        }
        Ok(())
    }
}

//! Rendezvous configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::history::DEFAULT_HISTORY_LIMIT;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Most recent events each component keeps for inspection
    #[serde(rename = "history-limit")]
    pub history_limit: usize,

    /// Print queue (monitor) settings
    pub monitor: MonitorConfig,

    /// Shared record settings
    pub rwlock: RwLockConfig,

    /// Rendezvous barrier settings
    pub barrier: BarrierConfig,

    /// Order channel settings
    pub channel: ChannelConfig,

    /// Worker pool settings
    pub pool: PoolConfig,

    /// Future batch settings
    pub futures: FuturesConfig,

    /// Active object settings
    pub active: ActiveConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            monitor: MonitorConfig::default(),
            rwlock: RwLockConfig::default(),
            barrier: BarrierConfig::default(),
            channel: ChannelConfig::default(),
            pool: PoolConfig::default(),
            futures: FuturesConfig::default(),
            active: ActiveConfig::default(),
        }
    }
}

impl Config {
    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.barrier.parties == 0 {
            return Err(eyre::eyre!("barrier.parties must be at least 1"));
        }
        if self.pool.workers == 0 {
            return Err(eyre::eyre!("pool.workers must be at least 1"));
        }
        if self.history_limit == 0 {
            return Err(eyre::eyre!("history-limit must be at least 1"));
        }
        if self.channel.capacity == Some(0) {
            return Err(eyre::eyre!("channel.capacity must be at least 1 (omit it for unbounded)"));
        }
        Ok(())
    }

    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .rendezvous.yml
        let local_config = PathBuf::from(".rendezvous.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/rendezvous/rendezvous.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("rendezvous").join("rendezvous.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    ///
    /// Errors are swallowed; the full load reports them later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        Self::load(config_path).ok().and_then(|c| c.log_level)
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Print queue (monitor) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Simulated printing time per job in milliseconds
    #[serde(rename = "print-duration-ms")]
    pub print_duration_ms: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self { print_duration_ms: 2000 }
    }
}

impl MonitorConfig {
    pub fn print_duration(&self) -> Duration {
        Duration::from_millis(self.print_duration_ms)
    }
}

/// Shared record settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RwLockConfig {
    /// Value the shared record starts with
    #[serde(rename = "initial-value")]
    pub initial_value: String,

    /// Simulated time spent inside each read/write in milliseconds
    #[serde(rename = "hold-ms")]
    pub hold_ms: u64,
}

impl Default for RwLockConfig {
    fn default() -> Self {
        Self {
            initial_value: "Initial Data".to_string(),
            hold_ms: 0,
        }
    }
}

impl RwLockConfig {
    pub fn hold(&self) -> Duration {
        Duration::from_millis(self.hold_ms)
    }
}

/// Rendezvous barrier settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// Number of parties per round
    pub parties: usize,

    /// How long a party waits for the round before withdrawing (None waits forever)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: Option<u64>,

    /// Upper bound of the random work each party does before arriving
    #[serde(rename = "max-arrival-delay-ms")]
    pub max_arrival_delay_ms: u64,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        Self {
            parties: 5,
            timeout_ms: Some(30_000),
            max_arrival_delay_ms: 1000,
        }
    }
}

impl BarrierConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn max_arrival_delay(&self) -> Duration {
        Duration::from_millis(self.max_arrival_delay_ms)
    }
}

/// Order channel settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Maximum queued orders (None is unbounded)
    pub capacity: Option<usize>,

    /// Simulated processing time per consumed order in milliseconds
    #[serde(rename = "processing-delay-ms")]
    pub processing_delay_ms: u64,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            capacity: None,
            processing_delay_ms: 1000,
        }
    }
}

impl ChannelConfig {
    pub fn processing_delay(&self) -> Duration {
        Duration::from_millis(self.processing_delay_ms)
    }
}

/// Worker pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Fixed number of workers
    pub workers: usize,

    /// Maximum queued tasks before submissions are rejected (None is unbounded)
    #[serde(rename = "max-backlog")]
    pub max_backlog: Option<usize>,

    /// Upper bound of the random work per pooled task
    #[serde(rename = "max-task-delay-ms")]
    pub max_task_delay_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 5,
            max_backlog: None,
            max_task_delay_ms: 1000,
        }
    }
}

impl PoolConfig {
    pub fn max_task_delay(&self) -> Duration {
        Duration::from_millis(self.max_task_delay_ms)
    }
}

/// Future batch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FuturesConfig {
    /// Upper bound of the random work per future
    #[serde(rename = "max-delay-ms")]
    pub max_delay_ms: u64,
}

impl Default for FuturesConfig {
    fn default() -> Self {
        Self { max_delay_ms: 1000 }
    }
}

impl FuturesConfig {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// Active object settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActiveConfig {
    /// Simulated duration of each invoked task in milliseconds
    #[serde(rename = "task-duration-ms")]
    pub task_duration_ms: u64,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        Self { task_duration_ms: 2000 }
    }
}

impl ActiveConfig {
    pub fn task_duration(&self) -> Duration {
        Duration::from_millis(self.task_duration_ms)
    }
}

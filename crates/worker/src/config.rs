use anyhow::{Context, Result};
use dagworker_core::consumer::{ConsumerConfig, WorkflowConsumer};
use dagworker_core::registry::HandlerRegistry;
use dagworker_core::storage::{JsonlEventLog, RedbJobStore};
use dagworker_core::workflow::DEFAULT_CONCURRENCY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LOG_FILTER: &str = "dagworker=info,dagworker_core=info";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(skip)]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub consumer: ConsumerSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_job_store")]
    pub job_store: String,

    #[serde(default = "default_event_log_dir")]
    pub event_log_dir: String,
}

fn default_job_store() -> String {
    "jobs.redb".to_string()
}

fn default_event_log_dir() -> String {
    "event_log".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            job_store: default_job_store(),
            event_log_dir: default_event_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Vertices allowed to run at once within one workflow
    #[serde(default = "default_concurrency_limit")]
    pub concurrency_limit: usize,

    /// Timeout for tasks that set none
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
}

fn default_concurrency_limit() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_timeout_secs() -> u64 {
    60
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: default_concurrency_limit(),
            default_timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerSection {
    /// Messages handled at once
    #[serde(default = "default_consumer_limit")]
    pub limit: usize,
}

fn default_consumer_limit() -> usize {
    1
}

impl Default for ConsumerSection {
    fn default() -> Self {
        Self {
            limit: default_consumer_limit(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `tracing` filter directive; `RUST_LOG` takes precedence
    #[serde(default)]
    pub filter: Option<String>,
}

impl WorkerConfig {
    pub fn load(config_path: &Path, data_dir: PathBuf) -> Result<Self> {
        // Create data directory if it doesn't exist
        std::fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

        // Load config file if it exists, otherwise use defaults
        let mut config: Self = if config_path.exists() {
            let content = std::fs::read_to_string(config_path)
                .context("Failed to read configuration file")?;
            toml::from_str(&content).context("Failed to parse configuration file")?
        } else {
            Self::default()
        };

        config.data_dir = data_dir;

        Ok(config)
    }

    pub fn job_store_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.job_store)
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.data_dir.join(&self.storage.event_log_dir)
    }

    pub fn log_filter(&self) -> &str {
        self.logging.filter.as_deref().unwrap_or(DEFAULT_LOG_FILTER)
    }

    pub fn consumer_config(&self) -> ConsumerConfig {
        ConsumerConfig {
            concurrency: self.scheduler.concurrency_limit.max(1),
            default_timeout: Duration::from_secs(self.scheduler.default_timeout_secs),
        }
    }
}

/// Long-lived collaborators of a worker process
#[derive(Clone)]
pub struct WorkerState {
    pub job_store: Arc<RedbJobStore>,
    pub event_log: Arc<JsonlEventLog>,
    pub registry: Arc<HandlerRegistry>,
}

impl WorkerState {
    pub fn new(config: &WorkerConfig) -> Result<Self> {
        let job_store = Arc::new(
            RedbJobStore::new(config.job_store_path()).context("Failed to open job store")?,
        );

        let event_log = Arc::new(
            JsonlEventLog::new(config.event_log_path()).context("Failed to create event log")?,
        );

        let registry = Arc::new(HandlerRegistry::with_builtin_handlers());
        tracing::info!("Registered handlers: {}", registry.names().join(", "));

        Ok(Self {
            job_store,
            event_log,
            registry,
        })
    }

    pub fn consumer(&self, config: &WorkerConfig) -> WorkflowConsumer {
        WorkflowConsumer::new(
            self.job_store.clone(),
            self.registry.clone(),
            self.event_log.clone(),
        )
        .with_config(config.consumer_config())
    }
}

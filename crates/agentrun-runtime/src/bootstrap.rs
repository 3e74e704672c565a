//! Bootstrap helpers for starting an agentrun host from a single YAML config.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use thiserror::Error;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::EnvFilter;

use agentrun_activities::{default_activities, ToolRegistry};
use agentrun_config::{load_config, AgentRunConfig, ConfigError, ObservabilityConfig, StoreConfig};
use agentrun_core::store::HistoryStore;
use agentrun_stores::{FileHistoryStore, InMemoryHistoryStore};

use crate::error::RuntimeError;
use crate::orchestrator::{Orchestrator, OrchestratorConfig};
use crate::reporter::BroadcastOutcomeReporter;

/// Overrides `observability.log_file` when set and non-empty.
pub const LOG_FILE_ENV: &str = "AGENTRUN_LOG_FILE";

static TRACING_INIT: OnceLock<()> = OnceLock::new();

/// Runtime bootstrap errors.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("unsupported store backend: {0}")]
    UnsupportedStoreBackend(String),
    #[error("store.path is required for the file backend")]
    MissingStorePath,
}

/// Running host created from unified config.
pub struct RuntimeApp {
    pub config: AgentRunConfig,
    pub orchestrator: Orchestrator,
    pub outcomes: Arc<BroadcastOutcomeReporter>,
}

impl RuntimeApp {
    pub async fn from_config_path(path: impl Into<PathBuf>) -> Result<Self, BootstrapError> {
        let path = path.into();
        let config = load_config(&path)?;
        tracing::debug!(path = %path.display(), "config loaded");
        Self::from_config(config, ToolRegistry::with_builtins()).await
    }

    /// Build the host, resuming unfinished runs when `worker.recover_on_start`
    /// is set.
    pub async fn from_config(
        config: AgentRunConfig,
        tools: ToolRegistry,
    ) -> Result<Self, BootstrapError> {
        init_tracing_if_needed(&config.observability);

        let store = build_store(&config.store)?;
        let outcomes = Arc::new(BroadcastOutcomeReporter::default());
        let orchestrator = Orchestrator::new(
            OrchestratorConfig::from(&config),
            store,
            default_activities(tools),
            outcomes.clone(),
        )?;

        if config.worker.recover_on_start {
            orchestrator.recover().await?;
        }
        tracing::info!(
            app = %config.app.name,
            environment = %config.app.environment,
            task_queue = %config.worker.task_queue,
            store = %config.store.backend,
            "runtime ready"
        );

        Ok(Self {
            config,
            orchestrator,
            outcomes,
        })
    }
}

pub fn build_store(config: &StoreConfig) -> Result<Arc<dyn HistoryStore>, BootstrapError> {
    match config.backend.as_str() {
        "in_memory" => Ok(Arc::new(InMemoryHistoryStore::new())),
        "file" => {
            let path = config
                .path
                .as_deref()
                .filter(|path| !path.trim().is_empty())
                .ok_or(BootstrapError::MissingStorePath)?;
            Ok(Arc::new(FileHistoryStore::new(path)))
        }
        other => Err(BootstrapError::UnsupportedStoreBackend(other.to_string())),
    }
}

/// Install the global tracing subscriber once per process.
///
/// `RUST_LOG` wins over `observability.log_level`.
pub fn init_tracing_if_needed(observability: &ObservabilityConfig) {
    TRACING_INIT.get_or_init(|| {
        let log_file = std::env::var(LOG_FILE_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .or_else(|| observability.log_file.clone());

        let fallback = match observability.log_level.trim().to_ascii_lowercase().as_str() {
            "trace" => "trace",
            "debug" => "debug",
            "warn" | "warning" => "warn",
            "error" => "error",
            _ => "info",
        };
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(fallback))
            .unwrap_or_else(|_| EnvFilter::new("info"));

        let writer = match log_file.as_deref().and_then(open_log_file) {
            Some(file) => BoxMakeWriter::new(Mutex::new(file)),
            None => BoxMakeWriter::new(std::io::stdout),
        };
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();

        tracing::info!(
            log_level = fallback,
            log_file = log_file.as_deref().unwrap_or("(stdout)"),
            "tracing initialized"
        );
    });
}

fn open_log_file(path: &str) -> Option<File> {
    let path = Path::new(path);
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = fs::create_dir_all(parent) {
            eprintln!("failed to create log directory {}: {}", parent.display(), e);
            return None;
        }
    }
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("failed to open log file {}: {}", path.display(), e);
            None
        }
    }
}

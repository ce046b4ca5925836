//! Ingestion: commit loop, coordinator and lifecycle
//!
//! `Ingestor` wires configuration into the store, classifier and verifier,
//! then pumps commits from a reader through the pipeline until end of input
//! or a shutdown signal.

mod coordinator;
mod pipeline;
mod signals;
mod stats;

pub use coordinator::{
    CommitOutcome, CoordinatorSettings, EscalationDrain, IngestCoordinator, NamespaceResolver,
    SkipReason, StaticNamespace,
};
pub use pipeline::{Pipeline, PipelineSettings};
pub use signals::{IngestSignal, SignalHandler};
pub use stats::{PipelineStats, StatsSnapshot};

use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufRead;

use crate::classifier::HeuristicClassifier;
use crate::config::{parse_duration, Config, ConfigValidator};
use crate::error::{IngestError, Result};
use crate::firehose::{CommitReader, ReaderStats};
use crate::storage::{ContentStore, SqliteContentStore};
use crate::verifier::{AiVerifier, UsageTracker};

/// Totals for one `Ingestor::run`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub stats: StatsSnapshot,
    pub reader: ReaderStats,
    /// Stopped by a signal rather than end of input
    pub interrupted: bool,
}

/// Owns the long-lived components of an ingestion run
pub struct Ingestor {
    store: Arc<SqliteContentStore>,
    coordinator: Arc<IngestCoordinator>,
    usage: Arc<UsageTracker>,
    pipeline_settings: PipelineSettings,
    shutdown_grace: Duration,
}

impl Ingestor {
    /// Build from configuration. Fails fast on invalid config, a missing API
    /// key while the verifier is enabled, or an unopenable database.
    pub fn new(config: Config) -> Result<Self> {
        ConfigValidator::validate(&config)?;

        let usage = Arc::new(UsageTracker::new());
        let verifier = if config.verifier.enabled {
            Some(Arc::new(AiVerifier::from_config(
                &config.verifier,
                usage.clone(),
            )?))
        } else {
            None
        };

        Self::with_verifier(config, verifier, usage)
    }

    /// Build with an explicit verifier; `usage` must be the tracker it records into
    pub fn with_verifier(
        config: Config,
        verifier: Option<Arc<AiVerifier>>,
        usage: Arc<UsageTracker>,
    ) -> Result<Self> {
        let db_path = config.storage.database_path();
        let store = Arc::new(SqliteContentStore::open(
            &db_path,
            config.storage.pool_size,
        )?);

        let classifier = HeuristicClassifier::new(&config.classifier)?;
        let namespace = Arc::new(StaticNamespace::new(config.ingest.operator_dids.iter().cloned()));

        let coordinator = Arc::new(IngestCoordinator::new(
            classifier,
            verifier,
            store.clone() as Arc<dyn ContentStore>,
            namespace,
            Arc::new(PipelineStats::new()),
            CoordinatorSettings {
                operator_handle: config.ingest.operator_handle.clone(),
                milestone_every: config.ingest.milestone_every,
            },
        ));

        let pipeline_settings = PipelineSettings {
            buffer_size: config.ingest.buffer_size,
            report_interval: duration_setting(
                "ingest.report_interval",
                &config.ingest.report_interval,
            )?,
            usage_reset_interval: Some(duration_setting(
                "verifier.usage_reset_interval",
                &config.verifier.usage_reset_interval,
            )?),
            prompt_cost_per_mtok: config.verifier.prompt_cost_per_mtok,
            completion_cost_per_mtok: config.verifier.completion_cost_per_mtok,
        };
        let shutdown_grace =
            duration_setting("ingest.shutdown_grace", &config.ingest.shutdown_grace)?;

        tracing::info!("Content store: {}", db_path.display());

        Ok(Self {
            store,
            coordinator,
            usage,
            pipeline_settings,
            shutdown_grace,
        })
    }

    pub fn store(&self) -> &Arc<SqliteContentStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<IngestCoordinator> {
        &self.coordinator
    }

    /// Consume commits until end of input or SIGINT/SIGTERM/SIGHUP, then shut down gracefully
    pub async fn run<R: AsyncBufRead + Unpin>(
        &self,
        mut reader: CommitReader<R>,
    ) -> Result<RunSummary> {
        let mut signals = SignalHandler::new()?;
        let pipeline = Pipeline::new(
            self.coordinator.clone(),
            self.usage.clone(),
            self.pipeline_settings.clone(),
        );

        tracing::info!("Ingestion started");

        let mut interrupted = false;
        let mut failure: Option<IngestError> = None;

        loop {
            tokio::select! {
                next = reader.next_commit() => match next {
                    Ok(Some(commit)) => {
                        if let Err(e) = pipeline.send(commit).await {
                            failure = Some(e);
                            break;
                        }
                    }
                    Ok(None) => {
                        tracing::info!("End of input reached");
                        break;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                },

                sig = signals.wait() => {
                    if sig.should_shutdown() {
                        tracing::info!("Shutdown signal received");
                        interrupted = true;
                        break;
                    }
                    pipeline.report();
                }
            }
        }

        let stats = pipeline.shutdown(self.shutdown_grace).await;
        let reader_stats = reader.stats().clone();

        tracing::info!(
            "Ingestion stopped: {} lines read, {} commits, {} malformed",
            reader_stats.lines,
            reader_stats.commits,
            reader_stats.malformed
        );

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(RunSummary {
            stats,
            reader: reader_stats,
            interrupted,
        })
    }
}

fn duration_setting(path: &str, value: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| IngestError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration format: {}", value),
    })
}

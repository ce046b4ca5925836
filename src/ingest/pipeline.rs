// Async ingestion pipeline with a bounded channel for backpressure

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval};

use crate::error::{IngestError, Result};
use crate::firehose::FirehoseCommit;
use crate::ingest::coordinator::{CommitOutcome, IngestCoordinator};
use crate::ingest::stats::StatsSnapshot;
use crate::verifier::UsageTracker;

/// Pipeline knobs taken from configuration
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub buffer_size: usize,
    pub report_interval: Duration,
    /// Zero the usage counters this often; `None` never resets
    pub usage_reset_interval: Option<Duration>,
    pub prompt_cost_per_mtok: f64,
    pub completion_cost_per_mtok: f64,
}

/// Feeds commits to the coordinator from a single worker task
pub struct Pipeline {
    commit_tx: mpsc::Sender<FirehoseCommit>,
    worker_handle: Option<tokio::task::JoinHandle<WorkerStats>>,
    coordinator: Arc<IngestCoordinator>,
    reporter: Reporter,
}

impl Pipeline {
    pub fn new(
        coordinator: Arc<IngestCoordinator>,
        usage: Arc<UsageTracker>,
        settings: PipelineSettings,
    ) -> Self {
        let (commit_tx, commit_rx) = mpsc::channel(settings.buffer_size.max(1));
        let reporter = Reporter {
            coordinator: coordinator.clone(),
            usage,
            prompt_cost_per_mtok: settings.prompt_cost_per_mtok,
            completion_cost_per_mtok: settings.completion_cost_per_mtok,
        };

        let worker_coordinator = coordinator.clone();
        let worker_reporter = reporter.clone();
        let worker_handle = Some(tokio::spawn(async move {
            ingest_worker(commit_rx, worker_coordinator, worker_reporter, settings).await
        }));

        Self {
            commit_tx,
            worker_handle,
            coordinator,
            reporter,
        }
    }

    /// Queue a commit, waiting while the buffer is full
    pub async fn send(&self, commit: FirehoseCommit) -> Result<()> {
        self.commit_tx
            .send(commit)
            .await
            .map_err(|_| IngestError::Pipeline("Pipeline channel closed".to_string()))?;
        Ok(())
    }

    /// Log a status report now
    pub fn report(&self) {
        self.reporter.log();
    }

    /// Stop accepting commits, drain the queue, then wait up to `grace` for escalations
    pub async fn shutdown(mut self, grace: Duration) -> StatsSnapshot {
        drop(self.commit_tx);

        if let Some(handle) = self.worker_handle.take() {
            tracing::info!("Waiting for pipeline to drain...");
            match handle.await {
                Ok(stats) => tracing::info!(
                    "Pipeline drained: {} commits ({} skipped, {} included, {} excluded, {} escalated, {} dropped, {} store failures)",
                    stats.received,
                    stats.skipped,
                    stats.included,
                    stats.excluded,
                    stats.escalated,
                    stats.dropped,
                    stats.store_failures
                ),
                Err(e) => tracing::error!("Pipeline worker failed: {}", e),
            }
        }

        let in_flight = self.coordinator.in_flight();
        if in_flight > 0 {
            tracing::info!(
                "Waiting up to {:?} for {} in-flight escalations",
                grace,
                in_flight
            );
            let drain = self.coordinator.drain_escalations_within(grace).await;
            if drain.abandoned > 0 {
                tracing::warn!(
                    "Shutdown grace elapsed after {} escalations; abandoning {}",
                    drain.completed,
                    drain.abandoned
                );
            } else {
                tracing::info!("{} escalations completed", drain.completed);
            }
        }

        self.reporter.log();
        self.coordinator.stats().snapshot()
    }
}

/// Periodic status line: counters, verifier usage and cost
#[derive(Clone)]
struct Reporter {
    coordinator: Arc<IngestCoordinator>,
    usage: Arc<UsageTracker>,
    prompt_cost_per_mtok: f64,
    completion_cost_per_mtok: f64,
}

impl Reporter {
    fn log(&self) {
        let stats = self.coordinator.stats().snapshot();
        let usage = self.usage.snapshot();

        tracing::info!(
            "Processed {} posts, indexed {}, {} escalations in flight",
            stats.processed,
            stats.indexed,
            self.coordinator.in_flight()
        );

        if self.coordinator.verifier().is_some() {
            tracing::info!(
                "AI usage: {} requests, {} tokens ({} prompt / {} completion), est. ${:.4} since {}",
                usage.request_count,
                usage.total_tokens,
                usage.total_prompt_tokens,
                usage.total_completion_tokens,
                usage.estimated_cost_usd(self.prompt_cost_per_mtok, self.completion_cost_per_mtok),
                usage.last_reset_at.to_rfc3339()
            );
        }
    }
}

/// Worker that hands queued commits to the coordinator in order
async fn ingest_worker(
    mut commit_rx: mpsc::Receiver<FirehoseCommit>,
    coordinator: Arc<IngestCoordinator>,
    reporter: Reporter,
    settings: PipelineSettings,
) -> WorkerStats {
    // Interval periods must be non-zero
    let report_period = settings.report_interval.max(Duration::from_millis(1));
    let mut report_timer = time::interval_at(Instant::now() + report_period, report_period);
    let mut reset_timer = settings
        .usage_reset_interval
        .filter(|period| !period.is_zero())
        .map(|period| time::interval_at(Instant::now() + period, period));
    let mut stats = WorkerStats::default();

    loop {
        tokio::select! {
            received = commit_rx.recv() => match received {
                Some(commit) => stats.record(coordinator.handle(&commit)),
                // Channel closed and empty
                None => {
                    tracing::debug!("Ingest worker finished after {} commits", stats.received);
                    break;
                }
            },

            _ = report_timer.tick() => {
                reporter.log();
            }

            _ = tick_optional(&mut reset_timer) => {
                let before = reporter.usage.snapshot();
                tracing::info!(
                    "Resetting AI usage counters ({} requests, {} tokens)",
                    before.request_count,
                    before.total_tokens
                );
                reporter.usage.reset();
            }
        }
    }

    stats
}

async fn tick_optional(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Outcome tallies for the worker
#[derive(Debug, Default, Clone, Copy)]
struct WorkerStats {
    received: u64,
    skipped: u64,
    included: u64,
    excluded: u64,
    escalated: u64,
    dropped: u64,
    store_failures: u64,
}

impl WorkerStats {
    fn record(&mut self, outcome: CommitOutcome) {
        self.received += 1;
        match outcome {
            CommitOutcome::Skipped(_) => self.skipped += 1,
            CommitOutcome::Included => self.included += 1,
            CommitOutcome::Excluded => self.excluded += 1,
            CommitOutcome::Escalated => self.escalated += 1,
            CommitOutcome::EscalationDropped => self.dropped += 1,
            CommitOutcome::StoreFailed => self.store_failures += 1,
        }
    }
}

// Per-commit orchestration: filter, classify, index or escalate
//
// `handle` is the synchronous fast path. Escalations are spawned onto a
// JoinSet so a slow or failing AI call never blocks the commit loop.

use ahash::AHashSet;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{self, Instant};

use crate::classifier::{snippet, HeuristicClassifier, Outcome};
use crate::firehose::{extract_post, FirehoseCommit};
use crate::ingest::stats::PipelineStats;
use crate::storage::{ContentStore, Provenance, StoredPost};
use crate::verifier::{AiVerdict, AiVerifier, AUDIT_SNIPPET_CHARS};

/// Result of a bounded escalation drain
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EscalationDrain {
    pub completed: usize,
    pub abandoned: usize,
}

/// Decides whether a repository belongs to the operator's own namespace
pub trait NamespaceResolver: Send + Sync {
    fn is_operator_repository(&self, repository_id: &str) -> bool;
}

/// Fixed set of operator-hosted repository DIDs
#[derive(Debug, Default, Clone)]
pub struct StaticNamespace {
    dids: AHashSet<String>,
}

impl StaticNamespace {
    pub fn new<I, S>(dids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            dids: dids.into_iter().map(Into::into).collect(),
        }
    }
}

impl NamespaceResolver for StaticNamespace {
    fn is_operator_repository(&self, repository_id: &str) -> bool {
        self.dids.contains(repository_id)
    }
}

/// Why a commit was skipped before classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    NoRecord,
    NotAPost,
    Reply,
    Malformed,
}

/// What `IngestCoordinator::handle` did with a commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Skipped(SkipReason),
    Included,
    Excluded,
    /// Handed to the AI verifier; the final decision happens later
    Escalated,
    /// Ambiguous post with no verifier configured
    EscalationDropped,
    /// Accepted but the store write failed
    StoreFailed,
}

/// Coordinator knobs taken from configuration
#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    /// Handle recorded for posts from operator repositories
    pub operator_handle: String,
    /// Log a milestone every N indexed posts (0 disables)
    pub milestone_every: u64,
}

/// Store writes plus the counters that go with them
struct Indexer {
    store: Arc<dyn ContentStore>,
    stats: Arc<PipelineStats>,
    milestone_every: u64,
}

impl Indexer {
    /// Upsert and count; returns false on store failure
    fn index(&self, post: &StoredPost) -> bool {
        let result = self.store.upsert(post);
        self.stats.record_processed();

        match result {
            Ok(()) => {
                let indexed = self.stats.record_indexed();
                tracing::debug!("Indexed {} ({})", post.uri, post.provenance.reason);
                if self.milestone_every > 0 && indexed % self.milestone_every == 0 {
                    tracing::info!("Milestone: {} posts indexed", indexed);
                }
                true
            }
            Err(e) => {
                tracing::error!("Failed to store {}: {}", post.uri, e);
                false
            }
        }
    }
}

/// Runs every firehose commit through the two-tier decision pipeline
pub struct IngestCoordinator {
    classifier: HeuristicClassifier,
    verifier: Option<Arc<AiVerifier>>,
    namespace: Arc<dyn NamespaceResolver>,
    indexer: Arc<Indexer>,
    operator_handle: String,
    escalations: Mutex<JoinSet<()>>,
}

impl IngestCoordinator {
    pub fn new(
        classifier: HeuristicClassifier,
        verifier: Option<Arc<AiVerifier>>,
        store: Arc<dyn ContentStore>,
        namespace: Arc<dyn NamespaceResolver>,
        stats: Arc<PipelineStats>,
        settings: CoordinatorSettings,
    ) -> Self {
        if verifier.is_none() {
            tracing::warn!("No AI verifier configured; ambiguous posts will be dropped");
        }

        Self {
            classifier,
            verifier,
            namespace,
            indexer: Arc::new(Indexer {
                store,
                stats,
                milestone_every: settings.milestone_every,
            }),
            operator_handle: settings.operator_handle,
            escalations: Mutex::new(JoinSet::new()),
        }
    }

    /// Handle one commit. Must run inside a Tokio runtime.
    pub fn handle(&self, commit: &FirehoseCommit) -> CommitOutcome {
        self.reap_escalations();

        let Some(record) = commit.record.as_ref() else {
            return CommitOutcome::Skipped(SkipReason::NoRecord);
        };
        if !commit.is_post() {
            return CommitOutcome::Skipped(SkipReason::NotAPost);
        }

        let post = match extract_post(record) {
            Ok(post) => post,
            Err(e) => {
                tracing::debug!("Skipping {}: {}", commit.uri(), e);
                return CommitOutcome::Skipped(SkipReason::Malformed);
            }
        };
        if post.is_reply {
            return CommitOutcome::Skipped(SkipReason::Reply);
        }

        let source_handle = if self
            .namespace
            .is_operator_repository(&commit.repository_id)
        {
            self.operator_handle.clone()
        } else {
            String::new()
        };

        let decision = self
            .classifier
            .classify(&source_handle, post.text.as_deref());

        match decision.outcome {
            Outcome::Include => {
                let stored = stored_post(
                    commit,
                    source_handle,
                    post.content,
                    Provenance::heuristic(decision.reason.as_str()),
                );
                if self.indexer.index(&stored) {
                    CommitOutcome::Included
                } else {
                    CommitOutcome::StoreFailed
                }
            }
            Outcome::Exclude => {
                self.indexer.stats.record_processed();
                CommitOutcome::Excluded
            }
            Outcome::Escalate => {
                let (Some(verifier), Some(text)) = (self.verifier.as_ref(), post.text) else {
                    tracing::debug!("Dropping ambiguous post {}", commit.uri());
                    return CommitOutcome::EscalationDropped;
                };

                let pending = stored_post(
                    commit,
                    source_handle,
                    post.content,
                    Provenance::heuristic(decision.reason.as_str()),
                );
                self.spawn_escalation(verifier.clone(), text, pending);
                CommitOutcome::Escalated
            }
        }
    }

    fn spawn_escalation(&self, verifier: Arc<AiVerifier>, text: String, mut pending: StoredPost) {
        let indexer = self.indexer.clone();

        self.lock_escalations().spawn(async move {
            match verifier.verify(&text).await {
                AiVerdict::Assessed(assessment) if assessment.is_relevant => {
                    pending.indexed_at = Utc::now();
                    pending.provenance =
                        Provenance::ai_verified(assessment.quality_score, assessment.category);
                    indexer.index(&pending);
                }
                AiVerdict::Assessed(assessment) => {
                    tracing::debug!(
                        "Escalated post {} rejected (score {}): {}",
                        pending.uri,
                        assessment.quality_score,
                        snippet(&text, AUDIT_SNIPPET_CHARS)
                    );
                }
                AiVerdict::Error { .. } => {
                    tracing::debug!("Escalated post {} dropped after verifier error", pending.uri);
                }
            }
        });
    }

    /// Escalations spawned and not yet reaped
    pub fn in_flight(&self) -> usize {
        self.lock_escalations().len()
    }

    /// Wait for every in-flight escalation, including ones spawned meanwhile
    pub async fn drain_escalations(&self) -> usize {
        let mut drained = 0;
        loop {
            let mut set = std::mem::take(&mut *self.lock_escalations());
            if set.is_empty() {
                return drained;
            }
            while let Some(result) = set.join_next().await {
                drained += 1;
                log_task_result(result);
            }
        }
    }

    /// Drain for at most `grace`, then abort whatever is still running
    pub async fn drain_escalations_within(&self, grace: Duration) -> EscalationDrain {
        let Some(deadline) = Instant::now().checked_add(grace) else {
            return EscalationDrain {
                completed: self.drain_escalations().await,
                abandoned: 0,
            };
        };

        let mut drain = EscalationDrain::default();
        loop {
            let mut set = std::mem::take(&mut *self.lock_escalations());
            if set.is_empty() {
                return drain;
            }
            loop {
                match time::timeout_at(deadline, set.join_next()).await {
                    Ok(Some(result)) => {
                        drain.completed += 1;
                        log_task_result(result);
                    }
                    Ok(None) => break,
                    Err(_) => {
                        let late = std::mem::take(&mut *self.lock_escalations());
                        drain.abandoned = set.len() + late.len();
                        // Dropping a JoinSet aborts its tasks
                        return drain;
                    }
                }
            }
        }
    }

    /// Shared counters
    pub fn stats(&self) -> &Arc<PipelineStats> {
        &self.indexer.stats
    }

    pub fn verifier(&self) -> Option<&Arc<AiVerifier>> {
        self.verifier.as_ref()
    }

    fn reap_escalations(&self) {
        let mut set = self.lock_escalations();
        while let Some(result) = set.try_join_next() {
            log_task_result(result);
        }
    }

    fn lock_escalations(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.escalations
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn log_task_result(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            tracing::error!("Escalation task panicked: {}", e);
        }
    }
}

fn stored_post(
    commit: &FirehoseCommit,
    source_handle: String,
    content: crate::firehose::PostContent,
    provenance: Provenance,
) -> StoredPost {
    StoredPost {
        uri: commit.uri(),
        cid: commit.content_identifier.clone(),
        repository_id: commit.repository_id.clone(),
        source_handle,
        indexed_at: Utc::now(),
        content,
        provenance,
    }
}

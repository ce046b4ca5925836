//! AI verifier: second-tier classification for escalated posts
//!
//! Each call waits for a rate-limiter turn, asks an external LLM to score the
//! post against a fixed rubric, records token usage and maps the score against
//! the quality threshold. Every failure becomes an error verdict; nothing is
//! returned as `Err` and callers never include a post on error.

mod client;
mod rate_limit;
mod types;
mod usage;

pub use client::{ApiKey, Completion, CompletionBackend, HttpCompletionBackend, TokenUsage};
pub use rate_limit::RateLimiter;
pub use types::{parse_verdict, AiVerdict, Assessment, RawVerdict, VerifierError, SCORE_RANGE};
pub use usage::{UsageCounters, UsageTracker};

use std::sync::Arc;

use crate::classifier::snippet;
use crate::config::VerifierConfig;

/// Characters of post text included in verifier log lines
pub const AUDIT_SNIPPET_CHARS: usize = 50;

/// Fixed scoring rubric sent as the system instruction
pub const SYSTEM_PROMPT: &str = r#"You are a content curator for a cannabis-industry social feed.
Score how relevant and valuable the post is to people who work in or follow the legal cannabis industry:
cultivation, dispensaries and retail, products and strains, medical use, policy and legalization, industry news and business.

Scoring rubric (integer 0-10):
- 0-2: unrelated to cannabis, spam, or promotional noise
- 3-4: passing or incidental mention, general lifestyle chatter
- 5-6: clearly about cannabis with some useful substance
- 7-8: informative industry, product, medical or policy content
- 9-10: high-value news, analysis or expertise

Respond with ONLY a JSON object with exactly these fields:
{"score": <integer 0-10>, "category": "<short label>", "reason": "<one sentence>"}"#;

/// Knobs the verifier needs from configuration
#[derive(Debug, Clone)]
pub struct VerifierSettings {
    pub quality_threshold: i64,
    pub max_text_chars: usize,
    pub token_budget: Option<u64>,
}

impl From<&VerifierConfig> for VerifierSettings {
    fn from(config: &VerifierConfig) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            max_text_chars: config.max_text_chars,
            token_budget: config.token_budget,
        }
    }
}

/// Rate-limited, usage-tracked AI relevance verifier
pub struct AiVerifier {
    backend: Arc<dyn CompletionBackend>,
    limiter: Arc<RateLimiter>,
    usage: Arc<UsageTracker>,
    settings: VerifierSettings,
}

impl AiVerifier {
    pub fn new(
        backend: Arc<dyn CompletionBackend>,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageTracker>,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            backend,
            limiter,
            usage,
            settings,
        }
    }

    /// Build the production verifier: HTTP backend, key read from the environment
    pub fn from_config(
        config: &VerifierConfig,
        usage: Arc<UsageTracker>,
    ) -> Result<Self, VerifierError> {
        let api_key = ApiKey::from_env(&config.api_key_env)?;
        let backend = HttpCompletionBackend::new(config, api_key)?;
        let limiter = RateLimiter::new(config.min_delay());

        tracing::info!(
            "AI verifier enabled: model={}, threshold={}, min_delay={}ms",
            config.model,
            config.quality_threshold,
            config.min_delay_ms
        );

        Ok(Self::new(
            Arc::new(backend),
            Arc::new(limiter),
            usage,
            VerifierSettings::from(config),
        ))
    }

    /// Score a post; always returns a verdict
    pub async fn verify(&self, text: &str) -> AiVerdict {
        let preview = snippet(text, AUDIT_SNIPPET_CHARS);

        match self.try_verify(text).await {
            Ok(assessment) => {
                tracing::info!(
                    "AI verdict score={} relevant={} category={} reason={:?} text={:?}",
                    assessment.quality_score,
                    assessment.is_relevant,
                    assessment.category,
                    assessment.reason,
                    preview
                );
                AiVerdict::Assessed(assessment)
            }
            Err(e) => {
                tracing::warn!("AI verification failed: {} text={:?}", e, preview);
                AiVerdict::Error {
                    message: e.to_string(),
                }
            }
        }
    }

    async fn try_verify(&self, text: &str) -> Result<Assessment, VerifierError> {
        if let Some(budget) = self.settings.token_budget {
            let used = self.usage.snapshot().total_tokens;
            if used >= budget {
                return Err(VerifierError::BudgetExhausted { used, budget });
            }
        }

        self.limiter.await_turn().await;

        let body = snippet(text, self.settings.max_text_chars);
        let completion = self
            .backend
            .complete(SYSTEM_PROMPT, &format!("Post:\n\"\"\"{}\"\"\"", body))
            .await?;

        // Tokens were spent even if the content turns out to be unusable
        let usage = completion.usage.unwrap_or_default();
        self.usage
            .record(usage.prompt_tokens, usage.completion_tokens);

        let raw = parse_verdict(&completion.content)?;

        Ok(Assessment {
            is_relevant: raw.score >= self.settings.quality_threshold,
            quality_score: raw.score,
            category: raw.category,
            reason: raw.reason,
        })
    }

    pub fn usage(&self) -> &Arc<UsageTracker> {
        &self.usage
    }
}

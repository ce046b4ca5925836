// Heuristic classifier: fast, synchronous first tier
// Trusted sources, empty text, then keyword evidence; anything else escalates
use crate::classifier::keywords::{KeywordSet, Tokenizer};
use crate::classifier::types::{ClassificationDecision, DecisionReason, LexicalScan, Outcome};
use crate::config::ClassifierConfig;
use crate::error::Result;

/// Pure keyword/trust classifier
///
/// Holds only compiled configuration, so `classify` is deterministic for a
/// given (config, input) pair and safe to share across tasks.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    /// Lowercased suffixes without the leading dot
    trusted_suffixes: Vec<String>,
    tokenizer: Tokenizer,
    allow: KeywordSet,
    deny: KeywordSet,
    allow_threshold: usize,
}

impl HeuristicClassifier {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        let tokenizer = Tokenizer::new()?;
        let allow = KeywordSet::new(&config.allow_keywords, &tokenizer);
        let deny = KeywordSet::new(&config.deny_keywords, &tokenizer);

        let trusted_suffixes = config
            .trusted_suffixes
            .iter()
            .map(|s| s.trim().trim_start_matches('.').to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        tracing::debug!(
            "Heuristic classifier ready: {} allow terms, {} deny terms",
            allow.len(),
            deny.len()
        );

        Ok(Self {
            trusted_suffixes,
            tokenizer,
            allow,
            deny,
            allow_threshold: config.allow_threshold.max(1) as usize,
        })
    }

    /// Classify a post by its source handle and text (first match wins)
    pub fn classify(&self, source_handle: &str, text: Option<&str>) -> ClassificationDecision {
        // Trusted sources are kept regardless of text, including empty text
        if self.is_trusted(source_handle) {
            return ClassificationDecision::trusted();
        }

        let text = match text.map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => return ClassificationDecision::new(Outcome::Exclude, DecisionReason::EmptyText),
        };

        let scan = self.scan(text);
        let allow_hits = scan.allow_hits.len();
        let deny_hits = scan.deny_hits.len();

        if deny_hits > allow_hits {
            ClassificationDecision::new(Outcome::Exclude, DecisionReason::DenyMatch)
        } else if deny_hits == 0 && allow_hits >= self.allow_threshold {
            ClassificationDecision::new(Outcome::Include, DecisionReason::AllowMatch)
        } else {
            // Weak or conflicting evidence, or nothing lexical at all
            ClassificationDecision::new(Outcome::Escalate, DecisionReason::Ambiguous)
        }
    }

    /// Keyword evidence for a piece of text
    pub fn scan(&self, text: &str) -> LexicalScan {
        let tokens = self.tokenizer.tokenize(text);
        LexicalScan {
            token_count: tokens.len(),
            allow_hits: self.allow.matches(&tokens),
            deny_hits: self.deny.matches(&tokens),
        }
    }

    /// Whether a handle belongs to one of the trusted domain suffixes
    pub fn is_trusted(&self, source_handle: &str) -> bool {
        self.trusted_suffixes
            .iter()
            .any(|suffix| matches_trusted_suffix(source_handle, suffix))
    }
}

/// Case-insensitive suffix match on a label boundary.
/// `.cannect.space` matches `a.cannect.space` and `cannect.space`, never `evilcannect.space`.
pub fn matches_trusted_suffix(handle: &str, suffix: &str) -> bool {
    let handle = handle.trim().to_lowercase();
    let suffix = suffix.trim().trim_start_matches('.').to_lowercase();
    if handle.is_empty() || suffix.is_empty() {
        return false;
    }

    handle == suffix
        || handle
            .strip_suffix(suffix.as_str())
            .is_some_and(|rest| rest.ends_with('.'))
}

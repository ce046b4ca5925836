// Shared types for the two-tier classification pipeline
use serde::{Deserialize, Serialize};
use std::fmt;

/// What the heuristic tier decided for a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Keep the post
    Include,
    /// Drop the post
    Exclude,
    /// Not confidently classifiable by keywords, defer to the AI verifier
    Escalate,
}

/// Audit label attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    TrustedSource,
    EmptyText,
    DenyMatch,
    AllowMatch,
    Ambiguous,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::TrustedSource => "trusted_source",
            DecisionReason::EmptyText => "empty_text",
            DecisionReason::DenyMatch => "deny_match",
            DecisionReason::AllowMatch => "allow_match",
            DecisionReason::Ambiguous => "ambiguous",
        }
    }
}

impl fmt::Display for DecisionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the heuristic classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationDecision {
    pub outcome: Outcome,
    pub reason: DecisionReason,
    /// True when the post comes from a configured trusted source
    pub is_trusted_source: bool,
}

impl ClassificationDecision {
    pub(crate) fn new(outcome: Outcome, reason: DecisionReason) -> Self {
        Self {
            outcome,
            reason,
            is_trusted_source: false,
        }
    }

    pub(crate) fn trusted() -> Self {
        Self {
            outcome: Outcome::Include,
            reason: DecisionReason::TrustedSource,
            is_trusted_source: true,
        }
    }
}

/// Keyword evidence gathered from a post
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalScan {
    /// Number of lexical tokens after stripping URLs and mentions
    pub token_count: usize,
    /// Distinct allow-list terms found
    pub allow_hits: Vec<String>,
    /// Distinct deny-list terms found
    pub deny_hits: Vec<String>,
}

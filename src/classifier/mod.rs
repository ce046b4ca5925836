// Two-tier relevance classification
//
// Tier 1: heuristic classifier (trusted sources, keyword allow/deny lists)
// Tier 2: AI verifier for posts the heuristics cannot settle (see crate::verifier)

mod heuristic;
mod keywords;
mod types;

pub use heuristic::{matches_trusted_suffix, HeuristicClassifier};
pub use keywords::{KeywordSet, Tokenizer};
pub use types::{ClassificationDecision, DecisionReason, LexicalScan, Outcome};

/// First `max_chars` characters of a text, for audit logs
pub fn snippet(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

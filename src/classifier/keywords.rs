// Keyword matching on normalized post tokens
// URLs and mentions are stripped, tokens are lowercased, hashtags match their bare word
use ahash::{AHashSet, HashMap, HashMapExt};
use regex::Regex;

use crate::error::{IngestError, Result};

/// Splits post text into lowercase lexical tokens
#[derive(Debug, Clone)]
pub struct Tokenizer {
    url: Regex,
    mention: Regex,
    token: Regex,
}

impl Tokenizer {
    pub fn new() -> Result<Self> {
        Ok(Self {
            url: compile(r"(?i)\b(?:https?://|www\.)\S+")?,
            mention: compile(r"@[\w.\-]+")?,
            token: compile(r"[\p{L}\p{N}][\p{L}\p{N}'\-]*")?,
        })
    }

    /// Tokenize text, dropping URLs and @mentions
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let without_urls = self.url.replace_all(text, " ");
        let stripped = self.mention.replace_all(&without_urls, " ");

        self.token
            .find_iter(&stripped)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| IngestError::Config(format!("Invalid tokenizer pattern {}: {}", pattern, e)))
}

/// A configured keyword list, matched on token boundaries
#[derive(Debug, Clone)]
pub struct KeywordSet {
    /// Single-token terms, keyed by token for O(1) lookup
    words: AHashSet<String>,
    /// Multi-token phrases as (original term, tokens)
    phrases: Vec<(String, Vec<String>)>,
    /// Normalized token -> configured term, for reporting hits
    labels: HashMap<String, String>,
}

impl KeywordSet {
    /// Build a keyword set; each term is normalized with the same tokenizer as post text
    pub fn new(terms: &[String], tokenizer: &Tokenizer) -> Self {
        let mut words = AHashSet::new();
        let mut phrases = Vec::new();
        let mut labels = HashMap::new();

        for term in terms {
            let tokens = tokenizer.tokenize(term);
            match tokens.len() {
                0 => {
                    tracing::warn!("Ignoring keyword with no lexical tokens: {:?}", term);
                }
                1 => {
                    labels.insert(tokens[0].clone(), term.trim().to_lowercase());
                    words.insert(tokens[0].clone());
                }
                _ => phrases.push((term.trim().to_lowercase(), tokens)),
            }
        }

        Self {
            words,
            phrases,
            labels,
        }
    }

    /// Distinct configured terms present in the token stream
    pub fn matches(&self, tokens: &[String]) -> Vec<String> {
        let mut seen = AHashSet::new();
        let mut hits = Vec::new();

        for token in tokens {
            if self.words.contains(token) && seen.insert(token.clone()) {
                let label = self.labels.get(token).cloned().unwrap_or_else(|| token.clone());
                hits.push(label);
            }
        }

        for (term, phrase) in &self.phrases {
            if tokens.windows(phrase.len()).any(|w| w == phrase.as_slice()) {
                hits.push(term.clone());
            }
        }

        hits
    }

    pub fn len(&self) -> usize {
        self.words.len() + self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

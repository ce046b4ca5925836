// Verdict and error types for the AI verifier
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure modes of a single verification call
#[derive(Error, Debug)]
pub enum VerifierError {
    #[error("API key environment variable {env} is not set")]
    MissingApiKey { env: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed response envelope: {0}")]
    Envelope(String),

    #[error("Unparseable verdict: {0}")]
    Verdict(String),

    #[error("Token budget exhausted ({used}/{budget})")]
    BudgetExhausted { used: u64, budget: u64 },
}

/// A successfully parsed AI assessment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Assessment {
    /// `quality_score >= quality_threshold`
    pub is_relevant: bool,
    pub quality_score: i64,
    pub category: String,
    pub reason: String,
}

/// Outcome of `AiVerifier::verify`
///
/// An error verdict carries no relevance value; callers must treat it as
/// "do not include".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AiVerdict {
    Assessed(Assessment),
    Error { message: String },
}

impl AiVerdict {
    pub fn is_error(&self) -> bool {
        matches!(self, AiVerdict::Error { .. })
    }

    /// True only for a successful assessment that cleared the threshold
    pub fn should_include(&self) -> bool {
        matches!(self, AiVerdict::Assessed(a) if a.is_relevant)
    }

    pub fn assessment(&self) -> Option<&Assessment> {
        match self {
            AiVerdict::Assessed(a) => Some(a),
            AiVerdict::Error { .. } => None,
        }
    }
}

/// The exact JSON object the service must answer with
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawVerdict {
    pub score: i64,
    pub category: String,
    pub reason: String,
}

/// Scores outside this range are treated as unparseable
pub const SCORE_RANGE: std::ops::RangeInclusive<i64> = 0..=10;

/// Strictly parse the verdict JSON returned in the completion content
pub fn parse_verdict(content: &str) -> Result<RawVerdict, VerifierError> {
    let verdict: RawVerdict = serde_json::from_str(content.trim())
        .map_err(|e| VerifierError::Verdict(e.to_string()))?;

    if !SCORE_RANGE.contains(&verdict.score) {
        return Err(VerifierError::Verdict(format!(
            "score {} outside {:?}",
            verdict.score, SCORE_RANGE
        )));
    }

    Ok(verdict)
}

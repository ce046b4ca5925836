//! Content store for accepted posts
//!
//! The pipeline only needs `ContentStore::upsert`, idempotent on `uri`. The
//! SQLite implementation also serves feed skeletons, statistics and training
//! exports.

pub mod database;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::firehose::PostContent;

pub use database::{FeedItem, FeedPage, SqliteContentStore, StoreStats};

/// Content store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid feed cursor: {0}")]
    InvalidCursor(String),

    #[error("Corrupt row for {uri}: {message}")]
    Corrupt { uri: String, message: String },
}

/// How a post came to be accepted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    /// Decision label: `trusted_source`, `allow_match` or `ai_verified`
    pub reason: String,
    pub ai_score: Option<i64>,
    pub ai_category: Option<String>,
}

impl Provenance {
    pub fn heuristic(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            ai_score: None,
            ai_category: None,
        }
    }

    pub fn ai_verified(score: i64, category: impl Into<String>) -> Self {
        Self {
            reason: "ai_verified".to_string(),
            ai_score: Some(score),
            ai_category: Some(category.into()),
        }
    }
}

/// Durable record of an accepted post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredPost {
    /// `at://{repository_id}/{collection}/{record_key}`; unique
    pub uri: String,
    pub cid: String,
    pub repository_id: String,
    /// Empty for sources outside the operator's namespace
    pub source_handle: String,
    /// Server-assigned; never the record's own timestamp
    pub indexed_at: DateTime<Utc>,
    pub content: PostContent,
    pub provenance: Provenance,
}

/// Write contract the pipeline depends on
pub trait ContentStore: Send + Sync {
    /// Insert or overwrite the post keyed by `uri`; an existing row keeps its `indexed_at`
    fn upsert(&self, post: &StoredPost) -> Result<(), StoreError>;
}

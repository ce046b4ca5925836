//! Firehose commit model
//!
//! The transport that delivers commits is external; this module only defines
//! the commit shape, post-record extraction and a JSONL replay source used by
//! the hosting binary.

mod record;
mod source;

pub use record::{extract_post, EmbedType, ExtractedPost, MalformedRecord, PostContent};
pub use source::{parse_jetstream_line, CommitReader, ReaderStats};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection NSID of top-level posts
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// One repository mutation delivered by the firehose (at-least-once)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirehoseCommit {
    /// Stable actor identifier (DID)
    pub repository_id: String,
    pub collection: String,
    pub record_key: String,
    /// Content hash (CID) of the record
    pub content_identifier: String,
    /// Raw record payload; absent for deletions
    #[serde(default)]
    pub record: Option<Value>,
}

impl FirehoseCommit {
    /// `at://{repository_id}/{collection}/{record_key}`, the store's idempotency key
    pub fn uri(&self) -> String {
        format!(
            "at://{}/{}/{}",
            self.repository_id, self.collection, self.record_key
        )
    }

    pub fn is_post(&self) -> bool {
        self.collection == POST_COLLECTION
    }
}

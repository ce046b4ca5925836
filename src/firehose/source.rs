// JSONL replay of Jetstream-shaped events
//
// One JSON event per line:
// {"did": "...", "kind": "commit", "commit": {"operation": "create", "collection": "...",
//  "rkey": "...", "cid": "...", "record": {...}}}
// Non-commit events are ignored; malformed lines are logged and skipped.

use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::error::{IngestError, Result};
use crate::firehose::FirehoseCommit;

#[derive(Debug, Deserialize)]
struct JetstreamEvent {
    did: String,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    record: Option<Value>,
}

/// Parse one line; `Ok(None)` for events that are not commits
pub fn parse_jetstream_line(line: &str) -> std::result::Result<Option<FirehoseCommit>, serde_json::Error> {
    let event: JetstreamEvent = serde_json::from_str(line)?;

    if event.kind.as_deref().is_some_and(|k| k != "commit") {
        return Ok(None);
    }
    let Some(commit) = event.commit else {
        return Ok(None);
    };

    // Deletions carry no record
    let record = match commit.operation.as_str() {
        "delete" => None,
        _ => commit.record,
    };

    Ok(Some(FirehoseCommit {
        repository_id: event.did,
        collection: commit.collection,
        record_key: commit.rkey,
        content_identifier: commit.cid.unwrap_or_default(),
        record,
    }))
}

/// Counters for a replay run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub lines: u64,
    pub commits: u64,
    pub ignored: u64,
    pub malformed: u64,
}

/// Streams commits out of an async line source
pub struct CommitReader<R> {
    reader: R,
    buf: Vec<u8>,
    stats: ReaderStats,
}

impl<R: AsyncBufRead + Unpin> CommitReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            stats: ReaderStats::default(),
        }
    }

    /// Next commit, or `None` at end of input
    pub async fn next_commit(&mut self) -> Result<Option<FirehoseCommit>> {
        loop {
            self.buf.clear();
            let read = self
                .reader
                .read_until(b'\n', &mut self.buf)
                .await
                .map_err(|e| IngestError::Io {
                    source: e,
                    context: "Failed to read commit stream".to_string(),
                })?;
            if read == 0 {
                return Ok(None);
            }

            self.stats.lines += 1;
            // Invalid UTF-8 is a bad line, not a broken stream
            let line = match std::str::from_utf8(&self.buf) {
                Ok(line) => line.trim(),
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::warn!("Skipping non-UTF-8 line {}: {}", self.stats.lines, e);
                    continue;
                }
            };
            if line.is_empty() {
                continue;
            }

            match parse_jetstream_line(line) {
                Ok(Some(commit)) => {
                    self.stats.commits += 1;
                    return Ok(Some(commit));
                }
                Ok(None) => self.stats.ignored += 1,
                Err(e) => {
                    self.stats.malformed += 1;
                    tracing::warn!("Skipping malformed line {}: {}", self.stats.lines, e);
                }
            }
        }
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }
}

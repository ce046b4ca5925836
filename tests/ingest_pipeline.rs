use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;

use cannect_ingest::config::Config;
use cannect_ingest::firehose::CommitReader;
use cannect_ingest::ingest::Ingestor;
use cannect_ingest::verifier::{
    AiVerifier, Completion, CompletionBackend, RateLimiter, TokenUsage, UsageTracker,
    VerifierError, VerifierSettings,
};

/// Scores posts by keyword so one run can exercise accept, reject and error
struct KeywordScoringBackend {
    started: Mutex<Vec<Instant>>,
}

#[async_trait]
impl CompletionBackend for KeywordScoringBackend {
    async fn complete(&self, _system: &str, user: &str) -> Result<Completion, VerifierError> {
        self.started.lock().unwrap().push(Instant::now());

        if user.contains("timeout") {
            return Err(VerifierError::Request("operation timed out".to_string()));
        }
        let content = if user.contains("SAFE Banking") {
            r#"{"score": 8, "category": "policy", "reason": "federal banking reform"}"#
        } else if user.contains("garbled") {
            "I think this post is about plants"
        } else {
            r#"{"score": 3, "category": "lifestyle", "reason": "not industry-focused"}"#
        };

        Ok(Completion {
            content: content.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: 150,
                completion_tokens: 25,
            }),
        })
    }
}

fn line(did: &str, rkey: &str, record: &str) -> String {
    format!(
        r#"{{"did":"{}","time_us":1,"kind":"commit","commit":{{"rev":"r","operation":"create","collection":"app.bsky.feed.post","rkey":"{}","cid":"cid-{}","record":{}}}}}"#,
        did, rkey, rkey, record
    )
}

fn build(dir: &TempDir, min_delay: Duration) -> (Ingestor, Arc<KeywordScoringBackend>, Arc<UsageTracker>) {
    let mut config = Config::default();
    config.storage.data_dir = dir.path().to_path_buf();
    config.ingest.operator_dids = vec!["did:plc:operator".to_string()];
    config.ingest.shutdown_grace = "5s".to_string();

    let backend = Arc::new(KeywordScoringBackend {
        started: Mutex::new(Vec::new()),
    });
    let usage = Arc::new(UsageTracker::new());
    let verifier = Arc::new(AiVerifier::new(
        backend.clone(),
        Arc::new(RateLimiter::new(min_delay)),
        usage.clone(),
        VerifierSettings {
            quality_threshold: 5,
            max_text_chars: 2000,
            token_budget: None,
        },
    ));

    let ingestor = Ingestor::with_verifier(config, Some(verifier), usage.clone()).unwrap();
    (ingestor, backend, usage)
}

#[tokio::test]
async fn test_end_to_end_replay() {
    let dir = TempDir::new().unwrap();
    let (ingestor, backend, usage) = build(&dir, Duration::from_millis(10));

    let input = [
        // allow_match
        line("did:plc:a", "1", r#"{"text":"Check out this new dispensary opening downtown","langs":["en"]}"#),
        // deny_match
        line("did:plc:b", "2", r#"{"text":"buy crypto now!!"}"#),
        // trusted source, no text
        line("did:plc:operator", "3", r#"{"text":"","embed":{"$type":"app.bsky.embed.images","images":[]}}"#),
        // reply: skipped even though it matches the allow-list
        line("did:plc:a", "4", r#"{"text":"cannabis","reply":{"root":{},"parent":{}}}"#),
        // escalated, low score
        line("did:plc:c", "5", r#"{"text":"Had a great day outside"}"#),
        // escalated, accepted
        line("did:plc:c", "6", r#"{"text":"SAFE Banking vote scheduled for Thursday"}"#),
        // escalated, service failure
        line("did:plc:c", "7", r#"{"text":"timeout test post"}"#),
        // escalated, unparseable verdict
        line("did:plc:c", "8", r#"{"text":"garbled answer expected"}"#),
        // malformed record
        line("did:plc:d", "9", r#"{"text":42}"#),
        "this line is not json".to_string(),
    ]
    .join("\n");

    let reader = CommitReader::new(tokio::io::BufReader::new(input.as_bytes()));
    let summary = ingestor.run(reader).await.unwrap();

    assert!(!summary.interrupted);
    assert_eq!(summary.reader.commits, 9);
    assert_eq!(summary.reader.malformed, 1);

    let store = ingestor.store();
    assert_eq!(store.count().unwrap(), 3);
    assert_eq!(summary.stats.indexed, 3);

    let trusted = store
        .get("at://did:plc:operator/app.bsky.feed.post/3")
        .unwrap()
        .unwrap();
    assert_eq!(trusted.source_handle, "member.cannect.space");
    assert!(trusted.content.has_media);

    let verified = store
        .get("at://did:plc:c/app.bsky.feed.post/6")
        .unwrap()
        .unwrap();
    assert_eq!(verified.provenance.ai_score, Some(8));
    assert_eq!(verified.provenance.ai_category.as_deref(), Some("policy"));

    for rkey in ["2", "4", "5", "7", "8", "9"] {
        let uri = format!(
            "at://{}/app.bsky.feed.post/{}",
            if rkey == "2" {
                "did:plc:b"
            } else if rkey == "4" {
                "did:plc:a"
            } else if rkey == "9" {
                "did:plc:d"
            } else {
                "did:plc:c"
            },
            rkey
        );
        assert!(store.get(&uri).unwrap().is_none(), "{} should not be stored", uri);
    }

    // Four escalations reached the service; three returned usage blocks
    let counters = usage.snapshot();
    assert_eq!(counters.request_count, 3);
    assert_eq!(counters.total_prompt_tokens, 450);
    assert_eq!(counters.total_completion_tokens, 75);

    let started = backend.started.lock().unwrap().clone();
    assert_eq!(started.len(), 4);
}

#[tokio::test]
async fn test_escalations_respect_min_delay() {
    let dir = TempDir::new().unwrap();
    let min_delay = Duration::from_millis(100);
    let (ingestor, backend, _usage) = build(&dir, min_delay);

    let input = (0..3)
        .map(|i| line("did:plc:c", &i.to_string(), r#"{"text":"Had a great day outside"}"#))
        .collect::<Vec<_>>()
        .join("\n");

    let reader = CommitReader::new(tokio::io::BufReader::new(input.as_bytes()));
    ingestor.run(reader).await.unwrap();

    let mut started = backend.started.lock().unwrap().clone();
    started.sort();
    assert_eq!(started.len(), 3);
    for pair in started.windows(2) {
        assert!(pair[1] - pair[0] >= min_delay);
    }
}

#[tokio::test]
async fn test_redelivered_commit_is_stored_once() {
    let dir = TempDir::new().unwrap();
    let (ingestor, _backend, _usage) = build(&dir, Duration::ZERO);

    let commit = line("did:plc:a", "1", r#"{"text":"terpene profiles of new strains"}"#);
    let input = format!("{}\n{}\n", commit, commit);

    let reader = CommitReader::new(tokio::io::BufReader::new(input.as_bytes()));
    let summary = ingestor.run(reader).await.unwrap();

    assert_eq!(summary.stats.indexed, 2);
    assert_eq!(ingestor.store().count().unwrap(), 1);
}

#[tokio::test]
async fn test_invalid_utf8_line_does_not_stop_the_run() {
    let dir = TempDir::new().unwrap();
    let (ingestor, _backend, _usage) = build(&dir, Duration::ZERO);

    let mut input = Vec::new();
    input.extend_from_slice(line("did:plc:a", "1", r#"{"text":"new dispensary menu"}"#).as_bytes());
    input.extend_from_slice(b"\n\xff\xfex\n");
    input.extend_from_slice(line("did:plc:a", "2", r#"{"text":"dispensary hours"}"#).as_bytes());

    let reader = CommitReader::new(tokio::io::BufReader::new(input.as_slice()));
    let summary = ingestor.run(reader).await.unwrap();

    assert_eq!(summary.reader.malformed, 1);
    assert_eq!(summary.reader.commits, 2);
    assert_eq!(ingestor.store().count().unwrap(), 2);
}

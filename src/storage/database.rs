//! SQLite content store with migrations
//!
//! Stores accepted posts keyed by URI and serves feed skeletons, stats and
//! JSONL exports for model training.

use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use crate::firehose::{EmbedType, PostContent};
use crate::storage::{ContentStore, Provenance, StoreError, StoredPost};

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

type StoreResult<T> = std::result::Result<T, StoreError>;

/// SQLite-backed content store
pub struct SqliteContentStore {
    pool: DbPool,
}

/// One entry of a feed skeleton
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    pub uri: String,
    pub cid: String,
    pub indexed_at: DateTime<Utc>,
}

/// A page of the feed, newest first
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Pass back to fetch the next page; `None` when exhausted
    pub cursor: Option<String>,
}

/// Store statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub post_count: u64,
    pub trusted_count: u64,
    pub ai_verified_count: u64,
    pub by_embed_type: BTreeMap<String, u64>,
}

const POST_COLUMNS: &str = "uri, cid, repository_id, source_handle, indexed_at, text, facets, \
                            has_media, embed_type, languages, decision_reason, ai_score, ai_category";

impl SqliteContentStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: &Path, pool_size: u32) -> StoreResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder().max_size(pool_size.max(1)).build(manager)?;

        {
            let conn = pool.get()?;
            // WAL lets feed reads run alongside ingestion writes
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let store = Self { pool };
        store.migrate()?;

        tracing::debug!("Content store opened at {}", db_path.display());

        Ok(store)
    }

    fn get_conn(&self) -> StoreResult<r2d2::PooledConnection<SqliteConnectionManager>> {
        Ok(self.pool.get()?)
    }

    /// Run database migrations
    fn migrate(&self) -> StoreResult<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Fetch a single post by URI
    pub fn get(&self, uri: &str) -> StoreResult<Option<StoredPost>> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM posts WHERE uri = ?1", POST_COLUMNS),
                params![uri],
                PostRow::from_row,
            )
            .optional()?;

        row.map(PostRow::into_post).transpose()
    }

    /// Number of stored posts
    pub fn count(&self) -> StoreResult<u64> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM posts", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Newest-first feed skeleton with `"{indexed_at_micros}::{cid}"` cursors
    pub fn feed(&self, limit: usize, cursor: Option<&str>) -> StoreResult<FeedPage> {
        let (before_micros, before_cid) = match cursor {
            Some(c) => {
                let (micros, cid) = parse_cursor(c)?;
                (Some(micros), Some(cid))
            }
            None => (None, None),
        };

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT uri, cid, indexed_at FROM posts
             WHERE ?1 IS NULL
                OR indexed_at < ?1
                OR (indexed_at = ?1 AND cid < ?2)
             ORDER BY indexed_at DESC, cid DESC
             LIMIT ?3",
        )?;

        let rows = stmt
            .query_map(params![before_micros, before_cid, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut items = Vec::with_capacity(rows.len());
        for (uri, cid, micros) in rows {
            let indexed_at = micros_to_datetime(&uri, micros)?;
            items.push(FeedItem {
                uri,
                cid,
                indexed_at,
            });
        }

        let cursor = if limit > 0 && items.len() == limit {
            items
                .last()
                .map(|last| format!("{}::{}", last.indexed_at.timestamp_micros(), last.cid))
        } else {
            None
        };

        Ok(FeedPage { items, cursor })
    }

    /// Aggregate statistics
    pub fn stats(&self) -> StoreResult<StoreStats> {
        let conn = self.get_conn()?;

        let (post_count, trusted_count, ai_verified_count): (i64, i64, i64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(source_handle != ''), 0),
                    COALESCE(SUM(ai_score IS NOT NULL), 0)
             FROM posts",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;

        let mut stmt =
            conn.prepare("SELECT embed_type, COUNT(*) FROM posts GROUP BY embed_type")?;
        let by_embed_type = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64))
            })?
            .collect::<rusqlite::Result<BTreeMap<_, _>>>()?;

        Ok(StoreStats {
            post_count: post_count as u64,
            trusted_count: trusted_count as u64,
            ai_verified_count: ai_verified_count as u64,
            by_embed_type,
        })
    }

    /// Write posts as JSON lines (oldest first) for training export
    pub fn export_jsonl<W: Write>(
        &self,
        mut writer: W,
        since: Option<DateTime<Utc>>,
    ) -> StoreResult<u64> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM posts WHERE indexed_at >= ?1 ORDER BY indexed_at ASC, uri ASC",
            POST_COLUMNS
        ))?;

        let since_micros = since.map(|t| t.timestamp_micros()).unwrap_or(i64::MIN);
        let rows = stmt.query_map(params![since_micros], PostRow::from_row)?;

        let mut exported = 0u64;
        for row in rows {
            let post = row?.into_post()?;
            serde_json::to_writer(&mut writer, &post)?;
            writer.write_all(b"\n")?;
            exported += 1;
        }
        writer.flush()?;

        Ok(exported)
    }
}

impl ContentStore for SqliteContentStore {
    // indexed_at is left out of the update so redelivery keeps feed position
    fn upsert(&self, post: &StoredPost) -> StoreResult<()> {
        let conn = self.get_conn()?;

        let facets = serde_json::to_string(&post.content.facets)?;
        let languages = serde_json::to_string(&post.content.languages)?;

        conn.execute(
            &format!(
                "INSERT INTO posts ({})
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
                 ON CONFLICT(uri) DO UPDATE SET
                    cid = excluded.cid,
                    repository_id = excluded.repository_id,
                    source_handle = excluded.source_handle,
                    text = excluded.text,
                    facets = excluded.facets,
                    has_media = excluded.has_media,
                    embed_type = excluded.embed_type,
                    languages = excluded.languages,
                    decision_reason = excluded.decision_reason,
                    ai_score = excluded.ai_score,
                    ai_category = excluded.ai_category",
                POST_COLUMNS
            ),
            params![
                &post.uri,
                &post.cid,
                &post.repository_id,
                &post.source_handle,
                post.indexed_at.timestamp_micros(),
                &post.content.text,
                facets,
                post.content.has_media,
                post.content.embed_type.as_str(),
                languages,
                &post.provenance.reason,
                post.provenance.ai_score,
                post.provenance.ai_category.as_deref(),
            ],
        )?;

        tracing::trace!("Upserted post {}", post.uri);

        Ok(())
    }
}

/// Raw column values, converted to a `StoredPost` outside the rusqlite closure
struct PostRow {
    uri: String,
    cid: String,
    repository_id: String,
    source_handle: String,
    indexed_at: i64,
    text: String,
    facets: String,
    has_media: bool,
    embed_type: String,
    languages: String,
    decision_reason: String,
    ai_score: Option<i64>,
    ai_category: Option<String>,
}

impl PostRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            uri: row.get(0)?,
            cid: row.get(1)?,
            repository_id: row.get(2)?,
            source_handle: row.get(3)?,
            indexed_at: row.get(4)?,
            text: row.get(5)?,
            facets: row.get(6)?,
            has_media: row.get(7)?,
            embed_type: row.get(8)?,
            languages: row.get(9)?,
            decision_reason: row.get(10)?,
            ai_score: row.get(11)?,
            ai_category: row.get(12)?,
        })
    }

    fn into_post(self) -> StoreResult<StoredPost> {
        let embed_type = EmbedType::parse(&self.embed_type).ok_or_else(|| StoreError::Corrupt {
            uri: self.uri.clone(),
            message: format!("unknown embed type {}", self.embed_type),
        })?;
        let indexed_at = micros_to_datetime(&self.uri, self.indexed_at)?;

        Ok(StoredPost {
            content: PostContent {
                text: self.text,
                facets: serde_json::from_str(&self.facets)?,
                has_media: self.has_media,
                embed_type,
                languages: serde_json::from_str(&self.languages)?,
            },
            provenance: Provenance {
                reason: self.decision_reason,
                ai_score: self.ai_score,
                ai_category: self.ai_category,
            },
            uri: self.uri,
            cid: self.cid,
            repository_id: self.repository_id,
            source_handle: self.source_handle,
            indexed_at,
        })
    }
}

fn micros_to_datetime(uri: &str, micros: i64) -> StoreResult<DateTime<Utc>> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| StoreError::Corrupt {
        uri: uri.to_string(),
        message: format!("invalid timestamp {}", micros),
    })
}

fn parse_cursor(cursor: &str) -> StoreResult<(i64, String)> {
    let (micros, cid) = cursor
        .split_once("::")
        .ok_or_else(|| StoreError::InvalidCursor(cursor.to_string()))?;
    let micros = micros
        .parse()
        .map_err(|_| StoreError::InvalidCursor(cursor.to_string()))?;
    Ok((micros, cid.to_string()))
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE posts (
        uri TEXT PRIMARY KEY,
        cid TEXT NOT NULL,
        repository_id TEXT NOT NULL,
        source_handle TEXT NOT NULL DEFAULT '',
        indexed_at INTEGER NOT NULL,  -- unix microseconds, server-assigned
        text TEXT NOT NULL,
        facets TEXT NOT NULL,         -- JSON array
        has_media BOOLEAN NOT NULL,
        embed_type TEXT NOT NULL,
        languages TEXT NOT NULL,      -- JSON array
        decision_reason TEXT NOT NULL,
        ai_score INTEGER,
        ai_category TEXT
    );

    CREATE INDEX idx_posts_feed ON posts(indexed_at DESC, cid DESC);
    CREATE INDEX idx_posts_repository ON posts(repository_id);
    CREATE INDEX idx_posts_embed_type ON posts(embed_type);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> SqliteContentStore {
        SqliteContentStore::open(&dir.path().join("posts.sqlite"), 4).unwrap()
    }

    fn post(rkey: &str, micros: i64, text: &str) -> StoredPost {
        StoredPost {
            uri: format!("at://did:plc:test/app.bsky.feed.post/{}", rkey),
            cid: format!("cid-{}", rkey),
            repository_id: "did:plc:test".to_string(),
            source_handle: String::new(),
            indexed_at: Utc.timestamp_micros(micros).unwrap(),
            content: PostContent {
                text: text.to_string(),
                facets: vec![],
                has_media: false,
                embed_type: EmbedType::None,
                languages: vec!["en".to_string()],
            },
            provenance: Provenance::heuristic("allow_match"),
        }
    }

    #[test]
    fn test_migrations() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let conn = store.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = TempDir::new().unwrap();
        {
            let store = open_store(&dir);
            store.upsert(&post("a", 1_000, "first")).unwrap();
        }
        let store = open_store(&dir);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_upsert_and_get_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut original = post("a", 1_700_000_000_000_000, "dispensary opening");
        original.content.facets = vec![serde_json::json!({"features": [{"tag": "cannabis"}]})];
        original.content.embed_type = EmbedType::QuoteWithMedia;
        original.content.has_media = true;
        original.provenance = Provenance::ai_verified(7, "retail");

        store.upsert(&original).unwrap();
        let loaded = store.get(&original.uri).unwrap().unwrap();
        assert_eq!(loaded, original);

        assert!(store.get("at://missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_uri_overwrites() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert(&post("a", 1_000, "old text")).unwrap();
        store.upsert(&post("a", 2_000, "new text")).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        let loaded = store
            .get("at://did:plc:test/app.bsky.feed.post/a")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.content.text, "new text");
    }

    #[test]
    fn test_redelivery_keeps_first_index_time() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert(&post("a", 1_000, "old text")).unwrap();
        store.upsert(&post("b", 1_500, "other")).unwrap();
        store.upsert(&post("a", 2_000, "new text")).unwrap();

        let loaded = store
            .get("at://did:plc:test/app.bsky.feed.post/a")
            .unwrap()
            .unwrap();
        assert_eq!(loaded.content.text, "new text");
        assert_eq!(loaded.indexed_at.timestamp_micros(), 1_000);

        // "b" stays ahead of the redelivered "a"
        let page = store.feed(10, None).unwrap();
        let order: Vec<_> = page.items.iter().map(|item| item.cid.as_str()).collect();
        assert_eq!(order, vec!["cid-b", "cid-a"]);
        assert_eq!(page.items[1].indexed_at.timestamp_micros(), 1_000);
    }

    #[test]
    fn test_feed_pagination() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        for (i, rkey) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            store
                .upsert(&post(rkey, 1_000 + i as i64 * 10, "text"))
                .unwrap();
        }

        let page = store.feed(2, None).unwrap();
        let uris: Vec<_> = page.items.iter().map(|i| i.cid.as_str()).collect();
        assert_eq!(uris, vec!["cid-e", "cid-d"]);
        assert_eq!(page.cursor.as_deref(), Some("1030::cid-d"));

        let page = store.feed(2, page.cursor.as_deref()).unwrap();
        let uris: Vec<_> = page.items.iter().map(|i| i.cid.as_str()).collect();
        assert_eq!(uris, vec!["cid-c", "cid-b"]);

        let page = store.feed(2, page.cursor.as_deref()).unwrap();
        assert_eq!(page.items.len(), 1);
        assert!(page.cursor.is_none());
    }

    #[test]
    fn test_feed_cursor_breaks_timestamp_ties_by_cid() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert(&post("a", 5_000, "x")).unwrap();
        store.upsert(&post("b", 5_000, "y")).unwrap();

        let first = store.feed(1, None).unwrap();
        assert_eq!(first.items[0].cid, "cid-b");
        let second = store.feed(1, first.cursor.as_deref()).unwrap();
        assert_eq!(second.items[0].cid, "cid-a");
    }

    #[test]
    fn test_feed_invalid_cursor() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.feed(10, Some("garbage")),
            Err(StoreError::InvalidCursor(_))
        ));
    }

    #[test]
    fn test_stats() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let mut trusted = post("a", 1_000, "home");
        trusted.source_handle = "member.cannect.space".to_string();
        trusted.provenance = Provenance::heuristic("trusted_source");
        store.upsert(&trusted).unwrap();

        let mut verified = post("b", 2_000, "news");
        verified.provenance = Provenance::ai_verified(8, "news");
        verified.content.embed_type = EmbedType::Images;
        store.upsert(&verified).unwrap();

        store.upsert(&post("c", 3_000, "strain review")).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.post_count, 3);
        assert_eq!(stats.trusted_count, 1);
        assert_eq!(stats.ai_verified_count, 1);
        assert_eq!(stats.by_embed_type.get("none"), Some(&2));
        assert_eq!(stats.by_embed_type.get("images"), Some(&1));
    }

    #[test]
    fn test_export_jsonl() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.upsert(&post("a", 1_000, "first")).unwrap();
        store.upsert(&post("b", 2_000, "second")).unwrap();
        store.upsert(&post("c", 3_000, "third")).unwrap();

        let mut out = Vec::new();
        let since = Utc.timestamp_micros(2_000).unwrap();
        let exported = store.export_jsonl(&mut out, Some(since)).unwrap();
        assert_eq!(exported, 2);

        let lines: Vec<StoredPost> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines[0].content.text, "second");
        assert_eq!(lines[1].content.text, "third");
    }
}

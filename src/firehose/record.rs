// Post record parsing and derived content metadata
// Pure and synchronous: no I/O, no clock
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Record could not be read as a post
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed post record: {0}")]
pub struct MalformedRecord(pub String);

/// Kind of embed attached to a post
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmbedType {
    #[default]
    None,
    Images,
    Video,
    External,
    Quote,
    QuoteWithMedia,
}

impl EmbedType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmbedType::None => "none",
            EmbedType::Images => "images",
            EmbedType::Video => "video",
            EmbedType::External => "external",
            EmbedType::Quote => "quote",
            EmbedType::QuoteWithMedia => "quote_with_media",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "none" => Some(EmbedType::None),
            "images" => Some(EmbedType::Images),
            "video" => Some(EmbedType::Video),
            "external" => Some(EmbedType::External),
            "quote" => Some(EmbedType::Quote),
            "quote_with_media" => Some(EmbedType::QuoteWithMedia),
            _ => None,
        }
    }
}

impl fmt::Display for EmbedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Content metadata stored alongside an accepted post
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostContent {
    pub text: String,
    /// Rich-text facets (mentions, links, tags) as delivered
    pub facets: Vec<Value>,
    pub has_media: bool,
    pub embed_type: EmbedType,
    pub languages: Vec<String>,
}

/// Everything the coordinator needs from a raw record
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedPost {
    /// Trimmed text; `None` when absent or blank
    pub text: Option<String>,
    pub is_reply: bool,
    pub content: PostContent,
}

#[derive(Debug, Deserialize)]
struct PostRecord {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply: Option<Value>,
    #[serde(default)]
    embed: Option<Embed>,
    #[serde(default)]
    facets: Option<Vec<Value>>,
    #[serde(default)]
    langs: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct Embed {
    #[serde(rename = "$type")]
    kind: String,
    #[serde(default)]
    media: Option<Box<Embed>>,
}

const EMBED_IMAGES: &str = "app.bsky.embed.images";
const EMBED_VIDEO: &str = "app.bsky.embed.video";
const EMBED_EXTERNAL: &str = "app.bsky.embed.external";
const EMBED_RECORD: &str = "app.bsky.embed.record";
const EMBED_RECORD_WITH_MEDIA: &str = "app.bsky.embed.recordWithMedia";

/// Classify an embed into (type, has_media)
fn classify_embed(embed: Option<&Embed>) -> (EmbedType, bool) {
    let Some(embed) = embed else {
        return (EmbedType::None, false);
    };

    match embed.kind.as_str() {
        EMBED_IMAGES => (EmbedType::Images, true),
        EMBED_VIDEO => (EmbedType::Video, true),
        EMBED_EXTERNAL => (EmbedType::External, false),
        EMBED_RECORD => (EmbedType::Quote, false),
        EMBED_RECORD_WITH_MEDIA => {
            let has_media = embed
                .media
                .as_deref()
                .is_some_and(|m| matches!(m.kind.as_str(), EMBED_IMAGES | EMBED_VIDEO));
            (EmbedType::QuoteWithMedia, has_media)
        }
        other => {
            tracing::debug!("Unknown embed type {}", other);
            (EmbedType::None, false)
        }
    }
}

/// Extract text and content metadata from a raw post record
pub fn extract_post(record: &Value) -> Result<ExtractedPost, MalformedRecord> {
    if !record.is_object() {
        return Err(MalformedRecord("record is not an object".to_string()));
    }

    let post = PostRecord::deserialize(record).map_err(|e| MalformedRecord(e.to_string()))?;
    let (embed_type, has_media) = classify_embed(post.embed.as_ref());

    let text = post
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    Ok(ExtractedPost {
        is_reply: post.reply.is_some(),
        content: PostContent {
            text: text.clone().unwrap_or_default(),
            facets: post.facets.unwrap_or_default(),
            has_media,
            embed_type,
            languages: post.langs.unwrap_or_default(),
        },
        text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_post() {
        let record = json!({
            "$type": "app.bsky.feed.post",
            "text": "  Fresh harvest today  ",
            "langs": ["en"],
            "createdAt": "2026-01-01T00:00:00Z"
        });

        let post = extract_post(&record).unwrap();
        assert_eq!(post.text.as_deref(), Some("Fresh harvest today"));
        assert!(!post.is_reply);
        assert_eq!(post.content.embed_type, EmbedType::None);
        assert!(!post.content.has_media);
        assert_eq!(post.content.languages, vec!["en"]);
        assert!(post.content.facets.is_empty());
    }

    #[test]
    fn test_reply_detected() {
        let record = json!({
            "text": "agreed",
            "reply": {"root": {"uri": "at://x/app.bsky.feed.post/1", "cid": "c"}, "parent": {"uri": "at://x/app.bsky.feed.post/1", "cid": "c"}}
        });
        assert!(extract_post(&record).unwrap().is_reply);

        let record = json!({"text": "not a reply", "reply": null});
        assert!(!extract_post(&record).unwrap().is_reply);
    }

    #[test]
    fn test_embed_types() {
        let cases = [
            (json!({"$type": EMBED_IMAGES, "images": []}), EmbedType::Images, true),
            (json!({"$type": EMBED_VIDEO}), EmbedType::Video, true),
            (json!({"$type": EMBED_EXTERNAL, "external": {"uri": "https://x"}}), EmbedType::External, false),
            (json!({"$type": EMBED_RECORD}), EmbedType::Quote, false),
            (
                json!({"$type": EMBED_RECORD_WITH_MEDIA, "media": {"$type": EMBED_IMAGES}}),
                EmbedType::QuoteWithMedia,
                true,
            ),
            (
                json!({"$type": EMBED_RECORD_WITH_MEDIA, "media": {"$type": EMBED_EXTERNAL}}),
                EmbedType::QuoteWithMedia,
                false,
            ),
            (json!({"$type": "app.example.embed.poll"}), EmbedType::None, false),
        ];

        for (embed, expected_type, expected_media) in cases {
            let post = extract_post(&json!({"text": "x", "embed": embed})).unwrap();
            assert_eq!(post.content.embed_type, expected_type);
            assert_eq!(post.content.has_media, expected_media);
        }
    }

    #[test]
    fn test_missing_text_is_none() {
        let post = extract_post(&json!({"embed": {"$type": EMBED_IMAGES}})).unwrap();
        assert!(post.text.is_none());
        assert_eq!(post.content.text, "");
        assert!(post.content.has_media);
    }

    #[test]
    fn test_malformed_records() {
        let bad = [
            json!("just a string"),
            json!({"text": 42}),
            json!({"text": "x", "embed": {"images": []}}),
            json!({"text": "x", "langs": "en"}),
            json!({"text": "x", "facets": {"index": 1}}),
        ];
        for record in bad {
            assert!(extract_post(&record).is_err(), "should reject {}", record);
        }
    }

    #[test]
    fn test_embed_type_labels() {
        for t in [
            EmbedType::None,
            EmbedType::Images,
            EmbedType::Video,
            EmbedType::External,
            EmbedType::Quote,
            EmbedType::QuoteWithMedia,
        ] {
            assert_eq!(EmbedType::parse(t.as_str()), Some(t));
        }
        assert_eq!(
            serde_json::to_string(&EmbedType::QuoteWithMedia).unwrap(),
            "\"quote_with_media\""
        );
    }
}

//! Core data models used throughout Brain Box.
//!
//! These types represent inbound items, stored content, decisions, and
//! publish attempts as they flow through the intake pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The kind of content an inbound item carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Document,
    Image,
    Link,
    Note,
}

/// Fixed top-level folders of the remote repository. AI suggestions may only
/// add subfolders beneath these, never rename or remove them.
pub const REPO_FOLDERS: [&str; 5] = ["pictures", "documents", "audios", "links", "notes"];

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Document => "document",
            ContentType::Image => "image",
            ContentType::Link => "link",
            ContentType::Note => "note",
        }
    }

    /// Subtree name under the local storage root.
    pub fn storage_folder(&self) -> &'static str {
        match self {
            ContentType::Document => "documents",
            ContentType::Image => "images",
            ContentType::Link => "links",
            ContentType::Note => "notes",
        }
    }

    /// Top-level folder in the remote repository.
    pub fn repo_folder(&self) -> &'static str {
        match self {
            ContentType::Document => "documents",
            ContentType::Image => "pictures",
            ContentType::Link => "links",
            ContentType::Note => "notes",
        }
    }

    /// Parse a user-supplied type name. Accepts singular and plural forms.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "document" | "documents" => Some(ContentType::Document),
            "image" | "images" => Some(ContentType::Image),
            "link" | "links" => Some(ContentType::Link),
            "note" | "notes" => Some(ContentType::Note),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of content as delivered by the messaging-channel adapter,
/// before any processing.
#[derive(Debug, Clone)]
pub struct InboundItem {
    pub sender_id: i64,
    pub message_id: i64,
    /// Raw bytes for document/image payloads. `None` for pure-text messages.
    pub payload: Option<Vec<u8>>,
    /// Original filename, when the channel provides one.
    pub original_name: Option<String>,
    /// MIME type hint, when the channel provides one.
    pub mime_hint: Option<String>,
    /// Message text or caption.
    pub text: Option<String>,
}

/// One ingested unit of content with its storage location and enrichment
/// metadata, as persisted in the `content_items` table.
#[derive(Debug, Clone)]
pub struct ContentItem {
    pub id: String,
    pub content_type: ContentType,
    /// Path of the raw artifact, relative to the storage root.
    pub raw_file_path: String,
    pub original_name: String,
    pub source_message_id: i64,
    pub source_user_id: i64,
    pub extracted_text: Option<String>,
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub topic: Option<String>,
    /// SHA-256 of the raw bytes, for auditing round trips.
    pub content_hash: String,
    pub created_at: DateTime<Utc>,
}

/// The consequential branch the Decision Engine chooses between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recommendation {
    StoreOnly,
    Publish,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::StoreOnly => "store_only",
            Recommendation::Publish => "publish",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "store_only" => Some(Recommendation::StoreOnly),
            "publish" => Some(Recommendation::Publish),
            _ => None,
        }
    }
}

/// Immutable audit record of one consequential branch choice.
///
/// Decisions are append-only, keyed by `(content_item_id, seq)`. Re-running
/// the pipeline for an item creates a new decision, never mutates an old one.
#[derive(Debug, Clone)]
pub struct Decision {
    pub id: String,
    pub content_item_id: String,
    pub seq: i64,
    /// Snapshot of the item fields and trigger evidence the choice was based on.
    pub context: String,
    /// All candidate actions considered, in order. Always lists both branches.
    pub options: Vec<String>,
    pub recommendation: Recommendation,
    pub rationale: String,
    pub confidence: f64,
    pub created_at: DateTime<Utc>,
}

/// Outcome state of one publish attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishStatus {
    Pending,
    Succeeded,
    Failed,
}

impl PublishStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PublishStatus::Pending => "pending",
            PublishStatus::Succeeded => "succeeded",
            PublishStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PublishStatus::Pending),
            "succeeded" => Some(PublishStatus::Succeeded),
            "failed" => Some(PublishStatus::Failed),
            _ => None,
        }
    }
}

/// Tracks one attempt to push an item to the remote repository.
///
/// At most one `succeeded` record may exist per content item; retries after
/// failure append new records and never re-publish after a prior success.
#[derive(Debug, Clone)]
pub struct PublishRecord {
    pub id: String,
    pub content_item_id: String,
    pub target_path: String,
    pub commit_message: String,
    pub commit_reference: Option<String>,
    pub status: PublishStatus,
    /// Furthest step that completed before the attempt ended.
    pub last_step: Option<String>,
    pub attempted_at: DateTime<Utc>,
}

/// Validated suggestions returned by the Enrichment Gateway.
///
/// Enrichment informs content (tags, summary, restructuring, paths) but never
/// the publish/store branch itself.
#[derive(Debug, Clone, Default)]
pub struct EnrichmentResult {
    pub tags: Vec<String>,
    pub summary: String,
    pub topic: String,
    /// Content restructured as markdown for publishing.
    pub markdown: String,
    pub suggested_subfolder: String,
    pub suggested_filename: String,
    pub suggested_commit_message: String,
    /// True when the reasoning service failed or returned unusable output
    /// and the fields above are deterministic fallbacks.
    pub degraded: bool,
}

/// How a publish trigger was detected in the inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerKind {
    /// Inline marker in the message text or caption (e.g. `#github`).
    Marker,
    /// Explicit publish command issued by the user.
    Command,
}

/// Explicit, deterministic signal authorizing publication.
#[derive(Debug, Clone)]
pub struct TriggerEvidence {
    pub kind: TriggerKind,
    /// The exact string that matched, kept for the decision context.
    pub matched: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parse_accepts_plural() {
        assert_eq!(ContentType::parse("documents"), Some(ContentType::Document));
        assert_eq!(ContentType::parse("image"), Some(ContentType::Image));
        assert_eq!(ContentType::parse("Notes"), Some(ContentType::Note));
        assert_eq!(ContentType::parse("audio"), None);
    }

    #[test]
    fn image_maps_to_pictures_repo_folder() {
        assert_eq!(ContentType::Image.repo_folder(), "pictures");
        assert!(REPO_FOLDERS.contains(&"pictures"));
        assert!(REPO_FOLDERS.contains(&"audios"));
    }

    #[test]
    fn recommendation_roundtrip() {
        for r in [Recommendation::StoreOnly, Recommendation::Publish] {
            assert_eq!(Recommendation::parse(r.as_str()), Some(r));
        }
    }
}

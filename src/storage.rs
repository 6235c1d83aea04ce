//! Raw storage writer.
//!
//! Places raw content bytes on durable local storage using a fixed
//! hierarchical layout:
//!
//! ```text
//! <root>/<type folder>/by_topic/<topic>/<file>
//! <root>/<type folder>/uncategorized/<file>
//! ```
//!
//! Filenames are `{timestamp}_{message_id}_{unique}_{sanitized_original_name}`
//! so a name can be reconstructed for auditing and retries of the same
//! message never overwrite an earlier artifact. Writes are atomic from the
//! caller's point of view: bytes go to a temp file in the destination
//! directory and are renamed into place, so either the full file exists or
//! nothing does. A failure here is fatal to the pipeline run — no item row
//! is created and no enrichment call is made.

use chrono::Utc;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::models::ContentType;

const CONTENT_FOLDERS: [&str; 4] = ["documents", "images", "links", "notes"];

#[derive(Debug, Clone)]
pub struct RawStore {
    root: PathBuf,
}

impl RawStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the full storage subtree. Idempotent.
    pub fn init(&self) -> Result<(), PipelineError> {
        for folder in CONTENT_FOLDERS {
            for bucket in ["uncategorized", "by_topic"] {
                let dir = self.root.join(folder).join(bucket);
                std::fs::create_dir_all(&dir).map_err(|e| {
                    PipelineError::StorageWrite(format!("create {}: {}", dir.display(), e))
                })?;
            }
        }
        Ok(())
    }

    /// Durably write raw bytes and return the path relative to the storage
    /// root. The destination directory is created if missing.
    pub fn write(
        &self,
        content_type: ContentType,
        topic: Option<&str>,
        message_id: i64,
        original_name: &str,
        bytes: &[u8],
    ) -> Result<String, PipelineError> {
        let safe_name = sanitize_name(original_name);
        let bucket = match topic.map(sanitize_topic) {
            Some(t) if !t.is_empty() => format!("by_topic/{}", t),
            _ => "uncategorized".to_string(),
        };
        let timestamp = Utc::now().format("%Y%m%dT%H%M%S");
        let unique = Uuid::new_v4().simple().to_string();
        let filename = format!("{}_{}_{}_{}", timestamp, message_id, &unique[..8], safe_name);

        let rel_path = format!("{}/{}/{}", content_type.storage_folder(), bucket, filename);
        let dest = self.root.join(&rel_path);
        let dir = dest
            .parent()
            .ok_or_else(|| PipelineError::StorageWrite("destination has no parent".into()))?;

        std::fs::create_dir_all(dir)
            .map_err(|e| PipelineError::StorageWrite(format!("create {}: {}", dir.display(), e)))?;

        // Write-to-temp-then-rename keeps the visible file all-or-nothing.
        let tmp = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(e) = std::fs::write(&tmp, bytes) {
            let _ = std::fs::remove_file(&tmp);
            return Err(PipelineError::StorageWrite(format!(
                "write {}: {}",
                tmp.display(),
                e
            )));
        }
        if let Err(e) = std::fs::rename(&tmp, &dest) {
            let _ = std::fs::remove_file(&tmp);
            return Err(PipelineError::StorageWrite(format!(
                "rename to {}: {}",
                dest.display(),
                e
            )));
        }

        Ok(rel_path)
    }

    /// Read a previously written artifact back by its relative path.
    pub fn read(&self, rel_path: &str) -> Result<Vec<u8>, PipelineError> {
        let path = self.root.join(rel_path);
        std::fs::read(&path)
            .map_err(|e| PipelineError::StorageWrite(format!("read {}: {}", path.display(), e)))
    }
}

/// Sanitize a user-supplied filename so it cannot escape the storage root.
///
/// Path separators and anything outside `[A-Za-z0-9._-]` become `_`,
/// dot runs collapse to a single dot so no `..` survives, leading dots are
/// stripped, and the result is capped at 120 characters.
pub fn sanitize_name(name: &str) -> String {
    let mut cleaned = String::new();
    for c in name.chars() {
        let mapped = if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
            c
        } else {
            '_'
        };
        if mapped == '.' && cleaned.ends_with('.') {
            continue;
        }
        cleaned.push(mapped);
    }
    let cleaned = cleaned.trim_start_matches('.').to_string();
    let cleaned: String = cleaned.chars().take(120).collect();
    if cleaned.is_empty() {
        "unnamed".to_string()
    } else {
        cleaned
    }
}

fn sanitize_topic(topic: &str) -> String {
    topic
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(50)
        .collect()
}

//! Content classification.
//!
//! Inspects an inbound payload descriptor (MIME hint, filename, message
//! text) and assigns a content type. Classification never fails:
//! unrecognized content is treated as a note with the text kept as-is.

use crate::models::{ContentType, InboundItem};

const IMAGE_EXTS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const DOCUMENT_EXTS: [&str; 3] = ["pdf", "docx", "doc"];

const DOCUMENT_MIMES: [&str; 3] = [
    "application/pdf",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/msword",
];

/// Classify an inbound item.
pub fn detect(item: &InboundItem) -> ContentType {
    if let Some(mime) = item.mime_hint.as_deref() {
        if mime.starts_with("image/") {
            return ContentType::Image;
        }
        if DOCUMENT_MIMES.contains(&mime) {
            return ContentType::Document;
        }
    }

    if let Some(name) = item.original_name.as_deref() {
        if let Some(ext) = name.rsplit('.').next().map(|e| e.to_lowercase()) {
            if IMAGE_EXTS.contains(&ext.as_str()) {
                return ContentType::Image;
            }
            if DOCUMENT_EXTS.contains(&ext.as_str()) {
                return ContentType::Document;
            }
        }
    }

    if item.payload.is_none() {
        if let Some(text) = item.text.as_deref() {
            if first_url(text).is_some() {
                return ContentType::Link;
            }
        }
    }

    ContentType::Note
}

/// Return the first http(s) URL in a message text, if any.
pub fn first_url(text: &str) -> Option<&str> {
    text.split_whitespace()
        .find(|tok| tok.starts_with("http://") || tok.starts_with("https://"))
}

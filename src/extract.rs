//! Text extraction for stored content.
//!
//! Produces normalized, analysis-ready text when the content type allows it:
//! PDF and DOCX documents are parsed locally, links are fetched over HTTP
//! and reduced to readable text, notes pass through, and images yield
//! nothing (no OCR). Extraction never aborts a pipeline run — every failure
//! degrades to `None` with a logged warning, and the item proceeds to
//! enrichment with whatever text is available.

use std::io::Read;
use std::time::Duration;

use scraper::{Html, Selector};
use tracing::warn;

use crate::models::ContentType;

/// Bound on fetched link text, to keep enrichment input reasonable.
const LINK_TEXT_MAX_CHARS: usize = 5000;
/// Timeout for link fetches. Past this the extractor degrades, not fails.
const LINK_FETCH_TIMEOUT: Duration = Duration::from_secs(15);
/// Zip-bomb protection for the DOCX document part.
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extract text for one item. `bytes` is the raw artifact when one exists,
/// `text` is the message text (used for notes and link URLs).
pub async fn extract(
    content_type: ContentType,
    bytes: Option<&[u8]>,
    text: Option<&str>,
) -> Option<String> {
    match content_type {
        ContentType::Document => {
            let data = bytes?;
            match extract_document(data) {
                Ok(s) if !s.trim().is_empty() => Some(s),
                Ok(_) => {
                    warn!("document extraction produced no text");
                    None
                }
                Err(e) => {
                    warn!(error = %e, "document extraction failed, continuing without text");
                    None
                }
            }
        }
        ContentType::Link => {
            let url = crate::classify::first_url(text?)?;
            fetch_link_text(url).await
        }
        ContentType::Note => text.map(|t| t.to_string()),
        ContentType::Image => None,
    }
}

/// Try PDF first, then DOCX. Both formats arrive without a reliable
/// extension from some channels, so sniffing by parse attempt is simplest.
fn extract_document(bytes: &[u8]) -> Result<String, String> {
    match pdf_extract::extract_text_from_mem(bytes) {
        Ok(text) => return Ok(text),
        Err(pdf_err) => match extract_docx(bytes) {
            Ok(text) => Ok(text),
            Err(docx_err) => Err(format!("pdf: {}; docx: {}", pdf_err, docx_err)),
        },
    }
}

fn extract_docx(bytes: &[u8]) -> Result<String, String> {
    let mut archive =
        zip::ZipArchive::new(std::io::Cursor::new(bytes)).map_err(|e| e.to_string())?;
    let entry = archive
        .by_name("word/document.xml")
        .map_err(|e| e.to_string())?;
    let mut doc_xml = Vec::new();
    entry
        .take(MAX_XML_ENTRY_BYTES)
        .read_to_end(&mut doc_xml)
        .map_err(|e| e.to_string())?;
    if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
        return Err("word/document.xml exceeds size limit".to_string());
    }
    extract_w_t_elements(&doc_xml)
}

/// Pull the text runs (`w:t` elements) out of a DOCX document part.
fn extract_w_t_elements(xml: &[u8]) -> Result<String, String> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                if e.local_name().as_ref() == b"t" {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        if !out.is_empty() {
                            out.push(' ');
                        }
                        out.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
        buf.clear();
    }
    Ok(out)
}

/// Fetch a URL and reduce the response to readable text. Network failures
/// and timeouts degrade to `None`.
async fn fetch_link_text(url: &str) -> Option<String> {
    let client = match reqwest::Client::builder()
        .timeout(LINK_FETCH_TIMEOUT)
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "could not build HTTP client for link fetch");
            return None;
        }
    };

    let response = match client.get(url).send().await {
        Ok(r) => r,
        Err(e) => {
            warn!(url, error = %e, "link fetch failed, continuing without text");
            return None;
        }
    };
    if !response.status().is_success() {
        warn!(url, status = %response.status(), "link fetch returned error status");
        return None;
    }

    let html = match response.text().await {
        Ok(t) => t,
        Err(e) => {
            warn!(url, error = %e, "could not read link response body");
            return None;
        }
    };

    let text = html_to_text(&html);
    if text.trim().is_empty() {
        None
    } else {
        Some(truncate_chars(&text, LINK_TEXT_MAX_CHARS))
    }
}

/// Collect the text of content-bearing elements, skipping script/style and
/// chrome. Falls back to the whole body when nothing matches.
fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let content = Selector::parse("p, h1, h2, h3, h4, h5, h6, li, td, pre, blockquote")
        .expect("static selector");
    let mut parts: Vec<String> = Vec::new();
    for element in doc.select(&content) {
        let piece: String = element.text().collect::<Vec<_>>().join(" ");
        let piece = piece.split_whitespace().collect::<Vec<_>>().join(" ");
        if !piece.is_empty() {
            parts.push(piece);
        }
    }
    if !parts.is_empty() {
        return parts.join("\n");
    }

    let body = Selector::parse("body").expect("static selector");
    doc.select(&body)
        .flat_map(|b| b.text())
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

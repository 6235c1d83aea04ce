//! Enrichment gateway.
//!
//! Narrow interface to the external reasoning service. The service receives
//! normalized text and returns structured suggestions (tags, summary, topic,
//! restructured markdown, suggested subfolder/filename/commit message). It is
//! treated as an untrusted collaborator: everything it returns is validated
//! and sanitized here before anything downstream may use it, and it never
//! mutates storage itself.
//!
//! Providers:
//! - **[`DisabledEnricher`]** — always fails; every item degrades to
//!   deterministic fallback metadata.
//! - **[`OpenAiEnricher`]** — calls the chat-completions API with a strict
//!   JSON contract, retrying rate limits and server errors with exponential
//!   backoff (1s, 2s, 4s, ... capped at 2^5) and failing fast on other
//!   client errors.
//!
//! Enrichment failure is never fatal to a pipeline run.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

use crate::config::EnrichmentConfig;
use crate::extract::truncate_chars;
use crate::models::{ContentType, EnrichmentResult};

const SUMMARY_MAX_CHARS: usize = 500;
const TOPIC_MAX_CHARS: usize = 50;
const SUBFOLDER_MAX_CHARS: usize = 50;
const FILENAME_MAX_CHARS: usize = 60;
const COMMIT_MSG_MAX_CHARS: usize = 120;

const SYSTEM_PROMPT: &str = "You are a content organization assistant for a personal \
knowledge archive. Given a piece of content and its type, return a JSON object with \
exactly these fields:\n\
- \"tags\": a list of 3-5 relevant keyword tags (lowercase strings)\n\
- \"summary\": a 1-2 sentence summary of the content\n\
- \"topic\": a single lowercase topic word (e.g. \"finance\", \"technology\", \"health\", \"general\")\n\
- \"markdown\": the content restructured as clean, readable Markdown with a title heading, \
the summary, the tags, and the content itself\n\
- \"suggested_subfolder\": a short lowercase folder name for organizing by topic \
(alphanumeric and hyphens only)\n\
- \"suggested_filename\": a short descriptive filename ending in .md \
(lowercase, hyphens, alphanumeric)\n\
- \"commit_message\": a concise commit message describing what is being added\n\n\
Return ONLY valid JSON. No markdown fences, no extra text.";

/// Unvalidated suggestion as parsed from the provider response.
#[derive(Debug, Deserialize, Default)]
pub struct RawSuggestion {
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub markdown: String,
    #[serde(default)]
    pub suggested_subfolder: String,
    #[serde(default)]
    pub suggested_filename: String,
    #[serde(default)]
    pub commit_message: String,
}

/// A reasoning-service backend.
#[async_trait]
pub trait Enricher: Send + Sync {
    /// Provider label for logs and `sources`-style output.
    fn name(&self) -> &str;

    /// Send normalized text for analysis and return the parsed suggestion.
    /// Errors are recovered by the caller with deterministic fallbacks.
    async fn analyze(&self, text: &str, content_type: ContentType) -> Result<RawSuggestion>;
}

/// Analyze one item's text and return a validated [`EnrichmentResult`].
///
/// Empty input text short-circuits to the fallback without a remote call.
/// Provider failure degrades to the fallback with `degraded = true`.
pub async fn enrich(
    enricher: &dyn Enricher,
    config: &EnrichmentConfig,
    text: Option<&str>,
    content_type: ContentType,
    original_name: &str,
) -> EnrichmentResult {
    let text = text.unwrap_or("").trim();
    if text.is_empty() {
        let mut result = fallback_result(content_type, original_name);
        result.summary = "No text content available for analysis.".to_string();
        return result;
    }

    let truncated = truncate_chars(text, config.max_input_chars);
    match enricher.analyze(&truncated, content_type).await {
        Ok(raw) => validate_suggestion(raw, content_type, original_name, config.max_tags),
        Err(e) => {
            warn!(provider = enricher.name(), error = %e, "enrichment failed, using fallback metadata");
            fallback_result(content_type, original_name)
        }
    }
}

/// Validate and sanitize provider output. Every field that fails validation
/// is replaced with a deterministic default; nothing from the provider is
/// trusted downstream unfiltered.
pub fn validate_suggestion(
    raw: RawSuggestion,
    content_type: ContentType,
    original_name: &str,
    max_tags: usize,
) -> EnrichmentResult {
    let mut tags: Vec<String> = raw
        .tags
        .into_iter()
        .map(|t| t.to_lowercase().trim().to_string())
        .filter(|t| !t.is_empty())
        .take(max_tags)
        .collect();
    if tags.is_empty() {
        tags.push(content_type.as_str().to_string());
    }

    let summary = {
        let s = raw.summary.trim();
        if s.is_empty() {
            "No summary generated.".to_string()
        } else {
            truncate_chars(s, SUMMARY_MAX_CHARS)
        }
    };

    let topic = {
        let t = sanitize_slug(&raw.topic, TOPIC_MAX_CHARS);
        if t.is_empty() {
            "general".to_string()
        } else {
            t
        }
    };

    let markdown = if raw.markdown.trim().is_empty() {
        build_default_markdown(original_name, &tags, &summary)
    } else {
        raw.markdown
    };

    let suggested_subfolder = {
        let s = sanitize_slug(&raw.suggested_subfolder, SUBFOLDER_MAX_CHARS);
        if s.is_empty() {
            topic.clone()
        } else {
            s
        }
    };

    let suggested_filename = sanitize_filename(&raw.suggested_filename, original_name);

    let suggested_commit_message = {
        let m = raw.commit_message.trim();
        if m.is_empty() {
            format!("Add {}: {}", content_type, original_name)
        } else {
            truncate_chars(m, COMMIT_MSG_MAX_CHARS)
        }
    };

    EnrichmentResult {
        tags,
        summary,
        topic,
        markdown,
        suggested_subfolder,
        suggested_filename,
        suggested_commit_message,
        degraded: false,
    }
}

/// Deterministic result used when the reasoning service is unavailable or
/// returned unusable output.
pub fn fallback_result(content_type: ContentType, original_name: &str) -> EnrichmentResult {
    let tags = vec![content_type.as_str().to_string()];
    let summary = "AI analysis unavailable; content stored without summary.".to_string();
    EnrichmentResult {
        markdown: build_default_markdown(original_name, &tags, &summary),
        suggested_subfolder: "general".to_string(),
        suggested_filename: sanitize_filename("", original_name),
        suggested_commit_message: format!("Add {}: {}", content_type, original_name),
        tags,
        summary,
        topic: "general".to_string(),
        degraded: true,
    }
}

fn build_default_markdown(original_name: &str, tags: &[String], summary: &str) -> String {
    let tag_line = tags
        .iter()
        .map(|t| format!("`{}`", t))
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "# {}\n\n**Summary:** {}\n\n**Tags:** {}\n",
        original_name, summary, tag_line
    )
}

/// Lowercase, alphanumeric-and-hyphen only.
fn sanitize_slug(s: &str, max: usize) -> String {
    s.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .take(max)
        .collect()
}

/// Sanitize a suggested filename; derive one from the original name when the
/// suggestion is empty or reduces to nothing. Always ends in `.md`.
fn sanitize_filename(suggestion: &str, original_name: &str) -> String {
    let mut name: String = suggestion
        .to_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '-'
            }
        })
        .collect::<String>()
        .trim_matches('-')
        .chars()
        .take(FILENAME_MAX_CHARS)
        .collect();

    if name.trim_matches(|c| c == '-' || c == '.').is_empty() {
        name = sanitize_slug(&original_name.to_lowercase().replace('.', "-"), 40);
        if name.is_empty() {
            name = "content".to_string();
        }
    }
    if !name.ends_with(".md") {
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => name = format!("{}.md", stem),
            _ => name = format!("{}.md", name.trim_end_matches('.')),
        }
    }
    name
}

// ============ Disabled Provider ============

/// Enricher used when no provider is configured. Always errors, so every
/// item falls back to deterministic metadata.
pub struct DisabledEnricher;

#[async_trait]
impl Enricher for DisabledEnricher {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn analyze(&self, _text: &str, _content_type: ContentType) -> Result<RawSuggestion> {
        bail!("enrichment provider is disabled")
    }
}

// ============ OpenAI Provider ============

/// Enricher backed by the OpenAI chat-completions API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEnricher {
    model: String,
    timeout_secs: u64,
    max_retries: u32,
}

impl OpenAiEnricher {
    pub fn new(config: &EnrichmentConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("enrichment.model required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model,
            timeout_secs: config.timeout_secs,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Enricher for OpenAiEnricher {
    fn name(&self) -> &str {
        "openai"
    }

    async fn analyze(&self, text: &str, content_type: ContentType) -> Result<RawSuggestion> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY not set"))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.timeout_secs))
            .build()?;

        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user",
                  "content": format!("Content type: {}\n\nText:\n{}", content_type, text) },
            ],
            "temperature": 0.3,
            "max_tokens": 1500,
        });

        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = client
                .post("https://api.openai.com/v1/chat/completions")
                .header("Authorization", format!("Bearer {}", api_key))
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: serde_json::Value = response.json().await?;
                        return parse_completion(&json);
                    }

                    // Rate limited or server error: retry
                    if status.as_u16() == 429 || status.is_server_error() {
                        let body_text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow::anyhow!("OpenAI API error {}: {}", status, body_text));
                        continue;
                    }

                    // Other client errors: don't retry
                    let body_text = response.text().await.unwrap_or_default();
                    bail!("OpenAI API error {}: {}", status, body_text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Enrichment failed after retries")))
    }
}

/// Pull the assistant message out of a chat-completions response and parse
/// it as a [`RawSuggestion`], tolerating stray markdown fences.
fn parse_completion(json: &serde_json::Value) -> Result<RawSuggestion> {
    let content = json
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| anyhow::anyhow!("Invalid completion response: missing message content"))?;

    let stripped = strip_fences(content);
    let suggestion: RawSuggestion = serde_json::from_str(stripped)
        .map_err(|e| anyhow::anyhow!("Provider returned non-JSON suggestion: {}", e))?;
    Ok(suggestion)
}

fn strip_fences(raw: &str) -> &str {
    let raw = raw.trim();
    let raw = raw
        .strip_prefix("```json")
        .or_else(|| raw.strip_prefix("```"))
        .unwrap_or(raw);
    raw.strip_suffix("```").unwrap_or(raw).trim()
}

/// Create the enricher named by the configuration.
pub fn create_enricher(config: &EnrichmentConfig) -> Result<Box<dyn Enricher>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledEnricher)),
        "openai" => Ok(Box::new(OpenAiEnricher::new(config)?)),
        other => bail!("Unknown enrichment provider: {}", other),
    }
}

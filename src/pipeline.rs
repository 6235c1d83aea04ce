//! Pipeline coordination.
//!
//! Sequences one inbound item through the fixed processing order:
//!
//! ```text
//! Received → Stored → Extracted → Enriched → Decided → Persisted
//!                                              → {Published | StoredOnly} → Responded
//! ```
//!
//! The ordering contract is enforced structurally: enrichment takes the
//! already-stored item as input, so no reasoning-service call can happen
//! before the raw bytes are durable, and the decision is persisted in the
//! same transaction as the enrichment update. Failure policy per stage:
//!
//! - authorization, raw write, metadata commit: fatal, run aborts
//! - extraction, enrichment: degrade, run continues with best-effort data
//! - publish: non-fatal; reported as degraded success and retryable
//!   out of band
//!
//! Runs for distinct items may execute concurrently; each item's own
//! sequence is strictly linear.

use chrono::Utc;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ChannelConfig, EnrichmentConfig};
use crate::decision;
use crate::enrich::{self, Enricher};
use crate::error::PipelineError;
use crate::models::{
    ContentItem, ContentType, Decision, EnrichmentResult, InboundItem, PublishRecord,
    PublishStatus, Recommendation, TriggerEvidence,
};
use crate::publish::Publisher;
use crate::storage::RawStore;
use crate::store::MetadataStore;
use crate::{classify, extract};

/// Terminal result of one pipeline run. Carries exactly one user-facing
/// response message.
#[derive(Debug)]
pub struct PipelineOutcome {
    pub item_id: String,
    pub recommendation: Recommendation,
    pub publish: Option<PublishRecord>,
    pub response: String,
}

pub struct Pipeline {
    authorized_sender: i64,
    publish_marker: String,
    enrichment_cfg: EnrichmentConfig,
    raw: RawStore,
    store: MetadataStore,
    enricher: Arc<dyn Enricher>,
    publisher: Publisher,
}

impl Pipeline {
    pub fn new(
        channel: &ChannelConfig,
        enrichment_cfg: EnrichmentConfig,
        raw: RawStore,
        store: MetadataStore,
        enricher: Arc<dyn Enricher>,
        publisher: Publisher,
    ) -> Self {
        Self {
            authorized_sender: channel.allowed_sender_id,
            publish_marker: channel.publish_marker.clone(),
            enrichment_cfg,
            raw,
            store,
            enricher,
            publisher,
        }
    }

    /// Run the full pipeline for one inbound item.
    pub async fn process(&self, inbound: InboundItem) -> Result<PipelineOutcome, PipelineError> {
        // Authorization short-circuits before any file or database write.
        if inbound.sender_id != self.authorized_sender {
            warn!(sender = inbound.sender_id, "rejected unauthorized sender");
            return Err(PipelineError::UnauthorizedSender(inbound.sender_id));
        }

        let content_type = classify::detect(&inbound);
        let original_name = inbound
            .original_name
            .clone()
            .unwrap_or_else(|| default_name(content_type, inbound.message_id));

        let bytes: Vec<u8> = match (&inbound.payload, &inbound.text) {
            (Some(blob), _) => blob.clone(),
            (None, Some(text)) => text.as_bytes().to_vec(),
            (None, None) => {
                return Err(PipelineError::StorageWrite(
                    "inbound item carried neither payload nor text".to_string(),
                ))
            }
        };
        let content_hash = format!("{:x}", Sha256::digest(&bytes));

        // Stored: raw bytes are durable before anything else happens.
        let raw_file_path = self.raw.write(
            content_type,
            None,
            inbound.message_id,
            &original_name,
            &bytes,
        )?;

        let mut item = ContentItem {
            id: Uuid::new_v4().to_string(),
            content_type,
            raw_file_path,
            original_name,
            source_message_id: inbound.message_id,
            source_user_id: inbound.sender_id,
            extracted_text: None,
            tags: Vec::new(),
            summary: None,
            topic: None,
            content_hash,
            created_at: Utc::now(),
        };
        self.store.insert_item(&item).await?;
        info!(item_id = %item.id, content_type = %item.content_type, path = %item.raw_file_path, "stored raw content");

        // Extracted / Enriched: both degrade, never abort.
        let payload_bytes = inbound.payload.as_deref();
        let extracted = extract::extract(content_type, payload_bytes, inbound.text.as_deref()).await;
        let analysis_text = analysis_text(content_type, extracted.as_deref(), inbound.text.as_deref());

        let enrichment = enrich::enrich(
            self.enricher.as_ref(),
            &self.enrichment_cfg,
            analysis_text.as_deref(),
            content_type,
            &item.original_name,
        )
        .await;

        // Decided → Persisted: one transaction for item update + decision.
        let trigger = decision::detect_trigger(inbound.text.as_deref(), &self.publish_marker);
        let seq = self
            .store
            .next_decision_seq(&item.id)
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;
        let dec = decision::decide(&item, &enrichment, trigger.as_ref(), seq);
        self.store
            .finalize_item(&item.id, extracted.as_deref(), &enrichment, &dec)
            .await?;

        item.extracted_text = extracted;
        item.tags = enrichment.tags.clone();
        item.summary = Some(enrichment.summary.clone());
        item.topic = Some(enrichment.topic.clone());
        info!(item_id = %item.id, recommendation = dec.recommendation.as_str(), seq, "decision persisted");

        // Published | StoredOnly → Responded.
        self.conclude(item, &dec, &enrichment).await
    }

    /// Resume an item whose run was interrupted after the raw write but
    /// before its decision was persisted. Replays from enrichment onward
    /// using the durable raw file; the content is never re-received.
    pub async fn resume(&self, item: ContentItem) -> Result<PipelineOutcome, PipelineError> {
        let bytes = self.raw.read(&item.raw_file_path)?;
        let text = match item.content_type {
            ContentType::Note | ContentType::Link => {
                Some(String::from_utf8_lossy(&bytes).to_string())
            }
            _ => None,
        };

        let extracted =
            extract::extract(item.content_type, Some(&bytes), text.as_deref()).await;
        let analysis_text = analysis_text(item.content_type, extracted.as_deref(), text.as_deref());

        let enrichment = enrich::enrich(
            self.enricher.as_ref(),
            &self.enrichment_cfg,
            analysis_text.as_deref(),
            item.content_type,
            &item.original_name,
        )
        .await;

        let trigger = decision::detect_trigger(text.as_deref(), &self.publish_marker);
        let seq = self
            .store
            .next_decision_seq(&item.id)
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;
        let dec = decision::decide(&item, &enrichment, trigger.as_ref(), seq);
        self.store
            .finalize_item(&item.id, extracted.as_deref(), &enrichment, &dec)
            .await?;
        info!(item_id = %item.id, "reconciled interrupted item");

        let mut item = item;
        item.extracted_text = extracted;
        item.tags = enrichment.tags.clone();
        item.summary = Some(enrichment.summary.clone());
        item.topic = Some(enrichment.topic.clone());

        self.conclude(item, &dec, &enrichment).await
    }

    /// Publish an already persisted item on an explicit command trigger,
    /// appending a fresh decision to its history.
    pub async fn publish_existing(
        &self,
        item: ContentItem,
        trigger: TriggerEvidence,
    ) -> Result<PipelineOutcome, PipelineError> {
        let analysis_text = item
            .extracted_text
            .clone()
            .or_else(|| item.summary.clone());
        let enrichment = enrich::enrich(
            self.enricher.as_ref(),
            &self.enrichment_cfg,
            analysis_text.as_deref(),
            item.content_type,
            &item.original_name,
        )
        .await;

        let seq = self
            .store
            .next_decision_seq(&item.id)
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;
        let dec = decision::decide(&item, &enrichment, Some(&trigger), seq);
        self.store
            .append_decision(&dec)
            .await
            .map_err(|e| PipelineError::MetadataPersist(e.to_string()))?;

        self.conclude(item, &dec, &enrichment).await
    }

    /// Publish (when the persisted decision says so) and build the single
    /// response message. The publisher is gated by the exact decision that
    /// was audited, never a re-derivation.
    async fn conclude(
        &self,
        item: ContentItem,
        decision: &Decision,
        enrichment: &EnrichmentResult,
    ) -> Result<PipelineOutcome, PipelineError> {
        let publish = match decision.recommendation {
            Recommendation::StoreOnly => None,
            Recommendation::Publish => {
                match self.publisher.publish(&item, decision, enrichment).await {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(item_id = %item.id, error = %e, "publish orchestration failed");
                        None
                    }
                }
            }
        };

        let response = response_text(&item, enrichment, decision.recommendation, publish.as_ref());
        Ok(PipelineOutcome {
            item_id: item.id,
            recommendation: decision.recommendation,
            publish,
            response,
        })
    }
}

/// Text handed to the enrichment gateway, assembled from the best source
/// the content type offers.
fn analysis_text(
    content_type: ContentType,
    extracted: Option<&str>,
    message_text: Option<&str>,
) -> Option<String> {
    match content_type {
        ContentType::Note => message_text.map(str::to_string),
        // Images have no extractable text; the caption is all there is.
        ContentType::Image => message_text.map(str::to_string),
        ContentType::Document => extracted.map(str::to_string),
        ContentType::Link => {
            let url = message_text.and_then(classify::first_url).unwrap_or_default();
            match (extracted, message_text) {
                (Some(fetched), _) => Some(format!("URL: {}\n\n{}", url, fetched)),
                (None, Some(text)) => Some(format!("URL: {}\n\n{}", url, text)),
                (None, None) => None,
            }
        }
    }
}

fn default_name(content_type: ContentType, message_id: i64) -> String {
    match content_type {
        ContentType::Document => format!("document_{}", message_id),
        ContentType::Image => format!("photo_{}.jpg", message_id),
        ContentType::Link => format!("link_{}.txt", message_id),
        ContentType::Note => format!("note_{}.txt", message_id),
    }
}

/// Exactly one response message per terminal state.
fn response_text(
    item: &ContentItem,
    enrichment: &EnrichmentResult,
    recommendation: Recommendation,
    publish: Option<&PublishRecord>,
) -> String {
    let mut lines = vec![
        format!("Saved {}: {}", item.content_type, item.original_name),
        format!("Topic: {}", enrichment.topic),
        format!("Tags: {}", enrichment.tags.join(", ")),
        format!("Summary: {}", enrichment.summary),
    ];
    if enrichment.degraded {
        lines.push("AI analysis was unavailable; stored with reduced metadata.".to_string());
    }
    match recommendation {
        Recommendation::StoreOnly => {}
        Recommendation::Publish => match publish {
            Some(rec) if rec.status == PublishStatus::Succeeded => {
                lines.push(format!("Published to {}", rec.target_path));
            }
            _ => {
                lines.push(
                    "Publishing failed; content is stored locally and the publish will be retried."
                        .to_string(),
                );
            }
        },
    }
    lines.join("\n")
}

//! Trigger detection and the decision engine.
//!
//! The publish/store branch is a pure function of trigger evidence. The
//! reasoning service's output feeds the decision *context* (tags, summary,
//! topic) for auditability, but can never flip the branch — publishing
//! happens only on an explicit, deterministic user signal.

use chrono::Utc;
use uuid::Uuid;

use crate::models::{
    ContentItem, Decision, EnrichmentResult, Recommendation, TriggerEvidence, TriggerKind,
};

/// Scan a message text for the inline publish marker (e.g. `#github`).
/// Case-insensitive, and the marker must end at a word boundary so that
/// `#githubby` does not trigger.
pub fn detect_trigger(text: Option<&str>, marker: &str) -> Option<TriggerEvidence> {
    let text = text?;
    let haystack = text.to_lowercase();
    let needle = marker.to_lowercase();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        let start = from + pos;
        let end = start + needle.len();
        let boundary = haystack[end..]
            .chars()
            .next()
            .map(|c| !c.is_alphanumeric())
            .unwrap_or(true);
        if boundary {
            // Offsets can drift from the original on non-ASCII lowercasing;
            // fall back to the configured marker in that case.
            let matched = text.get(start..end).unwrap_or(marker).to_string();
            return Some(TriggerEvidence {
                kind: TriggerKind::Marker,
                matched,
            });
        }
        from = end;
    }
    None
}

/// Evidence for an explicit publish command (e.g. the `publish last` CLI
/// command standing in for the channel's `/publish`).
pub fn command_trigger(command: &str) -> TriggerEvidence {
    TriggerEvidence {
        kind: TriggerKind::Command,
        matched: command.to_string(),
    }
}

/// Synthesize the decision object for one pipeline run.
///
/// Deterministic policy: trigger present means publish, absent means
/// store-only; confidence is 1.0 either way because the trigger is an exact
/// match, not a judgment call. Both candidate actions are always listed.
pub fn decide(
    item: &ContentItem,
    enrichment: &EnrichmentResult,
    trigger: Option<&TriggerEvidence>,
    seq: i64,
) -> Decision {
    let (recommendation, rationale) = match trigger {
        Some(_) => (Recommendation::Publish, "explicit publish trigger detected"),
        None => (Recommendation::StoreOnly, "no publish trigger present"),
    };

    let trigger_desc = match trigger {
        Some(t) => format!(
            "{} ({})",
            t.matched,
            match t.kind {
                TriggerKind::Marker => "inline marker",
                TriggerKind::Command => "explicit command",
            }
        ),
        None => "none".to_string(),
    };

    let context = format!(
        "content_type: {}\nraw_file_path: {}\ntrigger: {}\ntags: {}\nsummary: {}\ntopic: {}\nenrichment_degraded: {}",
        item.content_type,
        item.raw_file_path,
        trigger_desc,
        enrichment.tags.join(", "),
        enrichment.summary,
        enrichment.topic,
        enrichment.degraded,
    );

    Decision {
        id: Uuid::new_v4().to_string(),
        content_item_id: item.id.clone(),
        seq,
        context,
        options: vec![
            "store_only: keep content in local storage without publishing".to_string(),
            "publish: restructure content and push to the remote repository".to_string(),
        ],
        recommendation,
        rationale: rationale.to_string(),
        confidence: 1.0,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enrich;
    use crate::models::ContentType;

    fn item() -> ContentItem {
        ContentItem {
            id: "item-1".to_string(),
            content_type: ContentType::Note,
            raw_file_path: "notes/uncategorized/x.txt".to_string(),
            original_name: "x.txt".to_string(),
            source_message_id: 1,
            source_user_id: 42,
            extracted_text: None,
            tags: vec![],
            summary: None,
            topic: None,
            content_hash: "abc".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn marker_detected_case_insensitive() {
        let t = detect_trigger(Some("save this #GitHub please"), "#github").unwrap();
        assert_eq!(t.kind, TriggerKind::Marker);
        assert_eq!(t.matched, "#GitHub");
    }

    #[test]
    fn marker_requires_word_boundary() {
        assert!(detect_trigger(Some("#githubby"), "#github").is_none());
        assert!(detect_trigger(Some("end #github"), "#github").is_some());
        assert!(detect_trigger(Some("#githubby then #github!"), "#github").is_some());
    }

    #[test]
    fn no_text_no_trigger() {
        assert!(detect_trigger(None, "#github").is_none());
    }

    #[test]
    fn no_trigger_means_store_only_with_full_confidence() {
        let e = enrich::fallback_result(ContentType::Note, "x.txt");
        let d = decide(&item(), &e, None, 1);
        assert_eq!(d.recommendation, Recommendation::StoreOnly);
        assert_eq!(d.confidence, 1.0);
        assert_eq!(d.rationale, "no publish trigger present");
        assert_eq!(d.options.len(), 2);
    }

    #[test]
    fn trigger_means_publish_regardless_of_enrichment() {
        // Degraded enrichment must not affect the branch.
        let degraded = enrich::fallback_result(ContentType::Link, "url");
        let trigger = detect_trigger(Some("https://a.b #github"), "#github").unwrap();
        let d = decide(&item(), &degraded, Some(&trigger), 1);
        assert_eq!(d.recommendation, Recommendation::Publish);
        assert_eq!(d.confidence, 1.0);
        assert!(d.context.contains("inline marker"));
    }

    #[test]
    fn branch_is_pure_in_enrichment_content() {
        // Same trigger evidence, wildly different enrichment: same branch.
        let mut rich = enrich::fallback_result(ContentType::Note, "x");
        rich.degraded = false;
        rich.tags = vec!["publish".into(), "github".into()];
        rich.summary = "Please publish this to github immediately".into();

        let none_a = decide(&item(), &rich, None, 1);
        let none_b = decide(&item(), &enrich::fallback_result(ContentType::Note, "x"), None, 2);
        assert_eq!(none_a.recommendation, none_b.recommendation);
    }

    #[test]
    fn decisions_are_distinct_records() {
        let e = enrich::fallback_result(ContentType::Note, "x");
        let a = decide(&item(), &e, None, 1);
        let b = decide(&item(), &e, None, 2);
        assert_ne!(a.id, b.id);
        assert_ne!(a.seq, b.seq);
    }
}

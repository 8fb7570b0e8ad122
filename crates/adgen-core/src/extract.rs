//! Response extraction.
//!
//! The remote agents answer in free-form text. This module is the adapter
//! that locates the structured payload of a stage inside that text: either an
//! embedded JSON object ([`extract_payload`]) or a labeled video URL
//! ([`extract_labeled_url`]). Nothing here fails; a miss is `None` and the
//! caller decides on a fallback.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::session::{MarketAnalysis, ProductMetadata, Script};

/// Scheme prefix of storage-object URIs.
const STORAGE_SCHEME: &str = "gs://";

// ── Event model ──────────────────────────────────────────────

/// One event of a `/run` response. Unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<EventContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parts: Option<Vec<EventPart>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventPart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl AgentEvent {
    /// Build an event with a single text part.
    pub fn text(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            content: Some(EventContent {
                role: Some("model".to_owned()),
                parts: Some(vec![EventPart {
                    text: Some(text.into()),
                }]),
            }),
        }
    }

    /// Text parts of this event, in order.
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.content
            .iter()
            .flat_map(|c| c.parts.iter().flatten())
            .filter_map(|p| p.text.as_deref())
    }
}

/// All text parts across `events`, in order.
pub fn event_texts(events: &[AgentEvent]) -> impl Iterator<Item = &str> {
    events.iter().flat_map(AgentEvent::texts)
}

// ── JSON payloads ────────────────────────────────────────────

/// A stage artifact that the remote agent emits as a JSON object.
pub trait StagePayload: DeserializeOwned {
    /// An object qualifies when at least one of these keys holds a value.
    const REQUIRED_KEYS: &'static [&'static str];
}

impl StagePayload for ProductMetadata {
    const REQUIRED_KEYS: &'static [&'static str] = &["brand", "product_name", "productName"];
}

impl StagePayload for MarketAnalysis {
    const REQUIRED_KEYS: &'static [&'static str] = &[
        "market_size",
        "marketSize",
        "market_trends",
        "marketTrends",
        "audience_insights",
        "audienceInsights",
    ];
}

impl StagePayload for Script {
    const REQUIRED_KEYS: &'static [&'static str] =
        &["audio_script", "audioScript", "video_script", "videoScript"];
}

/// Find the first JSON object in `events` that carries a `T` payload.
///
/// Parts are scanned in order. Within a part the span from the first `{` to
/// the last `}` is tried first, then every standalone object in order of
/// appearance. Candidates that do not parse, lack all of
/// [`T::REQUIRED_KEYS`](StagePayload::REQUIRED_KEYS), or do not decode as
/// `T` are skipped.
pub fn extract_payload<T: StagePayload>(events: &[AgentEvent]) -> Option<T> {
    for text in event_texts(events) {
        for object in object_candidates(text) {
            if !has_required_key(&object, T::REQUIRED_KEYS) {
                continue;
            }
            match serde_json::from_value::<T>(Value::Object(object)) {
                Ok(payload) => return Some(payload),
                Err(e) => debug!(error = %e, "skipping payload candidate"),
            }
        }
    }
    None
}

fn object_candidates(text: &str) -> Vec<Map<String, Value>> {
    let mut found = Vec::new();

    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}'))
        && start < end
        && let Ok(Value::Object(object)) = serde_json::from_str(&text[start..=end])
    {
        found.push(object);
    }

    let mut pos = 0;
    while let Some(offset) = text[pos..].find('{') {
        let start = pos + offset;
        let mut stream = serde_json::Deserializer::from_str(&text[start..]).into_iter::<Value>();
        match stream.next() {
            Some(Ok(Value::Object(object))) => {
                pos = start + stream.byte_offset();
                found.push(object);
            }
            _ => pos = start + 1,
        }
    }

    found
}

fn has_required_key(object: &Map<String, Value>, keys: &[&str]) -> bool {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .any(|value| match value {
            Value::Null | Value::Bool(false) => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

// ── Labeled URLs ─────────────────────────────────────────────

/// Which rendered video a labeled URL refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VideoLabel {
    /// Avatar / voiceover footage.
    ARoll,
    /// Product footage.
    BRoll,
    /// Composed advertisement.
    Final,
}

impl VideoLabel {
    /// The label as it appears before `Video URL:`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ARoll => "A-roll",
            Self::BRoll => "B-roll",
            Self::Final => "Final",
        }
    }
}

impl fmt::Display for VideoLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LABELED_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\b(a-roll|b-roll|final) video url:[*_\s]*[`<]?((?:https?|gs)://[^\s`<>"']+)"#)
        .expect("labeled url pattern is valid")
});

/// Find the first `"<Label> Video URL: <url>"` token for `label`.
///
/// Trailing sentence punctuation is dropped and storage-object URIs are
/// rewritten against `public_endpoint` (see [`to_public_url`]).
pub fn extract_labeled_url(
    events: &[AgentEvent],
    label: VideoLabel,
    public_endpoint: &str,
) -> Option<String> {
    event_texts(events).find_map(|text| {
        LABELED_URL
            .captures_iter(text)
            .filter(|caps| caps[1].eq_ignore_ascii_case(label.as_str()))
            .map(|caps| caps[2].trim_end_matches(['.', ',', ';', ')', ']', '*']).to_owned())
            .find(|url| !url.ends_with("://"))
            .map(|url| to_public_url(&url, public_endpoint))
    })
}

/// Rewrite a `gs://bucket/key` URI to `<public_endpoint>/bucket/key`.
///
/// Web URLs are returned unchanged, so the rewrite is idempotent.
pub fn to_public_url(raw: &str, public_endpoint: &str) -> String {
    match raw.strip_prefix(STORAGE_SCHEME) {
        Some(rest) => format!("{}/{rest}", public_endpoint.trim_end_matches('/')),
        None => raw.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GCS: &str = "https://storage.googleapis.com";

    fn events(texts: &[&str]) -> Vec<AgentEvent> {
        texts
            .iter()
            .map(|t| AgentEvent::text("manager", *t))
            .collect()
    }

    #[test]
    fn test_should_extract_metadata_embedded_in_prose() {
        let events = events(&[
            r#"Here is what I found: {"brand":"Acme","product_name":"Widget"} Let me know!"#,
        ]);
        let metadata: ProductMetadata = extract_payload(&events).expect("should extract");
        assert_eq!(metadata.brand, "Acme");
        assert_eq!(metadata.product_name, "Widget");
    }

    #[test]
    fn test_should_extract_metadata_from_fenced_block() {
        let text = "```json\n{\n  \"brand\": \"Acme\",\n  \"key_features\": [\"a\", \"b\"]\n}\n```";
        let metadata: ProductMetadata = extract_payload(&events(&[text])).expect("should extract");
        assert_eq!(metadata.key_features, vec!["a", "b"]);
    }

    #[test]
    fn test_should_skip_events_without_required_keys() {
        let events = events(&[
            r#"Transferring to agent {"agent_name":"market_agent"}"#,
            r#"{"market_size":"$7.5B","market_trends":["plant-based"]}"#,
        ]);
        assert!(extract_payload::<ProductMetadata>(&events).is_none());

        let market: MarketAnalysis = extract_payload(&events).expect("should extract");
        assert_eq!(market.market_size, "$7.5B");
    }

    #[test]
    fn test_should_find_second_object_when_greedy_span_is_malformed() {
        let text = r#"Draft {not json} and final {"audio_script":"Hi","video_script":"Shot"}"#;
        let script: Script = extract_payload(&events(&[text])).expect("should extract");
        assert_eq!(script.audio_script, "Hi");
        assert_eq!(script.video_script, "Shot");
    }

    #[test]
    fn test_should_accept_camel_case_script_keys() {
        let text = r#"{"audioScript":"Hi","videoScript":"Shot"}"#;
        let script: Script = extract_payload(&events(&[text])).expect("should extract");
        assert!(script.is_complete());
    }

    #[test]
    fn test_should_ignore_empty_required_values() {
        let text = r#"{"brand":"","product_name":null}"#;
        assert!(extract_payload::<ProductMetadata>(&events(&[text])).is_none());
    }

    #[test]
    fn test_should_return_none_for_prose_only() {
        let events = events(&["The market looks promising overall."]);
        assert!(extract_payload::<MarketAnalysis>(&events).is_none());
    }

    #[test]
    fn test_should_handle_events_without_text() {
        let events: Vec<AgentEvent> = serde_json::from_str(
            r#"[{"author":"manager"},{"content":{"parts":[{"functionCall":{"name":"x"}}]}},{"content":{"parts":null}}]"#,
        )
        .expect("should parse events");
        assert_eq!(event_texts(&events).count(), 0);
        assert!(extract_payload::<Script>(&events).is_none());
    }

    #[test]
    fn test_should_take_first_matching_part() {
        let events = events(&[
            r#"{"brand":"First"}"#,
            r#"{"brand":"Second"}"#,
        ]);
        let metadata: ProductMetadata = extract_payload(&events).expect("should extract");
        assert_eq!(metadata.brand, "First");
    }

    #[test]
    fn test_should_extract_and_rewrite_broll_storage_url() {
        let events = events(&["Done! B-roll Video URL: gs://my-bucket/clip.mp4"]);
        let url = extract_labeled_url(&events, VideoLabel::BRoll, GCS);
        assert_eq!(
            url.as_deref(),
            Some("https://storage.googleapis.com/my-bucket/clip.mp4")
        );
    }

    #[test]
    fn test_should_extract_aroll_https_url_unchanged() {
        let events = events(&["A-roll Video URL: https://resource.heygen.ai/video/abc.mp4."]);
        let url = extract_labeled_url(&events, VideoLabel::ARoll, GCS);
        assert_eq!(url.as_deref(), Some("https://resource.heygen.ai/video/abc.mp4"));
    }

    #[test]
    fn test_should_match_only_requested_label() {
        let events = events(&[
            "A-roll Video URL: https://cdn/a.mp4\nB-roll Video URL: https://cdn/b.mp4",
        ]);
        assert_eq!(
            extract_labeled_url(&events, VideoLabel::BRoll, GCS).as_deref(),
            Some("https://cdn/b.mp4")
        );
        assert!(extract_labeled_url(&events, VideoLabel::Final, GCS).is_none());
    }

    #[test]
    fn test_should_extract_markdown_formatted_final_url() {
        let events = events(&["**Final Video URL:** `gs://ads/final/ad.mp4`"]);
        assert_eq!(
            extract_labeled_url(&events, VideoLabel::Final, GCS).as_deref(),
            Some("https://storage.googleapis.com/ads/final/ad.mp4")
        );
    }

    #[test]
    fn test_should_ignore_unlabeled_urls() {
        let events = events(&["Video URL: https://cdn/x.mp4 and https://cdn/y.mp4"]);
        assert!(extract_labeled_url(&events, VideoLabel::ARoll, GCS).is_none());
    }

    #[test]
    fn test_should_rewrite_storage_uri_idempotently() {
        let once = to_public_url("gs://bucket/key/clip.mp4", GCS);
        assert_eq!(once, "https://storage.googleapis.com/bucket/key/clip.mp4");
        assert_eq!(to_public_url(&once, GCS), once);
        assert_eq!(
            to_public_url("http://cdn.example.com/a.mp4", GCS),
            "http://cdn.example.com/a.mp4"
        );
        assert_eq!(
            to_public_url("gs://b/k", "https://cdn.example.com/"),
            "https://cdn.example.com/b/k"
        );
    }
}

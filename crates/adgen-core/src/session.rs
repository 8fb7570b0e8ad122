//! Pipeline session state.
//!
//! A [`Session`] is the authoritative record of one pipeline run: the remote
//! identity, the current [`Stage`], every artifact committed so far, and the
//! feedback flag of the script review. All mutation goes through
//! [`Session::advance`] and friends, which reject transitions whose
//! predecessor artifacts are missing.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

// ── Stage ────────────────────────────────────────────────────

/// Discrete phase of the pipeline, in the order they are reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    /// Session exists but nothing has been extracted yet.
    Input,
    MetadataReady,
    MarketReady,
    /// Script generated; the feedback loop runs here.
    ScriptReady,
    FootageReady,
    /// Final video available.
    VideoReady,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Input => "input",
            Self::MetadataReady => "metadataReady",
            Self::MarketReady => "marketReady",
            Self::ScriptReady => "scriptReady",
            Self::FootageReady => "footageReady",
            Self::VideoReady => "videoReady",
        };
        f.write_str(name)
    }
}

// ── Artifacts ────────────────────────────────────────────────

/// Structured product facts produced by the extraction stage.
///
/// Keys the remote agent emits beyond the known ones are kept in `extra` and
/// passed through to later instructions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductMetadata {
    #[serde(default, deserialize_with = "lenient_text")]
    pub brand: String,

    #[serde(default, alias = "productName", deserialize_with = "lenient_text")]
    pub product_name: String,

    #[serde(default, alias = "productCategory", deserialize_with = "lenient_text")]
    pub product_category: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,

    #[serde(default, alias = "keyFeatures", deserialize_with = "lenient_list")]
    pub key_features: Vec<String>,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_text"
    )]
    pub price: Option<String>,

    #[serde(
        default,
        alias = "imageUrl",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_text"
    )]
    pub image_url: Option<String>,

    #[serde(
        default,
        alias = "productUrl",
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_opt_text"
    )]
    pub product_url: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Market facts produced by the market-analysis stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketAnalysis {
    #[serde(default, alias = "marketSize", deserialize_with = "lenient_text")]
    pub market_size: String,

    #[serde(default, alias = "marketTrends", deserialize_with = "lenient_list")]
    pub market_trends: Vec<String>,

    #[serde(default, alias = "audienceInsights")]
    pub audience_insights: AudienceInsights,

    #[serde(default)]
    pub competitors: Vec<Competitor>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Who the product is for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudienceInsights {
    #[serde(default)]
    pub demographics: Demographics,

    #[serde(default, deserialize_with = "lenient_text")]
    pub psychographics: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Demographics {
    #[serde(default, deserialize_with = "lenient_text")]
    pub age: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub income: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub gender: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A competing product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Competitor {
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub brand: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub price: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub features: String,

    #[serde(default, deserialize_with = "lenient_text")]
    pub description: String,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The two halves of an ad script.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    /// Spoken voiceover, rendered by the avatar agent (A-roll).
    #[serde(default, alias = "audioScript", deserialize_with = "lenient_text")]
    pub audio_script: String,

    /// Shot description, rendered by the product-footage agent (B-roll).
    #[serde(default, alias = "videoScript", deserialize_with = "lenient_text")]
    pub video_script: String,
}

impl Script {
    /// Returns true when both halves carry text.
    pub fn is_complete(&self) -> bool {
        !self.audio_script.trim().is_empty() && !self.video_script.trim().is_empty()
    }

    /// Fill whichever half is blank from `other`. Returns true if anything was filled.
    pub(crate) fn fill_missing_from(&mut self, other: &Script) -> bool {
        let mut filled = false;
        if self.audio_script.trim().is_empty() {
            self.audio_script = other.audio_script.clone();
            filled = true;
        }
        if self.video_script.trim().is_empty() {
            self.video_script = other.video_script.clone();
            filled = true;
        }
        filled
    }
}

/// An artifact committed by a stage transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Artifact {
    Metadata(ProductMetadata),
    MarketAnalysis(MarketAnalysis),
    Script(Script),
    Footage { aroll_url: String, broll_url: String },
    FinalVideo(String),
}

impl Artifact {
    /// The stage this artifact belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            Self::Metadata(_) => Stage::MetadataReady,
            Self::MarketAnalysis(_) => Stage::MarketReady,
            Self::Script(_) => Stage::ScriptReady,
            Self::Footage { .. } => Stage::FootageReady,
            Self::FinalVideo(_) => Stage::VideoReady,
        }
    }
}

/// Names an artifact field, used to track placeholder substitution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ArtifactKind {
    Metadata,
    MarketAnalysis,
    Script,
    Aroll,
    Broll,
    FinalVideo,
}

// ── Session ──────────────────────────────────────────────────

/// The stateful record of one end-to-end pipeline run.
///
/// Sessions are plain values: orchestrator operations take a `&Session` and
/// return the next one, so a failed operation leaves the caller's copy as it
/// was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SessionRecord")]
pub struct Session {
    session_id: String,
    user_id: String,
    stage: Stage,

    #[serde(skip_serializing_if = "Option::is_none")]
    metadata: Option<ProductMetadata>,

    #[serde(skip_serializing_if = "Option::is_none")]
    market_analysis: Option<MarketAnalysis>,

    #[serde(skip_serializing_if = "Option::is_none")]
    script: Option<Script>,

    awaiting_feedback: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    aroll_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    broll_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    final_video_url: Option<String>,

    /// Feedback texts applied to the script, oldest first.
    feedback_history: Vec<String>,

    /// Artifacts whose current value is a placeholder rather than remote output.
    degraded: BTreeSet<ArtifactKind>,
}

/// Wire form of a [`Session`], checked by `TryFrom` before use.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRecord {
    session_id: String,
    user_id: String,
    stage: Stage,
    #[serde(default)]
    metadata: Option<ProductMetadata>,
    #[serde(default)]
    market_analysis: Option<MarketAnalysis>,
    #[serde(default)]
    script: Option<Script>,
    #[serde(default)]
    awaiting_feedback: bool,
    #[serde(default)]
    aroll_url: Option<String>,
    #[serde(default)]
    broll_url: Option<String>,
    #[serde(default)]
    final_video_url: Option<String>,
    #[serde(default)]
    feedback_history: Vec<String>,
    #[serde(default)]
    degraded: BTreeSet<ArtifactKind>,
}

impl TryFrom<SessionRecord> for Session {
    type Error = CoreError;

    fn try_from(record: SessionRecord) -> Result<Self, Self::Error> {
        let session = Self {
            session_id: record.session_id,
            user_id: record.user_id,
            stage: record.stage,
            metadata: record.metadata,
            market_analysis: record.market_analysis,
            script: record.script,
            awaiting_feedback: record.awaiting_feedback,
            aroll_url: record.aroll_url,
            broll_url: record.broll_url,
            final_video_url: record.final_video_url,
            feedback_history: record.feedback_history,
            degraded: record.degraded,
        };
        session.validate()?;
        Ok(session)
    }
}

impl Session {
    /// Create a session for a remote session id, at [`Stage::Input`].
    pub fn create(session_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            user_id: user_id.into(),
            stage: Stage::Input,
            metadata: None,
            market_analysis: None,
            script: None,
            awaiting_feedback: false,
            aroll_url: None,
            broll_url: None,
            final_video_url: None,
            feedback_history: Vec::new(),
            degraded: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn metadata(&self) -> Option<&ProductMetadata> {
        self.metadata.as_ref()
    }

    pub fn market_analysis(&self) -> Option<&MarketAnalysis> {
        self.market_analysis.as_ref()
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    pub fn awaiting_feedback(&self) -> bool {
        self.awaiting_feedback
    }

    pub fn aroll_url(&self) -> Option<&str> {
        self.aroll_url.as_deref()
    }

    pub fn broll_url(&self) -> Option<&str> {
        self.broll_url.as_deref()
    }

    pub fn final_video_url(&self) -> Option<&str> {
        self.final_video_url.as_deref()
    }

    pub fn feedback_history(&self) -> &[String] {
        &self.feedback_history
    }

    /// Artifacts currently holding placeholder content.
    pub fn degraded(&self) -> &BTreeSet<ArtifactKind> {
        &self.degraded
    }

    /// Returns true if any artifact is a placeholder.
    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    /// Returns true once both footage URLs are present.
    pub fn has_footage(&self) -> bool {
        self.aroll_url.is_some() && self.broll_url.is_some()
    }

    /// Check that the session may move to `target`, ignoring artifact content.
    ///
    /// Orchestrator operations call this before contacting the remote
    /// service, so a contract violation never costs a remote call.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` when a predecessor artifact is
    /// absent or when entering `target` would overwrite a write-once artifact.
    pub fn ensure_can_enter(&self, target: Stage) -> Result<(), CoreError> {
        match target {
            Stage::Input => Err(self.reject(target, "a session cannot return to input")),
            Stage::MetadataReady => {
                if self.stage != Stage::Input || self.metadata.is_some() {
                    return Err(self.reject(target, "metadata is already set"));
                }
                Ok(())
            }
            Stage::MarketReady => {
                if self.metadata.is_none() {
                    return Err(self.reject(target, "metadata is missing"));
                }
                if self.stage != Stage::MetadataReady || self.market_analysis.is_some() {
                    return Err(self.reject(target, "market analysis is already set"));
                }
                Ok(())
            }
            Stage::ScriptReady => {
                if self.metadata.is_none() {
                    return Err(self.reject(target, "metadata is missing"));
                }
                if self.market_analysis.is_none() {
                    return Err(self.reject(target, "market analysis is missing"));
                }
                if !matches!(self.stage, Stage::MarketReady | Stage::ScriptReady) {
                    return Err(self.reject(target, "script can no longer change"));
                }
                Ok(())
            }
            Stage::FootageReady => {
                if self.script.is_none() {
                    return Err(self.reject(target, "script is missing"));
                }
                if self.aroll_url.is_some() || self.broll_url.is_some() {
                    return Err(self.reject(target, "footage is already set"));
                }
                if !matches!(self.stage, Stage::ScriptReady | Stage::FootageReady) {
                    return Err(self.reject(target, "script has not been reviewed"));
                }
                Ok(())
            }
            Stage::VideoReady => {
                if !self.has_footage() {
                    return Err(self.reject(target, "A-roll and B-roll footage are required"));
                }
                if self.final_video_url.is_some() {
                    return Err(self.reject(target, "final video is already set"));
                }
                Ok(())
            }
        }
    }

    /// Commit `artifact` and move to `stage`.
    ///
    /// The only self-loop allowed is [`Stage::ScriptReady`] (script revision).
    /// Metadata, market analysis, footage, and the final video are write-once.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` when the artifact does not
    /// belong to `stage`, when [`ensure_can_enter`](Self::ensure_can_enter)
    /// rejects `stage`, or when a URL artifact is blank.
    pub fn advance(&mut self, stage: Stage, artifact: Artifact) -> Result<(), CoreError> {
        if artifact.stage() != stage {
            return Err(self.reject(
                stage,
                format!("artifact belongs to {}", artifact.stage()),
            ));
        }
        self.ensure_can_enter(stage)?;

        match artifact {
            Artifact::Metadata(metadata) => self.metadata = Some(metadata),
            Artifact::MarketAnalysis(market) => self.market_analysis = Some(market),
            Artifact::Script(script) => {
                self.script = Some(script);
                self.awaiting_feedback = true;
            }
            Artifact::Footage {
                aroll_url,
                broll_url,
            } => {
                if aroll_url.trim().is_empty() || broll_url.trim().is_empty() {
                    return Err(self.reject(stage, "footage URLs must not be empty"));
                }
                self.aroll_url = Some(aroll_url);
                self.broll_url = Some(broll_url);
                self.awaiting_feedback = false;
            }
            Artifact::FinalVideo(url) => {
                if url.trim().is_empty() {
                    return Err(self.reject(stage, "final video URL must not be empty"));
                }
                self.final_video_url = Some(url);
            }
        }

        self.stage = stage;
        Ok(())
    }

    /// Set the feedback-await flag.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` when asked to await feedback
    /// outside [`Stage::ScriptReady`].
    pub fn set_feedback(&mut self, awaiting: bool) -> Result<(), CoreError> {
        if awaiting && self.stage != Stage::ScriptReady {
            return Err(self.reject(Stage::ScriptReady, "feedback is only collected on the script"));
        }
        self.awaiting_feedback = awaiting;
        Ok(())
    }

    /// Move to [`Stage::FootageReady`] before any footage exists.
    ///
    /// Observers may render the footage stage while the renders are running.
    pub(crate) fn begin_footage(&mut self) -> Result<(), CoreError> {
        if self.stage != Stage::ScriptReady || self.script.is_none() {
            return Err(self.reject(Stage::FootageReady, "script has not been generated"));
        }
        self.awaiting_feedback = false;
        self.stage = Stage::FootageReady;
        Ok(())
    }

    pub(crate) fn record_feedback(&mut self, feedback: impl Into<String>) {
        self.feedback_history.push(feedback.into());
    }

    /// Record whether `kind` currently holds placeholder content.
    pub(crate) fn set_degraded(&mut self, kind: ArtifactKind, degraded: bool) {
        if degraded {
            self.degraded.insert(kind);
        } else {
            self.degraded.remove(&kind);
        }
    }

    /// Check that the artifacts present match the stage.
    ///
    /// Every session built through [`advance`](Self::advance) passes; this
    /// guards sessions read back from storage.
    fn validate(&self) -> Result<(), CoreError> {
        let invalid = |reason: String| Err(CoreError::InvalidSession(reason));
        let present = [
            ("metadata", self.metadata.is_some(), Stage::MetadataReady),
            ("market analysis", self.market_analysis.is_some(), Stage::MarketReady),
            ("script", self.script.is_some(), Stage::ScriptReady),
        ];
        for (what, is_set, from) in present {
            if is_set != (self.stage >= from) {
                let state = if is_set { "present" } else { "missing" };
                return invalid(format!("{what} is {state} at stage {}", self.stage));
            }
        }

        if self.aroll_url.is_some() != self.broll_url.is_some() {
            return invalid("A-roll and B-roll footage must be set together".to_owned());
        }
        if self.has_footage() && self.stage < Stage::FootageReady {
            return invalid(format!("footage is present at stage {}", self.stage));
        }
        if self.stage == Stage::VideoReady && !self.has_footage() {
            return invalid("footage is missing at stage videoReady".to_owned());
        }
        if self.final_video_url.is_some() != (self.stage == Stage::VideoReady) {
            return invalid(format!(
                "final video does not match stage {}",
                self.stage
            ));
        }
        if self.awaiting_feedback && self.stage != Stage::ScriptReady {
            return invalid(format!("awaiting feedback at stage {}", self.stage));
        }
        Ok(())
    }

    fn reject(&self, to: Stage, reason: impl Into<String>) -> CoreError {
        CoreError::invalid_transition(self.stage, to, reason)
    }
}

// ── Lenient field decoding ───────────────────────────────────

/// Accept strings, numbers, booleans, and lists (joined) as text.
fn lenient_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_opt_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let text = value_to_text(Value::deserialize(deserializer)?);
    Ok((!text.is_empty()).then_some(text))
}

/// Accept a list of scalars or a single scalar as a list of text.
fn lenient_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .into_iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect(),
        other => vec![value_to_text(other)],
    })
}

fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s,
        Value::Array(items) => items
            .into_iter()
            .map(value_to_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    }
}

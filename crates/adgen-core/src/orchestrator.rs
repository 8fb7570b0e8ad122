//! Stage orchestration.
//!
//! [`StageOrchestrator`] drives a [`Session`] through the pipeline, one
//! remote instruction per stage. Each operation validates the session
//! before contacting the remote service, works on a private copy, and
//! returns the committed copy. The caller's session is never touched, so
//! a failed operation leaves it exactly as it was.
//!
//! Responses that carry no usable artifact are replaced by the
//! [`FallbackPolicy`] defaults and the artifact is marked degraded.
//! Transport failures abort the operation.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use adgen_pm::PromptManager;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{EngineConfig, ProjectConfig, load_project_config};
use crate::error::CoreError;
use crate::events::{Operation, PipelineObserver, PipelineSnapshot};
use crate::extract::{VideoLabel, extract_labeled_url, extract_payload};
use crate::fallback::FallbackPolicy;
use crate::feedback::{FeedbackState, validate_feedback};
use crate::remote::{AgentService, HttpAgentService};
use crate::session::{
    Artifact, ArtifactKind, MarketAnalysis, ProductMetadata, Script, Session, Stage,
};

/// Drives sessions through extraction, market analysis, script review,
/// footage generation, and composition.
///
/// # Examples
///
/// ```no_run
/// use std::path::PathBuf;
/// use adgen_core::{EngineConfig, StageOrchestrator};
///
/// # async fn example() -> Result<(), adgen_core::CoreError> {
/// let config = EngineConfig::builder().workdir(PathBuf::from(".")).build();
/// let orchestrator = StageOrchestrator::new(&config)?;
///
/// let session = orchestrator.start_extraction("https://shop.example.com/p/1").await?;
/// let session = orchestrator.run_market_analysis(&session).await?;
/// let session = orchestrator.run_script_generation(&session).await?;
/// let session = orchestrator.approve_script(&session).await?;
/// let session = orchestrator.compose_video(&session).await?;
/// println!("{:?}", session.final_video_url());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct StageOrchestrator {
    service: Arc<dyn AgentService>,
    prompts: PromptManager,
    fallback: FallbackPolicy,
    /// Web prefix for storage-object URIs found in footage responses.
    public_endpoint: String,
    concurrent_footage: bool,
    state: watch::Sender<PipelineSnapshot>,
}

impl StageOrchestrator {
    /// Create an orchestrator talking to the configured HTTP service.
    ///
    /// Loads `.adgen/config.yaml` (defaults when absent), applies the
    /// CLI-level overrides in `config`, and registers prompt overrides.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Config` if the config file is invalid.
    /// Returns `CoreError::Prompt` if prompt templates cannot be loaded.
    /// Returns `CoreError::Transport` if the HTTP client cannot be built.
    #[instrument(skip_all)]
    pub fn new(config: &EngineConfig) -> Result<Self, CoreError> {
        info!(workdir = %config.workdir().display(), "initializing orchestrator");

        let project = load_project_config(&config.config_path())?;
        let remote = config.resolve_remote(&project.remote);
        debug!(base_url = %remote.base_url, app = %remote.app_name, "remote service resolved");

        let service = HttpAgentService::new(remote)?;
        Self::with_service(Arc::new(service), &project, config.workdir())
    }

    /// Create an orchestrator on top of an arbitrary [`AgentService`].
    ///
    /// Relative prompt include directories resolve against `workdir`;
    /// directories that do not exist are skipped.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Prompt` if prompt templates cannot be loaded.
    pub fn with_service(
        service: Arc<dyn AgentService>,
        project: &ProjectConfig,
        workdir: &Path,
    ) -> Result<Self, CoreError> {
        let mut prompts = PromptManager::new()?;
        for dir in &project.prompts.include {
            let resolved = if dir.is_absolute() {
                dir.clone()
            } else {
                workdir.join(dir)
            };
            if resolved.is_dir() {
                prompts.load_dir(&resolved)?;
                debug!(dir = %resolved.display(), "loaded custom prompt directory");
            }
        }

        let (state, _) = watch::channel(PipelineSnapshot::default());
        Ok(Self {
            service,
            prompts,
            fallback: FallbackPolicy::new(project.fallback.clone()),
            public_endpoint: project.storage.public_endpoint.clone(),
            concurrent_footage: project.footage.concurrent,
            state,
        })
    }

    /// Subscribe to pipeline snapshots.
    pub fn subscribe(&self) -> PipelineObserver {
        PipelineObserver::new(self.state.subscribe())
    }

    /// Forget the current pipeline; observers see an empty snapshot.
    pub fn reset(&self) {
        self.state.send_replace(PipelineSnapshot::default());
    }

    /// Create a remote session and extract product metadata for `product_url`.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::EmptyInput` for a blank URL, before any remote call.
    /// Returns `CoreError::Transport` if the remote service fails; no session
    /// is created in that case.
    #[instrument(skip(self))]
    pub async fn start_extraction(&self, product_url: &str) -> Result<Session, CoreError> {
        let product_url = product_url.trim();
        if product_url.is_empty() {
            return Err(CoreError::EmptyInput("product URL"));
        }
        let instruction = self
            .prompts
            .render("extraction", &json!({ "product_url": product_url }))?;

        let running = PipelineSnapshot::running(None, Operation::StartExtraction);
        self.observe(running, None, async {
            let session_id = self.service.create_session().await?;
            let mut session = Session::create(session_id, self.service.user_id());
            let events = self.service.run(session.session_id(), &instruction).await?;

            let (metadata, degraded) = match extract_payload::<ProductMetadata>(&events) {
                Some(mut metadata) => {
                    if metadata.product_url.is_none() {
                        metadata.product_url = Some(product_url.to_owned());
                    }
                    (metadata, false)
                }
                None => {
                    warn!(stage = %Stage::MetadataReady, "no metadata in response, using fallback");
                    (self.fallback.metadata(product_url), true)
                }
            };
            session.advance(Stage::MetadataReady, Artifact::Metadata(metadata))?;
            session.set_degraded(ArtifactKind::Metadata, degraded);
            info!(session_id = %session.session_id(), degraded, "metadata ready");
            Ok(session)
        })
        .await
    }

    /// Run market analysis on the session's metadata.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` if metadata is missing or the
    /// market analysis is already set.
    /// Returns `CoreError::Transport` if the remote service fails.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn run_market_analysis(&self, session: &Session) -> Result<Session, CoreError> {
        session.ensure_can_enter(Stage::MarketReady)?;
        let metadata = require(session.metadata(), session, Stage::MarketReady, "metadata")?;
        let instruction = self.prompts.render(
            "market",
            &json!({ "metadata": serde_json::to_string(metadata)? }),
        )?;

        let running = PipelineSnapshot::running(Some(session.clone()), Operation::MarketAnalysis);
        self.observe(running, Some(session), async {
            let events = self.service.run(session.session_id(), &instruction).await?;

            let (market, degraded) = match extract_payload::<MarketAnalysis>(&events) {
                Some(market) => (market, false),
                None => {
                    warn!(stage = %Stage::MarketReady, "no market analysis in response, using fallback");
                    (self.fallback.market_analysis(), true)
                }
            };
            let mut next = session.clone();
            next.advance(Stage::MarketReady, Artifact::MarketAnalysis(market))?;
            next.set_degraded(ArtifactKind::MarketAnalysis, degraded);
            info!(degraded, "market analysis ready");
            Ok(next)
        })
        .await
    }

    /// Generate the first ad script and start awaiting feedback.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the session is at
    /// [`Stage::MarketReady`]. Revisions go through
    /// [`refine_script`](Self::refine_script).
    /// Returns `CoreError::Transport` if the remote service fails.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn run_script_generation(&self, session: &Session) -> Result<Session, CoreError> {
        session.ensure_can_enter(Stage::ScriptReady)?;
        if session.script().is_some() {
            return Err(CoreError::invalid_transition(
                session.stage(),
                Stage::ScriptReady,
                "script is already generated; send feedback to revise it",
            ));
        }
        let instruction = self.prompts.render("script", &self.analysis_context(session)?)?;

        let running =
            PipelineSnapshot::running(Some(session.clone()), Operation::ScriptGeneration);
        self.observe(running, Some(session), async {
            let events = self.service.run(session.session_id(), &instruction).await?;

            let (script, degraded) = match extract_payload::<Script>(&events) {
                Some(mut script) => {
                    let filled = script.fill_missing_from(&self.fallback.script());
                    if filled {
                        warn!(stage = %Stage::ScriptReady, "incomplete script in response, filling from fallback");
                    }
                    (script, filled)
                }
                None => {
                    warn!(stage = %Stage::ScriptReady, "no script in response, using fallback");
                    (self.fallback.script(), true)
                }
            };
            let mut next = session.clone();
            next.advance(Stage::ScriptReady, Artifact::Script(script))?;
            next.set_degraded(ArtifactKind::Script, degraded);
            info!(degraded, "script ready for review");
            Ok(next)
        })
        .await
    }

    /// Revise the script from user feedback.
    ///
    /// The session stays at [`Stage::ScriptReady`] and keeps awaiting
    /// feedback; any number of rounds is allowed. A response without a
    /// usable script keeps the previous one.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::EmptyInput` for blank feedback, before any remote call.
    /// Returns `CoreError::InvalidTransition` unless the session is awaiting
    /// feedback at [`Stage::ScriptReady`].
    /// Returns `CoreError::Transport` if the remote service fails.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn refine_script(
        &self,
        session: &Session,
        feedback: &str,
    ) -> Result<Session, CoreError> {
        let feedback = validate_feedback(feedback)?;
        if session.stage() != Stage::ScriptReady {
            return Err(CoreError::invalid_transition(
                session.stage(),
                Stage::ScriptReady,
                "script has not been generated",
            ));
        }
        let current = require(session.script(), session, Stage::ScriptReady, "script")?;
        let refining = FeedbackState::of(session)
            .unwrap_or(FeedbackState::Approved)
            .begin_refine()?;

        let mut context = self.analysis_context(session)?;
        context["feedback"] = json!(feedback);
        let instruction = self.prompts.render("refine", &context)?;

        let running = PipelineSnapshot::running(Some(session.clone()), Operation::RefineScript)
            .with_feedback(refining);
        self.observe(running, Some(session), async {
            let events = self.service.run(session.session_id(), &instruction).await?;

            let mut next = session.clone();
            let script = match extract_payload::<Script>(&events) {
                Some(mut script) => {
                    // a half taken from the previous script keeps its flag
                    if !script.fill_missing_from(current) {
                        next.set_degraded(ArtifactKind::Script, false);
                    }
                    script
                }
                None => {
                    warn!(stage = %Stage::ScriptReady, "no script in refinement response, keeping previous script");
                    current.clone()
                }
            };
            next.advance(Stage::ScriptReady, Artifact::Script(script))?;
            next.record_feedback(feedback);
            let review = refining.finish_refine()?;
            info!(round = next.feedback_history().len(), ?review, "script refined");
            Ok(next)
        })
        .await
    }

    /// Approve the script and render A-roll and B-roll footage.
    ///
    /// Observers see the session at [`Stage::FootageReady`] with no footage
    /// as soon as the call starts. Each footage URL is extracted and
    /// defaulted independently.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless the session is awaiting
    /// feedback at [`Stage::ScriptReady`]; approving twice is rejected
    /// without any remote call.
    /// Returns `CoreError::Transport` if either footage request fails.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn approve_script(&self, session: &Session) -> Result<Session, CoreError> {
        let mut pending = session.clone();
        pending.begin_footage()?;
        let approved = FeedbackState::of(session)
            .unwrap_or(FeedbackState::Approved)
            .approve()?;
        let script = require(session.script(), session, Stage::FootageReady, "script")?;

        let aroll_instruction = self
            .prompts
            .render("aroll", &json!({ "audio_script": script.audio_script }))?;
        let broll_instruction = self
            .prompts
            .render("broll", &json!({ "video_script": script.video_script }))?;

        let running = PipelineSnapshot::running(Some(pending.clone()), Operation::ApproveScript)
            .with_feedback(approved);
        self.observe(running, Some(session), async {
            let session_id = session.session_id();
            let aroll = self.render_footage(session_id, &aroll_instruction, VideoLabel::ARoll);
            let broll = self.render_footage(session_id, &broll_instruction, VideoLabel::BRoll);
            let (aroll, broll) = if self.concurrent_footage {
                let (aroll, broll) = tokio::join!(aroll, broll);
                (aroll?, broll?)
            } else {
                let aroll = aroll.await?;
                (aroll, broll.await?)
            };

            let aroll_degraded = aroll.is_none();
            let broll_degraded = broll.is_none();
            let aroll_url = aroll.unwrap_or_else(|| self.fallback.aroll_url());
            let broll_url = broll.unwrap_or_else(|| self.fallback.broll_url());

            let mut next = pending;
            next.advance(
                Stage::FootageReady,
                Artifact::Footage {
                    aroll_url,
                    broll_url,
                },
            )?;
            next.set_degraded(ArtifactKind::Aroll, aroll_degraded);
            next.set_degraded(ArtifactKind::Broll, broll_degraded);
            info!(aroll_degraded, broll_degraded, "footage ready");
            Ok(next)
        })
        .await
    }

    /// Combine the footage into the final video.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::InvalidTransition` unless both footage URLs are
    /// present and no final video exists yet.
    /// Returns `CoreError::Transport` if the remote service fails.
    #[instrument(skip_all, fields(session_id = %session.session_id()))]
    pub async fn compose_video(&self, session: &Session) -> Result<Session, CoreError> {
        session.ensure_can_enter(Stage::VideoReady)?;
        let instruction = self.prompts.render(
            "compose",
            &json!({
                "aroll_url": session.aroll_url().unwrap_or_default(),
                "broll_url": session.broll_url().unwrap_or_default(),
            }),
        )?;

        let running = PipelineSnapshot::running(Some(session.clone()), Operation::ComposeVideo);
        self.observe(running, Some(session), async {
            let events = self.service.run(session.session_id(), &instruction).await?;

            let (url, degraded) =
                match extract_labeled_url(&events, VideoLabel::Final, &self.public_endpoint) {
                    Some(url) => (url, false),
                    None => {
                        warn!(stage = %Stage::VideoReady, "no final video URL in response, using fallback");
                        (self.fallback.final_video_url(), true)
                    }
                };
            let mut next = session.clone();
            next.advance(Stage::VideoReady, Artifact::FinalVideo(url))?;
            next.set_degraded(ArtifactKind::FinalVideo, degraded);
            info!(url = next.final_video_url().unwrap_or_default(), degraded, "final video ready");
            Ok(next)
        })
        .await
    }

    /// Send one footage instruction and pull the labeled URL out of the reply.
    async fn render_footage(
        &self,
        session_id: &str,
        instruction: &str,
        label: VideoLabel,
    ) -> Result<Option<String>, CoreError> {
        let events = self.service.run(session_id, instruction).await?;
        let url = extract_labeled_url(&events, label, &self.public_endpoint);
        if url.is_none() {
            warn!(%label, "no footage URL in response, using fallback");
        }
        Ok(url)
    }

    /// Template context carrying serialized metadata and market analysis.
    fn analysis_context(&self, session: &Session) -> Result<serde_json::Value, CoreError> {
        let metadata = require(session.metadata(), session, Stage::ScriptReady, "metadata")?;
        let market = require(
            session.market_analysis(),
            session,
            Stage::ScriptReady,
            "market analysis",
        )?;
        Ok(json!({
            "metadata": serde_json::to_string(metadata)?,
            "market_analysis": serde_json::to_string(market)?,
        }))
    }

    /// Publish `running`, await `work`, then publish its outcome.
    ///
    /// On failure observers get `previous` back along with the error text.
    async fn observe<F>(
        &self,
        running: PipelineSnapshot,
        previous: Option<&Session>,
        work: F,
    ) -> Result<Session, CoreError>
    where
        F: Future<Output = Result<Session, CoreError>>,
    {
        let operation = running.activity;
        self.state.send_replace(running);
        match work.await {
            Ok(session) => {
                self.state
                    .send_replace(PipelineSnapshot::idle(Some(session.clone())));
                Ok(session)
            }
            Err(e) => {
                error!(?operation, error = %e, "pipeline operation failed");
                self.state
                    .send_replace(PipelineSnapshot::failed(previous.cloned(), e.to_string()));
                Err(e)
            }
        }
    }
}

fn require<'a, T>(
    value: Option<&'a T>,
    session: &Session,
    to: Stage,
    what: &str,
) -> Result<&'a T, CoreError> {
    value.ok_or_else(|| {
        CoreError::invalid_transition(session.stage(), to, format!("{what} is missing"))
    })
}

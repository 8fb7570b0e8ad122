//! In-memory [`AgentService`] for orchestrator tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Barrier;

use crate::error::CoreError;
use crate::events::{PipelineObserver, PipelineSnapshot};
use crate::extract::AgentEvent;
use crate::remote::AgentService;

/// Instruction fragments that identify each stage's rendered template.
pub(crate) const EXTRACTION: &str = "extract product metadata";
pub(crate) const MARKET: &str = "analyze market";
pub(crate) const SCRIPT: &str = "generate video ad script";
pub(crate) const REFINE: &str = "refine the video ad script";
pub(crate) const AROLL: &str = "Run aroll";
pub(crate) const BROLL: &str = "Run broll";
pub(crate) const COMPOSE: &str = "Run processing agent";

/// Canned answer for instructions containing a given fragment.
#[derive(Debug, Clone)]
pub(crate) enum Reply {
    /// Answer with a single model event carrying this text.
    Text(String),
    /// Fail the call with this HTTP status.
    Status(u16),
    /// Wait until every party reached the barrier, then answer with text.
    AfterBarrier(Arc<Barrier>, String),
}

#[derive(Debug, Default)]
pub(crate) struct ScriptedAgent {
    routes: Mutex<Vec<(&'static str, Reply)>>,
    calls: Mutex<Vec<String>>,
    seen: Mutex<Vec<PipelineSnapshot>>,
    observer: Mutex<Option<PipelineObserver>>,
    sessions: AtomicUsize,
    fail_create: bool,
}

impl ScriptedAgent {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A service whose session creation always fails.
    pub(crate) fn unreachable() -> Self {
        Self {
            fail_create: true,
            ..Self::default()
        }
    }

    pub(crate) fn on(self, fragment: &'static str, reply: Reply) -> Self {
        self.routes
            .lock()
            .expect("routes lock should not be poisoned")
            .push((fragment, reply));
        self
    }

    pub(crate) fn on_text(self, fragment: &'static str, text: impl Into<String>) -> Self {
        self.on(fragment, Reply::Text(text.into()))
    }

    /// Record the observer's snapshot each time a call arrives.
    pub(crate) fn watch(&self, observer: PipelineObserver) {
        *self
            .observer
            .lock()
            .expect("observer lock should not be poisoned") = Some(observer);
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .expect("calls lock should not be poisoned")
            .clone()
    }

    pub(crate) fn calls_matching(&self, fragment: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(fragment)).count()
    }

    pub(crate) fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Snapshots observed while calls were in flight.
    pub(crate) fn seen(&self) -> Vec<PipelineSnapshot> {
        self.seen
            .lock()
            .expect("seen lock should not be poisoned")
            .clone()
    }

    fn route(&self, instruction: &str) -> Option<Reply> {
        self.routes
            .lock()
            .expect("routes lock should not be poisoned")
            .iter()
            .find(|(fragment, _)| instruction.contains(fragment))
            .map(|(_, reply)| reply.clone())
    }
}

#[async_trait]
impl AgentService for ScriptedAgent {
    fn user_id(&self) -> &str {
        "user_123"
    }

    async fn create_session(&self) -> Result<String, CoreError> {
        if self.fail_create {
            return Err(CoreError::Transport {
                operation: "create session",
                status: None,
                message: "connection refused".to_owned(),
            });
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(format!("session-{n}"))
    }

    async fn run(
        &self,
        _session_id: &str,
        instruction: &str,
    ) -> Result<Vec<AgentEvent>, CoreError> {
        self.calls
            .lock()
            .expect("calls lock should not be poisoned")
            .push(instruction.to_owned());
        let snapshot = self
            .observer
            .lock()
            .expect("observer lock should not be poisoned")
            .as_ref()
            .map(PipelineObserver::current);
        if let Some(snapshot) = snapshot {
            self.seen
                .lock()
                .expect("seen lock should not be poisoned")
                .push(snapshot);
        }

        match self.route(instruction) {
            Some(Reply::Text(text)) => Ok(vec![AgentEvent::text("manager", text)]),
            Some(Reply::Status(status)) => Err(CoreError::Transport {
                operation: "run",
                status: Some(status),
                message: "scripted failure".to_owned(),
            }),
            Some(Reply::AfterBarrier(barrier, text)) => {
                barrier.wait().await;
                Ok(vec![AgentEvent::text("manager", text)])
            }
            None => Ok(vec![AgentEvent::text("manager", "Done.")]),
        }
    }
}

pub(crate) const METADATA_REPLY: &str = r#"Here is the product: {"brand": "Acme", "product_name": "Widget", "product_category": "tools", "description": "A widget.", "key_features": ["sturdy", "light"]}"#;

pub(crate) const MARKET_REPLY: &str = r#"```json
{"market_size": "$2B", "market_trends": ["DIY growth"], "audience_insights": {"demographics": {"age": "25-45"}}, "competitors": [{"name": "Gizmo"}]}
```"#;

pub(crate) const SCRIPT_REPLY: &str =
    r#"{"audio_script": "Meet the Widget.", "video_script": "Close-up of the Widget."}"#;

pub(crate) const REFINED_REPLY: &str =
    r#"Updated: {"audio_script": "Meet the new Widget!", "video_script": "Slow pan over the Widget."}"#;

/// A service that answers every stage with well-formed output.
pub(crate) fn happy_agent() -> ScriptedAgent {
    ScriptedAgent::new()
        .on_text(EXTRACTION, METADATA_REPLY)
        .on_text(MARKET, MARKET_REPLY)
        .on_text(REFINE, REFINED_REPLY)
        .on_text(SCRIPT, SCRIPT_REPLY)
        .on_text(AROLL, "A-roll Video URL: gs://renders/aroll.mp4")
        .on_text(BROLL, "**B-roll Video URL:** https://cdn.example.com/broll.mp4.")
        .on_text(COMPOSE, "Final Video URL: gs://renders/final.mp4")
}

//! Observer types for UI consumption.
//!
//! The orchestrator is the single writer of pipeline state. Readers hold a
//! [`PipelineObserver`] and receive [`PipelineSnapshot`]s: the last committed
//! session plus what the orchestrator is doing right now. Snapshots are
//! published through a `tokio::sync::watch` channel, so a slow reader only
//! ever sees the latest state.

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::feedback::FeedbackState;
use crate::session::Session;

/// An orchestrator operation, one per pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operation {
    StartExtraction,
    MarketAnalysis,
    ScriptGeneration,
    RefineScript,
    ApproveScript,
    ComposeVideo,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartExtraction => "extraction",
            Self::MarketAnalysis => "market analysis",
            Self::ScriptGeneration => "script generation",
            Self::RefineScript => "script refinement",
            Self::ApproveScript => "footage generation",
            Self::ComposeVideo => "video composition",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the orchestrator is doing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "state", content = "operation")]
pub enum Activity {
    #[default]
    Idle,
    /// A remote call for this operation is in flight.
    Running(Operation),
}

/// Point-in-time view of the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineSnapshot {
    /// Last session state the orchestrator published.
    ///
    /// While footage is being generated this is the optimistic
    /// `FootageReady` session with no footage URLs yet.
    pub session: Option<Session>,

    pub activity: Activity,

    /// Script review state, when a script exists.
    pub feedback: Option<FeedbackState>,

    /// Failure notice for the most recent aborted operation.
    pub last_error: Option<String>,
}

impl PipelineSnapshot {
    pub(crate) fn running(session: Option<Session>, operation: Operation) -> Self {
        let feedback = session.as_ref().and_then(FeedbackState::of);
        Self {
            session,
            activity: Activity::Running(operation),
            feedback,
            last_error: None,
        }
    }

    pub(crate) fn idle(session: Option<Session>) -> Self {
        let feedback = session.as_ref().and_then(FeedbackState::of);
        Self {
            session,
            activity: Activity::Idle,
            feedback,
            last_error: None,
        }
    }

    pub(crate) fn failed(session: Option<Session>, message: String) -> Self {
        Self {
            last_error: Some(message),
            ..Self::idle(session)
        }
    }

    pub(crate) fn with_feedback(mut self, feedback: FeedbackState) -> Self {
        self.feedback = Some(feedback);
        self
    }

    /// Returns true while a remote call is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self.activity, Activity::Running(_))
    }
}

/// Read handle on the pipeline state.
///
/// Obtained from [`StageOrchestrator::subscribe`](crate::StageOrchestrator::subscribe).
#[derive(Debug, Clone)]
pub struct PipelineObserver {
    rx: watch::Receiver<PipelineSnapshot>,
}

impl PipelineObserver {
    pub(crate) fn new(rx: watch::Receiver<PipelineSnapshot>) -> Self {
        Self { rx }
    }

    /// The latest snapshot, without waiting.
    pub fn current(&self) -> PipelineSnapshot {
        self.rx.borrow().clone()
    }

    /// Wait for the next published snapshot.
    ///
    /// Returns `None` once the orchestrator has been dropped.
    pub async fn next(&mut self) -> Option<PipelineSnapshot> {
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}

//! Script review loop.
//!
//! While a session sits at [`Stage::ScriptReady`](crate::Stage::ScriptReady)
//! the user either sends feedback (another revision round) or approves the
//! script (which starts footage generation). [`FeedbackState`] models the
//! loop; blank feedback is rejected before anything reaches the remote
//! service, since approval is the way to accept a script unchanged.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::session::{Session, Stage};

/// State of the review loop nested inside the script stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FeedbackState {
    AwaitingFeedback,
    /// A revision request is in flight.
    Refining,
    /// Terminal; footage generation follows.
    Approved,
}

impl FeedbackState {
    /// Derive the loop state from a committed session.
    ///
    /// The review is open for as long as the session sits at
    /// [`Stage::ScriptReady`], whatever its feedback flag says. Returns
    /// `None` before a script exists.
    pub fn of(session: &Session) -> Option<Self> {
        session.script()?;
        Some(if session.stage() == Stage::ScriptReady {
            Self::AwaitingFeedback
        } else {
            Self::Approved
        })
    }

    /// `AwaitingFeedback -> Refining`.
    pub fn begin_refine(self) -> Result<Self, CoreError> {
        match self {
            Self::AwaitingFeedback => Ok(Self::Refining),
            other => Err(other.reject("refine", Stage::ScriptReady)),
        }
    }

    /// `Refining -> AwaitingFeedback`.
    pub fn finish_refine(self) -> Result<Self, CoreError> {
        match self {
            Self::Refining => Ok(Self::AwaitingFeedback),
            other => Err(other.reject("finish refining", Stage::ScriptReady)),
        }
    }

    /// `AwaitingFeedback -> Approved`.
    pub fn approve(self) -> Result<Self, CoreError> {
        match self {
            Self::AwaitingFeedback => Ok(Self::Approved),
            other => Err(other.reject("approve", Stage::FootageReady)),
        }
    }

    fn reject(self, action: &str, to: Stage) -> CoreError {
        CoreError::invalid_transition(
            Stage::ScriptReady,
            to,
            format!("cannot {action} while the script review is {self:?}"),
        )
    }
}

/// Trim feedback text, rejecting it if nothing is left.
///
/// # Errors
///
/// Returns `CoreError::EmptyInput` for blank feedback.
pub fn validate_feedback(text: &str) -> Result<&str, CoreError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(CoreError::EmptyInput("feedback"));
    }
    Ok(trimmed)
}

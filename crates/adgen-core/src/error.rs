use thiserror::Error;

use crate::session::Stage;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The remote service answered with a non-success status, timed out, or
    /// returned a body that is not the expected JSON shape.
    #[error("{operation} failed{}: {message}", fmt_status(.status))]
    Transport {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    #[error("invalid transition from {from} to {to}: {reason}")]
    InvalidTransition {
        from: Stage,
        to: Stage,
        reason: String,
    },

    #[error("{0} must not be empty")]
    EmptyInput(&'static str),

    /// A stored session whose fields contradict its stage.
    #[error("invalid session: {0}")]
    InvalidSession(String),

    #[error("prompt error: {0}")]
    Prompt(#[from] adgen_pm::PmError),

    #[error("invalid config: {0}")]
    Config(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

fn fmt_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" with status {s}")).unwrap_or_default()
}

impl CoreError {
    pub(crate) fn invalid_transition(from: Stage, to: Stage, reason: impl Into<String>) -> Self {
        Self::InvalidTransition {
            from,
            to,
            reason: reason.into(),
        }
    }

    /// Returns true for failures reported by the remote service.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}

use thiserror::Error;

/// Failures a dashboard cycle can end with.
///
/// None of these are retried automatically; recovery is always a user-initiated re-run of the
/// same operation.
#[derive(Debug, Error)]
pub enum DashboardError {
    /// Network failure or non-success status from the news source or the generative service.
    #[error("request failed: {0:#}")]
    Transport(#[source] anyhow::Error),

    /// The generative service replied without a parseable JSON object.
    #[error("invalid AI response: {0}")]
    MalformedResponse(String),

    /// A newer cycle of the same kind was started before this one completed.
    #[error("superseded by cycle {latest} (this was cycle {generation})")]
    Superseded { generation: u64, latest: u64 },

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl DashboardError {
    /// Stable machine-readable code for API consumers.
    pub fn code(&self) -> &'static str {
        match self {
            DashboardError::Transport(_) => "transport_error",
            DashboardError::MalformedResponse(_) => "malformed_response",
            DashboardError::Superseded { .. } => "superseded",
            DashboardError::InvalidInput(_) => "invalid_input",
        }
    }

    /// Fixed message shown to the user. Transport and malformed replies get different hints so
    /// the UI can suggest a connectivity check or a plain refresh.
    pub fn user_message(&self) -> &'static str {
        match self {
            DashboardError::Transport(_) => "Loading failed. Check your connection and try again.",
            DashboardError::MalformedResponse(_) => "Invalid AI response. Please refresh to retry.",
            DashboardError::Superseded { .. } => "A newer request replaced this one.",
            DashboardError::InvalidInput(_) => "Please enter some text first.",
        }
    }
}

pub type DashboardResult<T> = Result<T, DashboardError>;

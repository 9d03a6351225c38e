//! Engine error types.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Search unavailable: {0}")]
    SearchUnavailable(String),

    #[error("Scoring unavailable: {0}")]
    ScoringUnavailable(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("Model error: {0}")]
    Model(#[from] sbank_models::ModelError),

    #[error("Media error: {0}")]
    Media(#[from] sbank_media::MediaError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn scoring_unavailable(msg: impl Into<String>) -> Self {
        Self::ScoringUnavailable(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    /// Whether a collaborator the run depends on could not be reached.
    pub fn is_collaborator_unavailable(&self) -> bool {
        matches!(
            self,
            EngineError::SearchUnavailable(_) | EngineError::ScoringUnavailable(_)
        )
    }
}

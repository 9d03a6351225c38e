//! Model error types.

use std::path::PathBuf;
use thiserror::Error;

pub type ModelResult<T> = Result<T, ModelError>;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Invalid theme definition: {0}")]
    InvalidTheme(String),

    #[error("Duplicate theme name: {0}")]
    DuplicateTheme(String),

    #[error("Unknown fetch mode: {0}")]
    UnknownFetchMode(String),

    #[error("Themes file not found: {0}")]
    ThemesNotFound(PathBuf),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ModelError {
    pub fn invalid_theme(msg: impl Into<String>) -> Self {
        Self::InvalidTheme(msg.into())
    }
}

//! Wire types for the scoring service.

use serde::{Deserialize, Serialize};

/// Body of `POST /score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    /// Local path of the clip, readable by the service
    pub audio_path: String,
    /// One text prompt per theme, in theme order
    pub prompts: Vec<String>,
}

/// Response of `POST /score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    /// Similarity per prompt, same order as the request
    pub scores: Vec<f64>,
}

/// Response of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    #[serde(default)]
    pub model: Option<String>,
}

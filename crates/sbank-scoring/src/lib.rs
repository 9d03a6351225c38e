//! Client for the audio/text similarity scoring service.
//!
//! The service embeds an audio file and a set of text prompts and returns
//! one similarity per prompt. The model behind it is opaque to this crate.

pub mod client;
pub mod error;
pub mod types;

pub use client::{ScoringClient, ScoringClientConfig};
pub use error::{ScoringError, ScoringResult};
pub use types::{HealthResponse, ScoreRequest, ScoreResponse};

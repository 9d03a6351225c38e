//! Scoring service HTTP client.

use std::path::Path;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::{debug, warn};

use crate::error::{ScoringError, ScoringResult};
use crate::types::{HealthResponse, ScoreRequest, ScoreResponse};

/// Configuration for the scoring client.
#[derive(Debug, Clone)]
pub struct ScoringClientConfig {
    /// Base URL of the scoring service
    pub base_url: String,
    /// Request timeout
    pub timeout: Duration,
    /// Max retries
    pub max_retries: u32,
    /// Base delay between retries, doubled per attempt
    pub retry_delay: Duration,
}

impl Default for ScoringClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8002".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }
}

impl ScoringClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        Self {
            base_url: std::env::var("SCORING_URL")
                .unwrap_or_else(|_| "http://localhost:8002".to_string()),
            timeout: Duration::from_secs(
                std::env::var("SCORING_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("SCORING_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
            ..Default::default()
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

/// Client for the similarity scoring service.
#[derive(Debug, Clone)]
pub struct ScoringClient {
    http: Client,
    config: ScoringClientConfig,
}

impl ScoringClient {
    pub fn new(config: ScoringClientConfig) -> ScoringResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ScoringError::Network)?;

        Ok(Self { http, config })
    }

    pub fn from_env() -> ScoringResult<Self> {
        Self::new(ScoringClientConfig::from_env())
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Check if the scoring service is up and has its model loaded.
    pub async fn health_check(&self) -> ScoringResult<bool> {
        let url = format!("{}/health", self.config.base_url.trim_end_matches('/'));

        match self.http.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                let health: HealthResponse = response.json().await?;
                Ok(health.status == "healthy" || health.status == "ok")
            }
            Ok(response) => {
                warn!("Scoring service health check failed: {}", response.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Scoring service health check error: {}", e);
                Ok(false)
            }
        }
    }

    /// Score one clip against several prompts.
    ///
    /// Returns one similarity per prompt, in prompt order.
    pub async fn score_all(&self, audio: &Path, prompts: &[String]) -> ScoringResult<Vec<f64>> {
        let url = format!("{}/score", self.config.base_url.trim_end_matches('/'));
        let request = ScoreRequest {
            audio_path: audio.to_string_lossy().to_string(),
            prompts: prompts.to_vec(),
        };

        debug!(audio = %request.audio_path, prompts = prompts.len(), "Scoring clip");

        let response: ScoreResponse = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .json(&request)
                    .send()
                    .await
                    .map_err(|e| self.map_transport_error(e))?;

                let status = response.status();
                if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
                    return Err(ScoringError::ServiceUnavailable(status.to_string()));
                }
                if !status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ScoringError::RequestFailed(format!(
                        "scoring service returned {}: {}",
                        status, body
                    )));
                }

                Ok(response.json::<ScoreResponse>().await?)
            })
            .await?;

        validate_scores(response.scores, prompts.len())
    }

    /// Score one clip against a single prompt.
    pub async fn score(&self, audio: &Path, prompt: &str) -> ScoringResult<f64> {
        let scores = self.score_all(audio, &[prompt.to_string()]).await?;
        scores
            .first()
            .copied()
            .ok_or_else(|| ScoringError::InvalidResponse("empty scores".to_string()))
    }

    fn map_transport_error(&self, e: reqwest::Error) -> ScoringError {
        if e.is_timeout() {
            ScoringError::Timeout(self.config.timeout.as_secs())
        } else if e.is_connect() {
            ScoringError::ServiceUnavailable(e.to_string())
        } else {
            ScoringError::Network(e)
        }
    }

    /// Execute with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> ScoringResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ScoringResult<T>>,
    {
        let mut attempt = 0u32;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = self.config.retry_delay.saturating_mul(2u32.pow(attempt));
                    warn!(
                        "Scoring request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

fn validate_scores(scores: Vec<f64>, expected: usize) -> ScoringResult<Vec<f64>> {
    if scores.len() != expected {
        return Err(ScoringError::InvalidResponse(format!(
            "expected {} scores, got {}",
            expected,
            scores.len()
        )));
    }
    if scores.iter().any(|s| !s.is_finite()) {
        return Err(ScoringError::InvalidResponse("non-finite score".to_string()));
    }
    Ok(scores)
}

//! Structured run logging.
//!
//! Every lifecycle line carries the run and session ids so that interleaved
//! runs can be told apart in aggregated logs.

use tracing::{error, info, warn, Span};

/// Logger for one fill run.
#[derive(Debug, Clone)]
pub struct RunLogger {
    run_id: String,
    session_id: String,
}

impl RunLogger {
    pub fn new(run_id: &str, session_id: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            session_id: session_id.to_string(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            session_id = %self.session_id,
            "Run started: {}", message
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            session_id = %self.session_id,
            "Run progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            run_id = %self.run_id,
            session_id = %self.session_id,
            "Run warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            run_id = %self.run_id,
            session_id = %self.session_id,
            "Run error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            session_id = %self.session_id,
            "Run finished: {}", message
        );
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Span wrapping everything the orchestrator does for this run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "run",
            run_id = %self.run_id,
            session_id = %self.session_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_logger_ids() {
        let logger = RunLogger::new("run-1", "20240101_120000_ab12");
        assert_eq!(logger.run_id(), "run-1");
        assert_eq!(logger.session_id(), "20240101_120000_ab12");
    }
}

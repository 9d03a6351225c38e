//! Fill-to-quota engine for themed sample banks.
//!
//! This crate provides:
//! - Run configuration from the environment and a themes file
//! - Dedup ledger and per-theme bank tracker
//! - Rule-based and similarity-scored candidate routing
//! - Words-list queries for themes whose searches run dry
//! - The batch orchestrator and its run handle
//! - Session layout, retry helpers, logging and metrics

pub mod config;
pub mod error;
pub mod ledger;
pub mod logging;
pub mod metrics;
pub mod retry;
pub mod router;
pub mod run;
pub mod session;
pub mod tracker;
pub mod words;

mod orchestrator;

pub use config::{EngineConfig, MAX_WORKERS};
pub use error::{EngineError, EngineResult};
pub use ledger::DedupLedger;
pub use logging::RunLogger;
pub use retry::{retry_async, retry_async_if, FailureTracker, RetryConfig, RetryResult};
pub use router::{RejectReason, RuleRouter, Router, Routing, ScoredRouter, Scorer, TieBreak};
pub use run::{start, Collaborators, RunHandle, RunStopper};
pub use session::{new_session_id, Session};
pub use tracker::{BankTracker, RestoredBanks};
pub use words::{WordPool, WordsConfig, WordsMode};

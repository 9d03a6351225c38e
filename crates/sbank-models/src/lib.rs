//! Shared data models for the sample bank filler.
//!
//! This crate provides Serde-serializable types for:
//! - Theme definitions and identities
//! - Media references, search results and URL normalisation
//! - Fetch modes and the strategy selector
//! - Candidates and bank entries
//! - Run state and status snapshots

pub mod clip;
pub mod error;
pub mod fetch;
pub mod media;
pub mod run;
pub mod theme;

// Re-export common types
pub use clip::{BankEntry, Candidate, EntryMetadata};
pub use error::{ModelError, ModelResult};
pub use fetch::{centered_window, select_strategy, FetchMode, FetchStrategy};
pub use media::{normalize_media_url, MediaRef, SearchPage, SearchResult};
pub use run::{RunState, RunStatus, ThemeStatus};
pub use theme::{load_themes, parse_themes, Theme, ThemeId, ThemeSpec};
